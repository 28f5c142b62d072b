//! Inbound OCPP-J message handling

mod ocpp_v16;
mod ocpp_v16_handler;

pub use ocpp_v16::v16_action_matcher;
pub use ocpp_v16_handler::OcppHandlerV16;
