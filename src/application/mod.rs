pub mod central_system;
pub mod charge_point;
pub mod commands;
pub mod connector;
pub mod correlator;
pub mod handlers;
pub mod session;

// Re-export key types for convenience
pub use central_system::{CentralSystem, InboundRequest, InboundResponse, SharedCentralSystem};
pub use charge_point::ChargePoint;
pub use commands::{
    create_command_sender, CommandSender, OutboundCalls, SharedCommandSender, SharedOutboundCalls,
};
pub use connector::Connector;
pub use handlers::OcppHandlerV16;
pub use session::{SessionRegistry, SharedSessionRegistry};
