pub mod clock;
pub mod ocpp_frame;
pub mod shutdown;
pub mod wire;
