pub mod connection;
pub mod framer;

pub use connection::{ConnectionStateMachine, ConnectionStateMachineConfig, StepOutcome};
pub use framer::{TransportFramer, WireFrame};
