pub mod messages;
pub mod server;

pub use messages::{Envelope, Message};
pub use server::{ControlConfig, ControlServer, TokenProvisioner};
