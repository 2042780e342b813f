pub mod auth;
pub mod server;
pub mod types;

pub use auth::BearerAuth;
pub use server::{router, ApiState};
