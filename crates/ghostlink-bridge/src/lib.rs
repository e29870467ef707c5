pub mod avatar;
pub mod bridge;
mod cache;
pub mod config;
pub mod connector;
pub mod error;
pub mod ghost;
pub mod state_queue;
pub mod tasks;
pub mod updaters;
pub mod user;
pub mod user_login;

#[cfg(test)]
mod testutil;

pub use bridge::Bridge;
pub use config::BridgeConfig;
pub use error::{BridgeError, Result};
pub use ghost::{Changed, Ghost, UserInfo};
pub use user::User;
pub use user_login::UserLogin;
