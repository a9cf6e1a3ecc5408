//! HTTP inbound adapter exposing the gateway's REST endpoints.

pub mod access;
pub mod epochs;
pub mod error;
pub mod health;
pub mod messages;
pub mod presence;
pub mod schemas;
pub mod session;
pub mod session_config;
pub mod sessions;
pub mod state;
#[cfg(test)]
pub mod test_utils;
pub mod validation;

pub use error::ApiResult;
