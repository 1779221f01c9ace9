//! HTTP host for the Will.IAM authorization core
//!
//! Exposes the AM listing and permission checks behind the credential
//! middleware, plus an open healthcheck.

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod server;
pub mod state;

pub use error::{ApiError, Result};
pub use server::Server;
pub use state::AppState;
