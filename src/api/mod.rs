//! HTTP surface
//!
//! Serves the proxy endpoints, the health check and the front-end files.

pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod server;

pub use server::{ApiServer, AppState};
