//! Bank REST API integration.
//!
//! `RequestClient` is the single outbound gateway; `AuthService` and `AccountApi` are thin
//! typed wrappers over it for the authentication and read-side endpoints.

/// Read-side account endpoints
mod account;
/// Login, registration and logout
mod auth;
/// The HTTP gateway
mod client;
/// Request, response and error types
mod types;

pub use account::AccountApi;
pub use auth::AuthService;
pub use client::RequestClient;
pub use types::*;
