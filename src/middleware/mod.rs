//! Request extractors for end-user and operator authentication.

pub mod auth;

pub use auth::{AppKey, AuthUser};
