//! Socket protocol: connection lifecycle and client operations.

pub mod session;

pub use session::{ConnectionState, Session};
