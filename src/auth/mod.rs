//! Bearer JWT identity.

mod jwt;

pub use jwt::{Claims, JwtSecret};
