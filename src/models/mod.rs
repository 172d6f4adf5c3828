//! Data models for presence, socket frames, notifications and chat entities.

pub mod channel;
pub mod chat;
pub mod event;
pub mod notification;
pub mod presence;
pub mod request;
pub mod stream;

pub use channel::*;
pub use chat::*;
pub use event::*;
pub use notification::*;
pub use presence::*;
pub use request::*;
pub use stream::*;
