//! Business logic: room presence, channel fan-out, message persistence, notification routing,
//! event streams and push delivery.

pub mod channel;
pub mod message;
pub mod notification;
pub mod presence;
pub mod push;
pub mod stream;

pub use channel::ChannelService;
pub use message::{MessageService, PostedMessage};
pub use notification::NotificationRouter;
pub use presence::PresenceService;
pub use push::{HttpPushTransport, LogPushTransport, PushTransport, SubscriptionService};
pub use stream::{EventStream, StreamService};
