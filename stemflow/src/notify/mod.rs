//! Notification Hub: live progress push for job subscribers.

mod event;
mod hub;

pub use event::JobEvent;
pub use hub::{HubConfig, NotificationHub, Subscription};
