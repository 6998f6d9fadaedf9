//! Event channels: listeners that produce normalized events and
//! notifiers that deliver them, glued together by the dispatcher.

pub mod dispatcher;
pub mod listeners;
pub mod notifiers;

pub use dispatcher::{DeliveryOutcome, DispatchReport, Dispatcher};
pub use listeners::{
    DiscordListener, GotifyListener, SyslogListener, TaskListener, WebhookListener,
};
pub use notifiers::{DiscordNotifier, GotifyNotifier};
