//! Output channels that deliver one event to one external service.

mod discord;
mod gotify;

pub use discord::DiscordNotifier;
pub use gotify::GotifyNotifier;
