//! Alert delivery for triggered monitor rules
//!
//! An [`AlertEvent`] is fanned out by the [`AlertDispatcher`] to every
//! configured [`AlertChannel`]. New channel kinds only need to implement the
//! trait.

pub mod config;
pub mod dispatcher;
pub mod event;
pub mod notifier;
pub mod smtp;

pub use config::{ChannelConfig, ChannelConfigError, ChannelKind};
pub use dispatcher::{AlertDispatcher, ChannelOutcome, DispatchReport};
pub use event::AlertEvent;
pub use notifier::{
    AlertChannel, ChatFormat, ChatHookChannel, EmailChannel, LogChannel, NotifierError,
    WebhookChannel,
};
