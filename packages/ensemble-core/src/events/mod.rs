//! Change notifications for UI collaborators.
//!
//! This module provides:
//! - [`EventEmitter`] trait that core services notify through
//! - [`BroadcastEventBridge`] that fans notifications out over a broadcast channel
//! - [`CoreEvent`], the notification type
//!
//! Notifications carry no player data. Consumers re-read the registry or
//! sync state when they receive one.

mod bridge;
mod emitter;

pub use bridge::BroadcastEventBridge;
pub use emitter::{EventEmitter, LoggingEventEmitter, NoopEventEmitter};

#[cfg(test)]
pub(crate) use emitter::test_support;

use serde::Serialize;

use crate::transport::ConnectionState;

/// Notifications broadcast to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CoreEvent {
    /// The transport session changed state.
    ConnectionChanged {
        state: ConnectionState,
    },
    /// The player list or the selection changed.
    PlayersChanged,
    /// The selected player's playback snapshot changed.
    PlaybackChanged,
}
