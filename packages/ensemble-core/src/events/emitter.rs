//! Event emitter abstraction for decoupling services from delivery.
//!
//! Services depend on the [`EventEmitter`] trait rather than concrete broadcast
//! channels, enabling testing and alternative delivery implementations.

use crate::transport::ConnectionState;

/// Trait for emitting change notifications without knowledge of delivery.
///
/// # Example
///
/// ```ignore
/// struct MyService {
///     emitter: Arc<dyn EventEmitter>,
/// }
///
/// impl MyService {
///     fn refresh(&self) {
///         // ...update state...
///         self.emitter.emit_players_changed();
///     }
/// }
/// ```
pub trait EventEmitter: Send + Sync {
    /// Emits a connection state transition.
    fn emit_connection(&self, state: ConnectionState);

    /// Emits a player list / selection change.
    fn emit_players_changed(&self);

    /// Emits a playback snapshot change.
    fn emit_playback_changed(&self);
}

/// No-op emitter for testing or embedding without subscribers.
pub struct NoopEventEmitter;

impl EventEmitter for NoopEventEmitter {
    fn emit_connection(&self, _state: ConnectionState) {}

    fn emit_players_changed(&self) {}

    fn emit_playback_changed(&self) {}
}

/// Logging emitter for debugging and development.
///
/// Logs all events at debug level.
pub struct LoggingEventEmitter;

impl EventEmitter for LoggingEventEmitter {
    fn emit_connection(&self, state: ConnectionState) {
        tracing::debug!(?state, "connection_event");
    }

    fn emit_players_changed(&self) {
        tracing::debug!("players_changed");
    }

    fn emit_playback_changed(&self) {
        tracing::debug!("playback_changed");
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::RecordingEmitter;
    use super::*;
    use std::sync::Arc;

    #[test]
    fn recording_emitter_tracks_events() {
        let emitter = Arc::new(RecordingEmitter::default());

        emitter.emit_connection(ConnectionState::Connecting);
        emitter.emit_connection(ConnectionState::Connected);
        emitter.emit_players_changed();

        assert_eq!(
            *emitter.states.lock(),
            vec![ConnectionState::Connecting, ConnectionState::Connected]
        );
        assert_eq!(emitter.players_count(), 1);
        assert_eq!(emitter.playback_count(), 0);
    }
}
