//! Bridge implementation that maps core notifications to a broadcast channel.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;

use super::emitter::EventEmitter;
use super::CoreEvent;
use crate::transport::ConnectionState;

/// Bridges notifications to a `tokio::sync::broadcast` channel.
///
/// UI shells subscribe with [`BroadcastEventBridge::subscribe`]. An optional
/// external emitter receives every notification as well, for shells that
/// prefer a direct callback.
#[derive(Clone)]
pub struct BroadcastEventBridge {
    tx: broadcast::Sender<CoreEvent>,
    external_emitter: Arc<RwLock<Option<Arc<dyn EventEmitter>>>>,
}

impl BroadcastEventBridge {
    /// Creates a new bridge with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            external_emitter: Arc::new(RwLock::new(None)),
        }
    }

    /// Sets an external emitter that receives every notification.
    pub fn set_external_emitter(&self, emitter: Arc<dyn EventEmitter>) {
        *self.external_emitter.write() = Some(emitter);
    }

    /// Returns a new receiver for the broadcast channel.
    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.tx.subscribe()
    }

    fn send(&self, event: CoreEvent) {
        if let Err(e) = self.tx.send(event) {
            log::trace!("[EventBridge] No broadcast receivers: {}", e);
        }
    }
}

impl EventEmitter for BroadcastEventBridge {
    fn emit_connection(&self, state: ConnectionState) {
        if let Some(ref emitter) = *self.external_emitter.read() {
            emitter.emit_connection(state);
        }
        self.send(CoreEvent::ConnectionChanged { state });
    }

    fn emit_players_changed(&self) {
        if let Some(ref emitter) = *self.external_emitter.read() {
            emitter.emit_players_changed();
        }
        self.send(CoreEvent::PlayersChanged);
    }

    fn emit_playback_changed(&self) {
        if let Some(ref emitter) = *self.external_emitter.read() {
            emitter.emit_playback_changed();
        }
        self.send(CoreEvent::PlaybackChanged);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::emitter::test_support::RecordingEmitter;

    #[test]
    fn forwards_to_channel_and_external_emitter() {
        let bridge = BroadcastEventBridge::new(8);
        let external = Arc::new(RecordingEmitter::default());
        bridge.set_external_emitter(external.clone());
        let mut rx = bridge.subscribe();

        bridge.emit_connection(ConnectionState::Connected);
        bridge.emit_players_changed();

        assert_eq!(
            rx.try_recv().unwrap(),
            CoreEvent::ConnectionChanged {
                state: ConnectionState::Connected
            }
        );
        assert_eq!(rx.try_recv().unwrap(), CoreEvent::PlayersChanged);
        assert_eq!(external.players_count(), 1);
        assert_eq!(*external.states.lock(), vec![ConnectionState::Connected]);
    }

    #[test]
    fn emitting_without_subscribers_is_harmless() {
        let bridge = BroadcastEventBridge::new(8);
        bridge.emit_playback_changed();
    }
}
