//! Shared test fixtures for player and playback tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use super::model::{PlaybackState, Player};
use crate::error::EnsembleResult;
use crate::transport::CommandTransport;

type Handler = Box<dyn Fn(&str, &Value) -> EnsembleResult<Value> + Send + Sync>;

/// Command transport that answers from a closure and records every call.
pub struct MockTransport {
    handler: Handler,
    calls: Mutex<Vec<(String, Value)>>,
}

impl MockTransport {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&str, &Value) -> EnsembleResult<Value> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Number of calls made with `command`.
    pub fn calls_to(&self, command: &str) -> usize {
        self.calls.lock().iter().filter(|(c, _)| c == command).count()
    }

    /// Arguments of every call made with `command`, oldest first.
    pub fn args_of(&self, command: &str) -> Vec<Value> {
        self.calls
            .lock()
            .iter()
            .filter(|(c, _)| c == command)
            .map(|(_, args)| args.clone())
            .collect()
    }
}

#[async_trait]
impl CommandTransport for MockTransport {
    async fn send(&self, command: &str, args: Value) -> EnsembleResult<Value> {
        let result = (self.handler)(command, &args);
        self.calls.lock().push((command.to_string(), args));
        result
    }
}

/// Builds an available, powered player.
pub fn player(id: &str, name: &str) -> Player {
    Player {
        player_id: id.into(),
        display_name: name.into(),
        available: true,
        powered: true,
        volume_level: 20,
        provider: "test".into(),
        ..Default::default()
    }
}

pub fn unavailable(id: &str, name: &str) -> Player {
    Player {
        available: false,
        ..player(id, name)
    }
}

pub fn playing(id: &str, name: &str) -> Player {
    Player {
        state: PlaybackState::Playing,
        ..player(id, name)
    }
}

pub fn to_json(players: &[Player]) -> Value {
    serde_json::to_value(players).unwrap()
}
