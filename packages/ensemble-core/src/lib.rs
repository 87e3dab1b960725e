//! Ensemble Core - connection and player-state sync for a media server remote.
//!
//! This crate holds the part of the remote that talks to the server: it keeps
//! a persistent session open, authenticates it, maintains the filtered list of
//! players and keeps the selected player's playback state fresh. UI shells
//! consume it through [`SessionContext`] and the [`CoreEvent`] notifications.
//!
//! # Architecture
//!
//! - [`retry`]: Sequential retry with capped exponential backoff
//! - [`auth`]: Authentication strategies and credentials
//! - [`transport`]: WebSocket session, connection state machine, HTTP commands
//! - [`players`]: Player model, ghost filtering and selection policy
//! - [`playback`]: Selected-player polling and the command surface
//! - [`bootstrap`]: The session context that wires everything together
//! - [`events`]: Change notifications for the UI
//! - [`error`]: Centralized error types
//!
//! # Abstraction Traits
//!
//! - [`TaskSpawner`](runtime::TaskSpawner): Spawning background tasks
//! - [`EventEmitter`](events::EventEmitter): Emitting change notifications
//! - [`CommandTransport`](transport::CommandTransport): Command dispatch
//! - [`AuthStrategy`](auth::AuthStrategy): Authentication schemes
//! - [`SettingsStore`](settings::SettingsStore): Persisted session state

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod auth;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod logging;
pub mod playback;
pub mod players;
pub mod protocol;
pub mod protocol_constants;
pub mod retry;
pub mod runtime;
pub mod settings;
pub mod transport;
pub mod utils;

// Re-export commonly used types at the crate root
pub use auth::{
    AuthHeaders, AuthStrategy, AuthStrategyKind, Credentials, GatewayAuth, NativeAuth, NoAuth,
    StoredCredentials,
};
pub use bootstrap::SessionContext;
pub use config::Config;
pub use error::{EnsembleError, EnsembleResult, ErrorCode};
pub use events::{BroadcastEventBridge, CoreEvent, EventEmitter, LoggingEventEmitter, NoopEventEmitter};
pub use lifecycle::LifecycleEvent;
pub use playback::{PlaybackStateSync, SyncConfig};
pub use players::{MediaItem, PlaybackState, Player, PlayerRegistry, RegistryConfig, RepeatMode};
pub use retry::RetryPolicy;
pub use runtime::{TaskSpawner, TokioSpawner};
pub use settings::{JsonFileSettingsStore, MemorySettingsStore, PersistedSession, SettingsStore};
pub use transport::{
    CommandTransport, ConnectionState, ServerEvent, SessionAuth, TransportConfig,
    TransportSession,
};
