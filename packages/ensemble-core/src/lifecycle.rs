//! App lifecycle signals.
//!
//! The shell reports foreground/background transitions; the session
//! context decides what to connect, suspend or resume in response.

use serde::{Deserialize, Serialize};

/// Foreground/background transition reported by the shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEvent {
    /// The app became visible. Reconnect if needed and resume polling.
    Foreground,
    /// The app was hidden. Polling stops; the connection is released.
    Background,
}
