//! Fixed protocol constants that should NOT be changed.
//!
//! These values are defined by the media server's command API. Tunable
//! timings (poll interval, cache window, timeouts) live in [`crate::config`].

// ─────────────────────────────────────────────────────────────────────────────
// Endpoints
// ─────────────────────────────────────────────────────────────────────────────

/// Path of the HTTP command endpoint, relative to the server URL.
pub const API_PATH: &str = "/api";

/// Path of the persistent WebSocket endpoint, relative to the server URL.
pub const WS_PATH: &str = "/ws";

// ─────────────────────────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────────────────────────

pub const CMD_AUTH_LOGIN: &str = "auth/login";
pub const CMD_AUTH_CREATE_TOKEN: &str = "auth/create_token";
pub const CMD_SERVER_INFO: &str = "server/info";
/// Post-connect authentication of the WebSocket session.
pub const CMD_AUTH: &str = "auth";

pub const CMD_PLAYERS_ALL: &str = "players/all";
pub const CMD_PLAYERS_GET: &str = "players/get";
pub const CMD_PLAYER_PLAY: &str = "players/cmd/play";
pub const CMD_PLAYER_PAUSE: &str = "players/cmd/pause";
pub const CMD_PLAYER_STOP: &str = "players/cmd/stop";
pub const CMD_PLAYER_NEXT: &str = "players/cmd/next";
pub const CMD_PLAYER_PREVIOUS: &str = "players/cmd/previous";
pub const CMD_PLAYER_POWER: &str = "players/cmd/power";
pub const CMD_PLAYER_VOLUME_SET: &str = "players/cmd/volume_set";
pub const CMD_PLAYER_VOLUME_MUTE: &str = "players/cmd/volume_mute";

pub const CMD_QUEUE_SEEK: &str = "player_queues/seek";
pub const CMD_QUEUE_SHUFFLE: &str = "player_queues/shuffle";
pub const CMD_QUEUE_REPEAT: &str = "player_queues/repeat";

// ─────────────────────────────────────────────────────────────────────────────
// Events
// ─────────────────────────────────────────────────────────────────────────────

/// Server-pushed event carrying a full player snapshot.
pub const EVENT_PLAYER_UPDATED: &str = "player_updated";

/// Server-pushed event announcing a new player registration.
pub const EVENT_PLAYER_ADDED: &str = "player_added";

/// Server-pushed event announcing a removed player.
pub const EVENT_PLAYER_REMOVED: &str = "player_removed";

// ─────────────────────────────────────────────────────────────────────────────
// Error codes
// ─────────────────────────────────────────────────────────────────────────────

/// Server error codes that denote a missing media item, player or queue.
pub const NOT_FOUND_ERROR_CODES: &[i64] = &[2, 4, 12];

/// Server error codes that denote missing or rejected authentication.
pub const AUTH_ERROR_CODES: &[i64] = &[20, 21];

// ─────────────────────────────────────────────────────────────────────────────
// Volume
// ─────────────────────────────────────────────────────────────────────────────

/// Upper bound of the player volume scale.
pub const MAX_VOLUME: u8 = 100;

// ─────────────────────────────────────────────────────────────────────────────
// Channels
// ─────────────────────────────────────────────────────────────────────────────

/// Capacity of the server-pushed event broadcast channel.
pub const SERVER_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Capacity of the playback sync input queue.
pub const SYNC_INPUT_CHANNEL_CAPACITY: usize = 64;
