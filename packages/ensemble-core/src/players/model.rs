//! Player and media snapshot types.
//!
//! These are read-only snapshots of server-owned state. They are replaced
//! wholesale when a fresh snapshot arrives and never patched field by field.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::EnsembleError;

/// Playback state reported for a player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    Playing,
    Paused,
    #[default]
    #[serde(other)]
    Idle,
}

/// Queue repeat mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepeatMode {
    Off,
    All,
    One,
}

impl RepeatMode {
    /// Next mode in the `off → all → one → off` cycle.
    ///
    /// An unknown current mode starts the cycle at `All`.
    #[must_use]
    pub fn cycle(current: Option<RepeatMode>) -> RepeatMode {
        match current {
            None | Some(RepeatMode::Off) => RepeatMode::All,
            Some(RepeatMode::All) => RepeatMode::One,
            Some(RepeatMode::One) => RepeatMode::Off,
        }
    }

    /// Wire name of the mode.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            RepeatMode::Off => "off",
            RepeatMode::All => "all",
            RepeatMode::One => "one",
        }
    }
}

impl fmt::Display for RepeatMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RepeatMode {
    type Err = EnsembleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "off" => Ok(RepeatMode::Off),
            "all" => Ok(RepeatMode::All),
            "one" => Ok(RepeatMode::One),
            other => Err(EnsembleError::InvalidRequest(format!(
                "unknown repeat mode: {}",
                other
            ))),
        }
    }
}

/// Currently playing content.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaItem {
    pub uri: Option<String>,
    pub title: Option<String>,
    /// Artist credit as reported by the server.
    pub artist: Option<String>,
    pub album: Option<String>,
    pub image_url: Option<String>,
    /// Track length in seconds.
    pub duration: Option<f64>,
    /// Position within the track in seconds.
    #[serde(alias = "elapsed_time")]
    pub position: Option<f64>,
}

/// One remote-controllable playback endpoint.
///
/// Deserialization is lenient: `null` scalars read as their defaults, the
/// server's `name` backs an empty `display_name`, and an unrecognized repeat
/// mode reads as unknown.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "PlayerPayload")]
pub struct Player {
    pub player_id: String,
    pub display_name: String,
    pub available: bool,
    pub powered: bool,
    pub volume_level: u8,
    pub volume_muted: bool,
    pub state: PlaybackState,
    /// Backend that registered the player.
    pub provider: String,
    pub current_media: Option<MediaItem>,
    /// Queue driving the player, when it differs from the player id.
    pub active_source: Option<String>,
    pub shuffle_enabled: Option<bool>,
    pub repeat_mode: Option<RepeatMode>,
}

/// Wire shape of a player snapshot.
#[derive(Default, Deserialize)]
#[serde(default)]
struct PlayerPayload {
    #[serde(deserialize_with = "null_as_default")]
    player_id: String,
    #[serde(deserialize_with = "null_as_default")]
    display_name: String,
    name: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    available: bool,
    #[serde(deserialize_with = "null_as_default")]
    powered: bool,
    #[serde(deserialize_with = "null_as_default")]
    volume_level: u8,
    #[serde(deserialize_with = "null_as_default")]
    volume_muted: bool,
    #[serde(deserialize_with = "null_as_default")]
    state: PlaybackState,
    #[serde(deserialize_with = "null_as_default")]
    provider: String,
    current_media: Option<MediaItem>,
    active_source: Option<String>,
    shuffle_enabled: Option<bool>,
    #[serde(deserialize_with = "invalid_as_none")]
    repeat_mode: Option<RepeatMode>,
}

impl From<PlayerPayload> for Player {
    fn from(payload: PlayerPayload) -> Self {
        let display_name = if payload.display_name.is_empty() {
            payload.name.unwrap_or_default()
        } else {
            payload.display_name
        };

        Self {
            player_id: payload.player_id,
            display_name,
            available: payload.available,
            powered: payload.powered,
            volume_level: payload.volume_level,
            volume_muted: payload.volume_muted,
            state: payload.state,
            provider: payload.provider,
            current_media: payload.current_media,
            active_source: payload.active_source,
            shuffle_enabled: payload.shuffle_enabled,
            repeat_mode: payload.repeat_mode,
        }
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn invalid_as_none<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: serde::de::DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

impl Player {
    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.state == PlaybackState::Playing
    }

    /// Queue id used for queue-level commands (seek, shuffle, repeat).
    #[must_use]
    pub fn queue_id(&self) -> &str {
        self.active_source
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(&self.player_id)
    }
}
