//! Playback state of the selected player.

mod sync;

pub use sync::{PlaybackStateSync, SyncConfig};
