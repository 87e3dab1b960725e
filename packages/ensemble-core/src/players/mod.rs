//! Player discovery, filtering and selection.
//!
//! - `model` - player and media snapshot types
//! - `registry` - the filtered player list and the current selection

mod model;
mod registry;

#[cfg(test)]
pub(crate) mod test_fixtures;

pub use model::{MediaItem, PlaybackState, Player, RepeatMode};
pub use registry::{choose_selection, filter_players, PlayerRegistry, RegistryConfig};
