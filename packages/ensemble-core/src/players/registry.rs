//! Authoritative local view of the server's player list.
//!
//! The registry fetches the player list, hides ghost registrations, and
//! keeps a single selection. The selection is stored as a player id and
//! resolved against the current list on every read, so callers never hold
//! a stale copy of the selected player.
//!
//! Background refreshes never fail outward: a failed fetch is logged and the
//! previous list stays in place.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde_json::{json, Value};
use tokio::sync::watch;
use tokio::time::Instant;

use super::model::Player;
use crate::error::{EnsembleError, EnsembleResult};
use crate::events::EventEmitter;
use crate::protocol_constants::{CMD_PLAYERS_ALL, CMD_PLAYERS_GET};
use crate::transport::CommandTransport;

/// Tunables for [`PlayerRegistry`].
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Unforced refreshes within this window of the last fetch are skipped.
    pub cache_window: Duration,
    /// Retired default player name; matching players are ghosts.
    pub ghost_player_name: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            cache_window: Duration::from_secs(30),
            ghost_player_name: "This Device".to_string(),
        }
    }
}

/// Drops ghost and unavailable players.
///
/// A player is dropped if its display name contains `ghost_name`
/// (case-insensitive) or if it is unavailable. The player whose id equals
/// `local_player_id` is always kept. Order is preserved.
#[must_use]
pub fn filter_players(
    players: Vec<Player>,
    ghost_name: &str,
    local_player_id: Option<&str>,
) -> Vec<Player> {
    let ghost = ghost_name.to_lowercase();

    players
        .into_iter()
        .filter(|player| {
            if local_player_id == Some(player.player_id.as_str()) {
                return true;
            }
            if !ghost.is_empty() && player.display_name.to_lowercase().contains(&ghost) {
                log::debug!(
                    "[Registry] Hiding ghost player {} ({})",
                    player.player_id,
                    player.display_name
                );
                return false;
            }
            if !player.available {
                log::debug!("[Registry] Hiding unavailable player {}", player.player_id);
                return false;
            }
            true
        })
        .collect()
}

/// Picks the player to select from a filtered list.
///
/// The current selection is kept while it is present and available.
/// Otherwise the priority is: the local player if available, a playing
/// player, the first available player, then the first player at all.
#[must_use]
pub fn choose_selection<'a>(
    players: &'a [Player],
    current: Option<&str>,
    local_player_id: Option<&str>,
) -> Option<&'a Player> {
    let available_with_id =
        move |id: &str| players.iter().find(|p| p.player_id == id && p.available);

    if let Some(kept) = current.and_then(available_with_id) {
        return Some(kept);
    }
    if let Some(local) = local_player_id.and_then(available_with_id) {
        return Some(local);
    }

    players
        .iter()
        .find(|p| p.is_playing())
        .or_else(|| players.iter().find(|p| p.available))
        .or_else(|| players.first())
}

#[derive(Default)]
struct RegistryState {
    players: Vec<Player>,
    last_fetch: Option<Instant>,
}

/// Player list, selection and refresh throttling.
pub struct PlayerRegistry {
    transport: Arc<dyn CommandTransport>,
    emitter: Arc<dyn EventEmitter>,
    config: RegistryConfig,
    state: RwLock<RegistryState>,
    local_player_id: RwLock<Option<String>>,
    selection_tx: watch::Sender<Option<String>>,
    /// Serializes refreshes so two callers inside the cache window share one fetch.
    refresh_lock: tokio::sync::Mutex<()>,
}

impl PlayerRegistry {
    pub fn new(
        transport: Arc<dyn CommandTransport>,
        emitter: Arc<dyn EventEmitter>,
        config: RegistryConfig,
    ) -> Self {
        let (selection_tx, _) = watch::channel(None);
        Self {
            transport,
            emitter,
            config,
            state: RwLock::new(RegistryState::default()),
            local_player_id: RwLock::new(None),
            selection_tx,
            refresh_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Fetches every player in one round-trip, unfiltered.
    ///
    /// Failures are logged and yield an empty list.
    pub async fn fetch_all(&self) -> Vec<Player> {
        match self.try_fetch_all().await {
            Ok(players) => players,
            Err(e) => {
                log::warn!("[Registry] Fetching players failed: {}", e);
                Vec::new()
            }
        }
    }

    /// Malformed entries are skipped so one bad player cannot hide the rest.
    async fn try_fetch_all(&self) -> EnsembleResult<Vec<Player>> {
        let result = self.transport.send(CMD_PLAYERS_ALL, Value::Null).await?;
        let entries: Vec<Value> = serde_json::from_value(result)?;

        Ok(entries
            .into_iter()
            .filter_map(|entry| match serde_json::from_value::<Player>(entry) {
                Ok(player) => Some(player),
                Err(e) => {
                    log::warn!("[Registry] Skipping malformed player entry: {}", e);
                    None
                }
            })
            .collect())
    }

    /// Fetches one player's current snapshot.
    ///
    /// # Errors
    /// `InvalidRequest` for an empty id, otherwise whatever the transport returns.
    pub async fn fetch_player(&self, player_id: &str) -> EnsembleResult<Player> {
        if player_id.is_empty() {
            return Err(EnsembleError::InvalidRequest("player_id is empty".into()));
        }
        let result = self
            .transport
            .send(CMD_PLAYERS_GET, json!({ "player_id": player_id }))
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Refreshes the player list and re-applies the selection policy.
    ///
    /// Unless `force` is set, this is a no-op within the cache window of the
    /// previous successful fetch.
    pub async fn refresh(&self, force: bool) {
        let _guard = self.refresh_lock.lock().await;

        if !force && self.is_cache_fresh() {
            log::debug!("[Registry] Skipping refresh, cache is fresh");
            return;
        }

        let players = match self.try_fetch_all().await {
            Ok(players) => players,
            Err(e) => {
                log::warn!(
                    "[Registry] Refresh failed, keeping {} cached players: {}",
                    self.state.read().players.len(),
                    e
                );
                return;
            }
        };

        let local = self.local_player_id();
        let fetched = players.len();
        let players = filter_players(players, &self.config.ghost_player_name, local.as_deref());
        log::info!(
            "[Registry] Refreshed: {} players ({} hidden)",
            players.len(),
            fetched - players.len()
        );

        let current = self.selected_id();
        let next = choose_selection(&players, current.as_deref(), local.as_deref())
            .map(|p| p.player_id.clone());

        {
            let mut state = self.state.write();
            state.players = players;
            state.last_fetch = Some(Instant::now());
        }

        self.update_selection(next);
        self.emitter.emit_players_changed();
    }

    fn is_cache_fresh(&self) -> bool {
        self.state
            .read()
            .last_fetch
            .is_some_and(|at| at.elapsed() < self.config.cache_window)
    }

    /// Sets the selection if it changed.
    fn update_selection(&self, next: Option<String>) {
        let changed = self.selection_tx.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            log::info!("[Registry] Selection {:?} -> {:?}", current, next);
            *current = next;
            true
        });
        if !changed {
            log::trace!("[Registry] Selection unchanged");
        }
    }

    /// Selects `player_id` explicitly.
    ///
    /// Always honored, even for an id not in the current list, and always
    /// restarts playback polling.
    pub fn select_player(&self, player_id: &str) {
        log::info!("[Registry] Player {} selected", player_id);
        self.selection_tx.send_replace(Some(player_id.to_string()));
        self.emitter.emit_players_changed();
    }

    /// Clears the selection, stopping playback polling.
    pub fn clear_selection(&self) {
        self.selection_tx.send_replace(None);
        self.emitter.emit_players_changed();
    }

    /// Id of the selected player.
    #[must_use]
    pub fn selected_id(&self) -> Option<String> {
        self.selection_tx.borrow().clone()
    }

    /// The selected player, resolved against the current list.
    #[must_use]
    pub fn selected(&self) -> Option<Player> {
        let id = self.selected_id()?;
        self.player(&id)
    }

    #[must_use]
    pub fn player(&self, player_id: &str) -> Option<Player> {
        self.state
            .read()
            .players
            .iter()
            .find(|p| p.player_id == player_id)
            .cloned()
    }

    /// Current filtered player list in server order.
    #[must_use]
    pub fn players(&self) -> Vec<Player> {
        self.state.read().players.clone()
    }

    /// Watches selection changes. Every explicit selection notifies.
    pub fn subscribe_selection(&self) -> watch::Receiver<Option<String>> {
        self.selection_tx.subscribe()
    }

    #[must_use]
    pub fn local_player_id(&self) -> Option<String> {
        self.local_player_id.read().clone()
    }

    /// Remembers the id of the player registered for this device.
    pub fn set_local_player_id(&self, player_id: Option<String>) {
        *self.local_player_id.write() = player_id.filter(|id| !id.is_empty());
    }

    /// Folds a server-pushed player snapshot into the list.
    ///
    /// The snapshot replaces the entry with the same id, or is appended if
    /// new. If the filter now hides it, it is removed and the selection
    /// policy runs again.
    pub fn apply_snapshot(&self, player: Player) {
        let local = self.local_player_id();
        let player_id = player.player_id.clone();
        let visible =
            !filter_players(vec![player.clone()], &self.config.ghost_player_name, local.as_deref())
                .is_empty();

        {
            let mut state = self.state.write();
            let existing = state.players.iter().position(|p| p.player_id == player_id);
            match (existing, visible) {
                (Some(index), true) => state.players[index] = player,
                (Some(index), false) => {
                    state.players.remove(index);
                }
                (None, true) => state.players.push(player),
                (None, false) => return,
            }
        }

        if !visible {
            self.reselect_if_invalid();
        }
        self.emitter.emit_players_changed();
    }

    /// Drops a player the server reported as removed.
    pub fn remove_player(&self, player_id: &str) {
        let removed = {
            let mut state = self.state.write();
            let before = state.players.len();
            state.players.retain(|p| p.player_id != player_id);
            state.players.len() != before
        };

        if removed {
            log::info!("[Registry] Player {} removed", player_id);
            self.reselect_if_invalid();
            self.emitter.emit_players_changed();
        }
    }

    fn reselect_if_invalid(&self) {
        let current = self.selected_id();
        let local = self.local_player_id();
        let next = {
            let state = self.state.read();
            choose_selection(&state.players, current.as_deref(), local.as_deref())
                .map(|p| p.player_id.clone())
        };
        self.update_selection(next);
    }
}
