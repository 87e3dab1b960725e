//! Playback state polling and the player command surface.
//!
//! A single worker task owns the poll timer. Selection changes, pushed
//! snapshots, refresh requests and poll ticks all arrive at that one
//! `select!` loop, so they are applied strictly in arrival order and there
//! is never more than one poller.
//!
//! Selecting a player drops the current timer and the previous player's
//! snapshot, fetches the new player's state immediately, then starts a fresh
//! timer. Clearing the selection drops the timer without a replacement. A
//! failed poll is logged; the next tick is the retry.
//!
//! Polling only runs while the shell is in the foreground and the session
//! can carry commands. Going offline drops the timer; coming back restarts
//! it with an immediate fetch.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::{EnsembleError, EnsembleResult};
use crate::events::EventEmitter;
use crate::players::{MediaItem, Player, PlayerRegistry, RepeatMode};
use crate::protocol_constants::{
    CMD_PLAYERS_GET, CMD_PLAYER_NEXT, CMD_PLAYER_PAUSE, CMD_PLAYER_PLAY, CMD_PLAYER_POWER,
    CMD_PLAYER_PREVIOUS, CMD_PLAYER_STOP, CMD_PLAYER_VOLUME_MUTE, CMD_PLAYER_VOLUME_SET,
    CMD_QUEUE_REPEAT, CMD_QUEUE_SEEK, CMD_QUEUE_SHUFFLE, MAX_VOLUME, SYNC_INPUT_CHANNEL_CAPACITY,
};
use crate::runtime::TaskSpawner;
use crate::transport::CommandTransport;

/// Tunables for [`PlaybackStateSync`].
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Period of the selected player's state poll.
    pub poll_interval: Duration,
    /// Wait after a toggle/skip before re-reading state.
    pub settle_delay: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(3000),
            settle_delay: Duration::from_millis(500),
        }
    }
}

/// Inputs to the worker loop besides selection changes and ticks.
#[derive(Debug)]
enum SyncInput {
    /// Externally observed player snapshot.
    Pushed(Player),
    /// Fetch the selected player's state now.
    RefreshNow,
    /// Stop or restart polling without touching the selection.
    SetActive(bool),
    /// Whether the session can currently carry commands.
    SetOnline(bool),
}

/// Keeps the selected player's playback snapshot fresh.
pub struct PlaybackStateSync {
    transport: Arc<dyn CommandTransport>,
    registry: Arc<PlayerRegistry>,
    emitter: Arc<dyn EventEmitter>,
    config: SyncConfig,
    snapshot: Arc<RwLock<Option<Player>>>,
    polling: Arc<AtomicBool>,
    input_tx: mpsc::Sender<SyncInput>,
    input_rx: Mutex<Option<mpsc::Receiver<SyncInput>>>,
    cancel: CancellationToken,
}

impl PlaybackStateSync {
    pub fn new(
        transport: Arc<dyn CommandTransport>,
        registry: Arc<PlayerRegistry>,
        emitter: Arc<dyn EventEmitter>,
        config: SyncConfig,
    ) -> Self {
        let (input_tx, input_rx) = mpsc::channel(SYNC_INPUT_CHANNEL_CAPACITY);
        Self {
            transport,
            registry,
            emitter,
            config,
            snapshot: Arc::new(RwLock::new(None)),
            polling: Arc::new(AtomicBool::new(false)),
            input_tx,
            input_rx: Mutex::new(Some(input_rx)),
            cancel: CancellationToken::new(),
        }
    }

    /// Spawns the worker loop. Returns false if it was already started.
    ///
    /// The worker is dropped as soon as [`stop`](Self::stop) is called, even
    /// in the middle of a fetch.
    pub fn start(&self, spawner: &impl TaskSpawner) -> bool {
        let Some(inputs) = self.input_rx.lock().take() else {
            log::warn!("[Sync] Worker already started");
            return false;
        };

        let worker = SyncWorker {
            transport: Arc::clone(&self.transport),
            emitter: Arc::clone(&self.emitter),
            snapshot: Arc::clone(&self.snapshot),
            polling: Arc::clone(&self.polling),
            poll_interval: self.config.poll_interval,
        };
        let selection = self.registry.subscribe_selection();
        spawner.spawn_until_cancelled(self.cancel.clone(), worker.run(inputs, selection));
        true
    }

    /// Stops the worker loop for good.
    pub fn stop(&self) {
        if !self.cancel.is_cancelled() {
            log::info!("[Sync] Stopping worker");
        }
        self.cancel.cancel();
        self.polling.store(false, Ordering::Relaxed);
    }

    /// Pauses polling, keeping the selection.
    pub async fn suspend(&self) {
        self.send_input(SyncInput::SetActive(false)).await;
    }

    /// Resumes polling for the current selection.
    pub async fn resume(&self) {
        self.send_input(SyncInput::SetActive(true)).await;
    }

    /// Reports whether the session can carry commands.
    ///
    /// Polling pauses while offline and restarts with an immediate fetch once
    /// the session is back.
    pub async fn set_online(&self, online: bool) {
        self.send_input(SyncInput::SetOnline(online)).await;
    }

    /// True while a poll timer is running for the selected player.
    #[must_use]
    pub fn is_polling(&self) -> bool {
        self.polling.load(Ordering::Relaxed)
    }

    /// Latest snapshot of the selected player.
    ///
    /// A snapshot left over from a previously selected player is never
    /// returned.
    #[must_use]
    pub fn snapshot(&self) -> Option<Player> {
        let selected_id = self.registry.selected_id()?;
        self.snapshot
            .read()
            .clone()
            .filter(|p| p.player_id == selected_id)
    }

    #[must_use]
    pub fn current_media(&self) -> Option<MediaItem> {
        self.snapshot().and_then(|p| p.current_media)
    }

    /// Folds an externally observed snapshot into the cached state.
    ///
    /// Snapshots for players other than the selected one are ignored.
    pub async fn apply_snapshot(&self, player: Player) {
        self.send_input(SyncInput::Pushed(player)).await;
    }

    /// Queues an immediate state fetch for the selected player.
    pub async fn refresh_now(&self) {
        self.send_input(SyncInput::RefreshNow).await;
    }

    async fn send_input(&self, input: SyncInput) {
        if self.input_tx.send(input).await.is_err() {
            log::debug!("[Sync] Worker stopped, input dropped");
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Player commands
    // ─────────────────────────────────────────────────────────────────────

    pub async fn play(&self, player_id: &str) -> EnsembleResult<()> {
        self.player_command(CMD_PLAYER_PLAY, player_id, json!({})).await
    }

    pub async fn pause(&self, player_id: &str) -> EnsembleResult<()> {
        self.player_command(CMD_PLAYER_PAUSE, player_id, json!({})).await
    }

    pub async fn stop_playback(&self, player_id: &str) -> EnsembleResult<()> {
        self.player_command(CMD_PLAYER_STOP, player_id, json!({})).await
    }

    pub async fn next(&self, player_id: &str) -> EnsembleResult<()> {
        self.player_command(CMD_PLAYER_NEXT, player_id, json!({})).await
    }

    pub async fn previous(&self, player_id: &str) -> EnsembleResult<()> {
        self.player_command(CMD_PLAYER_PREVIOUS, player_id, json!({})).await
    }

    /// Powers a player on or off, then refreshes the registry.
    ///
    /// Power changes can change a player's availability, so the full list
    /// is re-fetched rather than just this player's state.
    pub async fn set_power(&self, player_id: &str, powered: bool) -> EnsembleResult<()> {
        self.player_command(CMD_PLAYER_POWER, player_id, json!({ "powered": powered }))
            .await?;
        self.registry.refresh(true).await;
        Ok(())
    }

    /// Sets the volume, clamped to 0-100.
    pub async fn set_volume(&self, player_id: &str, level: u8) -> EnsembleResult<()> {
        let level = level.min(MAX_VOLUME);
        self.player_command(
            CMD_PLAYER_VOLUME_SET,
            player_id,
            json!({ "volume_level": level }),
        )
        .await
    }

    /// Mutes or unmutes a player, then refreshes the registry.
    pub async fn set_mute(&self, player_id: &str, muted: bool) -> EnsembleResult<()> {
        self.player_command(CMD_PLAYER_VOLUME_MUTE, player_id, json!({ "muted": muted }))
            .await?;
        self.registry.refresh(true).await;
        Ok(())
    }

    /// Seeks the queue to `position` (whole seconds on the wire).
    pub async fn seek(&self, queue_id: &str, position: Duration) -> EnsembleResult<()> {
        self.queue_command(
            CMD_QUEUE_SEEK,
            queue_id,
            json!({ "position": position.as_secs() }),
        )
        .await
    }

    pub async fn set_shuffle(&self, queue_id: &str, enabled: bool) -> EnsembleResult<()> {
        self.queue_command(
            CMD_QUEUE_SHUFFLE,
            queue_id,
            json!({ "shuffle_enabled": enabled }),
        )
        .await
    }

    /// Flips shuffle relative to the cached snapshot. Returns the new value.
    pub async fn toggle_shuffle(&self, queue_id: &str) -> EnsembleResult<bool> {
        let enabled = !self
            .snapshot_for_queue(queue_id)
            .and_then(|p| p.shuffle_enabled)
            .unwrap_or(false);
        self.set_shuffle(queue_id, enabled).await?;
        Ok(enabled)
    }

    pub async fn set_repeat(&self, queue_id: &str, mode: RepeatMode) -> EnsembleResult<()> {
        self.queue_command(
            CMD_QUEUE_REPEAT,
            queue_id,
            json!({ "repeat_mode": mode.as_str() }),
        )
        .await
    }

    /// Advances repeat along `off → all → one → off`. Returns the new mode.
    pub async fn cycle_repeat(&self, queue_id: &str) -> EnsembleResult<RepeatMode> {
        let current = self
            .snapshot_for_queue(queue_id)
            .and_then(|p| p.repeat_mode);
        let next = RepeatMode::cycle(current);
        self.set_repeat(queue_id, next).await?;
        Ok(next)
    }

    /// Toggles play/pause on the selected player, then re-reads its state
    /// after the settle delay.
    pub async fn play_pause_toggle(&self) -> EnsembleResult<()> {
        let player = self.selected_player()?;
        if player.is_playing() {
            self.pause(&player.player_id).await?;
        } else {
            self.play(&player.player_id).await?;
        }
        self.settle_and_refresh().await;
        Ok(())
    }

    pub async fn skip_next(&self) -> EnsembleResult<()> {
        let player = self.selected_player()?;
        self.next(&player.player_id).await?;
        self.settle_and_refresh().await;
        Ok(())
    }

    pub async fn skip_previous(&self) -> EnsembleResult<()> {
        let player = self.selected_player()?;
        self.previous(&player.player_id).await?;
        self.settle_and_refresh().await;
        Ok(())
    }

    /// Selected player, preferring the fresher polled snapshot.
    fn selected_player(&self) -> EnsembleResult<Player> {
        let selected_id = self
            .registry
            .selected_id()
            .ok_or_else(|| EnsembleError::InvalidRequest("no player selected".into()))?;

        let polled = self
            .snapshot
            .read()
            .clone()
            .filter(|p| p.player_id == selected_id);

        Ok(polled
            .or_else(|| self.registry.player(&selected_id))
            .unwrap_or_else(|| Player {
                player_id: selected_id,
                ..Default::default()
            }))
    }

    fn snapshot_for_queue(&self, queue_id: &str) -> Option<Player> {
        self.snapshot
            .read()
            .clone()
            .filter(|p| p.queue_id() == queue_id)
    }

    async fn settle_and_refresh(&self) {
        tokio::time::sleep(self.config.settle_delay).await;
        self.refresh_now().await;
    }

    async fn player_command(&self, command: &str, player_id: &str, args: Value) -> EnsembleResult<()> {
        require_id("player_id", player_id)?;
        self.dispatch(command, with_id("player_id", player_id, args)).await
    }

    async fn queue_command(&self, command: &str, queue_id: &str, args: Value) -> EnsembleResult<()> {
        require_id("queue_id", queue_id)?;
        self.dispatch(command, with_id("queue_id", queue_id, args)).await
    }

    async fn dispatch(&self, command: &str, args: Value) -> EnsembleResult<()> {
        match self.transport.send(command, args).await {
            Ok(_) => {
                log::debug!("[Sync] {} ok", command);
                Ok(())
            }
            Err(e) => {
                log::warn!("[Sync] {} failed: {}", command, e);
                Err(e)
            }
        }
    }
}

impl Drop for PlaybackStateSync {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn require_id(field: &str, id: &str) -> EnsembleResult<()> {
    if id.trim().is_empty() {
        return Err(EnsembleError::InvalidRequest(format!("{} is required", field)));
    }
    Ok(())
}

fn with_id(field: &str, id: &str, mut args: Value) -> Value {
    if let Value::Object(map) = &mut args {
        map.insert(field.to_string(), Value::String(id.to_string()));
    }
    args
}

/// State owned by the worker task.
struct SyncWorker {
    transport: Arc<dyn CommandTransport>,
    emitter: Arc<dyn EventEmitter>,
    snapshot: Arc<RwLock<Option<Player>>>,
    polling: Arc<AtomicBool>,
    poll_interval: Duration,
}

/// Polling runs only while both flags are set.
struct PollGate {
    active: bool,
    online: bool,
}

impl PollGate {
    fn open(&self) -> bool {
        self.active && self.online
    }
}

impl SyncWorker {
    async fn run(
        self,
        mut inputs: mpsc::Receiver<SyncInput>,
        mut selection: watch::Receiver<Option<String>>,
    ) {
        let mut selected = selection.borrow_and_update().clone();
        let mut gate = PollGate {
            active: true,
            online: true,
        };
        let mut poll = self.restart(selected.as_deref()).await;
        self.polling.store(poll.is_some(), Ordering::Relaxed);
        log::info!("[Sync] Worker started");

        loop {
            tokio::select! {
                biased;

                changed = selection.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    selected = selection.borrow_and_update().clone();
                    // Old timer goes away before the replacement exists.
                    poll = None;
                    self.discard_stale_snapshot(selected.as_deref());
                    if gate.open() {
                        poll = self.restart(selected.as_deref()).await;
                    }
                }

                Some(input) = inputs.recv() => {
                    let was_open = gate.open();
                    match input {
                        SyncInput::Pushed(player) => self.apply(player, selected.as_deref()),
                        SyncInput::RefreshNow => match selected.as_deref() {
                            Some(id) if gate.open() => self.fetch(id).await,
                            _ => {}
                        },
                        SyncInput::SetActive(active) => gate.active = active,
                        SyncInput::SetOnline(online) => gate.online = online,
                    }
                    if gate.open() != was_open {
                        poll = None;
                        if gate.open() {
                            poll = self.restart(selected.as_deref()).await;
                        }
                        log::info!("[Sync] Polling {}", if gate.open() { "resumed" } else { "paused" });
                    }
                }

                _ = next_tick(&mut poll) => {
                    if let Some(id) = selected.as_deref() {
                        self.fetch(id).await;
                    }
                }
            }
            self.polling.store(poll.is_some(), Ordering::Relaxed);
        }

        self.polling.store(false, Ordering::Relaxed);
        log::info!("[Sync] Worker stopped");
    }

    /// Fetches immediately, then returns a timer whose first tick is one
    /// period from now.
    async fn restart(&self, selected: Option<&str>) -> Option<Interval> {
        let id = selected?;
        log::debug!("[Sync] Polling {} every {:?}", id, self.poll_interval);
        self.fetch(id).await;

        let mut interval =
            tokio::time::interval_at(Instant::now() + self.poll_interval, self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Some(interval)
    }

    async fn fetch(&self, player_id: &str) {
        let result = self
            .transport
            .send(CMD_PLAYERS_GET, json!({ "player_id": player_id }))
            .await
            .and_then(|value| Ok(serde_json::from_value::<Player>(value)?));

        match result {
            Ok(player) => self.apply(player, Some(player_id)),
            Err(e) => log::warn!("[Sync] Poll for {} failed: {}", player_id, e),
        }
    }

    fn apply(&self, player: Player, selected: Option<&str>) {
        if selected != Some(player.player_id.as_str()) {
            log::trace!("[Sync] Ignoring snapshot for unselected {}", player.player_id);
            return;
        }

        let changed = {
            let mut snapshot = self.snapshot.write();
            if snapshot.as_ref() == Some(&player) {
                false
            } else {
                *snapshot = Some(player);
                true
            }
        };
        if changed {
            self.emitter.emit_playback_changed();
        }
    }

    /// Drops a snapshot that does not belong to `selected`.
    fn discard_stale_snapshot(&self, selected: Option<&str>) {
        let stale = self
            .snapshot
            .read()
            .as_ref()
            .is_some_and(|p| Some(p.player_id.as_str()) != selected);
        if stale {
            self.clear_snapshot();
        }
    }

    fn clear_snapshot(&self) {
        if self.snapshot.write().take().is_some() {
            self.emitter.emit_playback_changed();
        }
    }
}

/// Resolves on the next tick, or never when no timer is running.
async fn next_tick(poll: &mut Option<Interval>) {
    match poll {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::test_support::RecordingEmitter;
    use crate::events::NoopEventEmitter;
    use crate::players::test_fixtures::{player, playing, to_json, MockTransport};
    use crate::players::RegistryConfig;
    use crate::protocol_constants::CMD_PLAYERS_ALL;
    use crate::runtime::TokioSpawner;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    /// Transport whose commands never complete.
    struct HangingTransport;

    #[async_trait]
    impl CommandTransport for HangingTransport {
        async fn send(&self, _command: &str, _args: Value) -> EnsembleResult<Value> {
            std::future::pending().await
        }
    }

    struct Harness {
        sync: PlaybackStateSync,
        registry: Arc<PlayerRegistry>,
        transport: Arc<MockTransport>,
    }

    fn harness_with(players: Vec<Player>, emitter: Arc<dyn EventEmitter>) -> Harness {
        let transport = Arc::new(MockTransport::new(move |command, args| {
            match command {
                CMD_PLAYERS_ALL => Ok(to_json(&players)),
                CMD_PLAYERS_GET => {
                    let id = args["player_id"].as_str().unwrap_or_default();
                    players
                        .iter()
                        .find(|p| p.player_id == id)
                        .map(|p| serde_json::to_value(p).unwrap())
                        .ok_or_else(|| EnsembleError::NotFound(id.to_string()))
                }
                _ => Ok(Value::Null),
            }
        }));
        let registry = Arc::new(PlayerRegistry::new(
            transport.clone(),
            emitter.clone(),
            RegistryConfig::default(),
        ));
        let sync = PlaybackStateSync::new(
            transport.clone(),
            registry.clone(),
            emitter,
            SyncConfig::default(),
        );
        Harness {
            sync,
            registry,
            transport,
        }
    }

    fn harness() -> Harness {
        harness_with(
            vec![player("a", "A"), playing("b", "B")],
            Arc::new(NoopEventEmitter),
        )
    }

    fn polled_ids(transport: &MockTransport) -> Vec<String> {
        transport
            .args_of(CMD_PLAYERS_GET)
            .iter()
            .map(|args| args["player_id"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn new_selection_replaces_poller() {
        let h = harness();
        assert!(h.sync.start(&TokioSpawner::current()));

        h.registry.select_player("a");
        tokio::time::sleep(Duration::from_secs(7)).await;
        h.registry.select_player("b");
        tokio::time::sleep(Duration::from_secs(10)).await;

        let ids = polled_ids(&h.transport);
        let first_b = ids.iter().position(|id| id == "b").unwrap();
        assert!(first_b >= 2, "expected immediate fetch plus ticks for a: {:?}", ids);
        assert!(ids[..first_b].iter().all(|id| id == "a"));
        assert!(ids[first_b..].iter().all(|id| id == "b"), "{:?}", ids);
        assert_eq!(h.sync.snapshot().unwrap().player_id, "b");
    }

    #[tokio::test(start_paused = true)]
    async fn selection_fetches_immediately() {
        let h = harness();
        h.sync.start(&TokioSpawner::current());

        h.registry.select_player("a");
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(polled_ids(&h.transport), ["a"]);
        assert_eq!(h.sync.snapshot().unwrap().player_id, "a");
    }

    #[tokio::test(start_paused = true)]
    async fn clearing_selection_stops_polling() {
        let h = harness();
        h.sync.start(&TokioSpawner::current());

        h.registry.select_player("a");
        tokio::time::sleep(Duration::from_secs(4)).await;
        h.registry.clear_selection();
        tokio::time::sleep(Duration::from_millis(10)).await;
        let polls = h.transport.calls_to(CMD_PLAYERS_GET);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(h.transport.calls_to(CMD_PLAYERS_GET), polls);
        assert!(h.sync.snapshot().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn reselection_drops_previous_snapshot() {
        let emitter = Arc::new(RecordingEmitter::default());
        let transport = Arc::new(MockTransport::new(|_, args| {
            if args["player_id"] == "a" {
                let mut a = player("a", "A");
                a.current_media = Some(MediaItem {
                    title: Some("Song".into()),
                    ..Default::default()
                });
                Ok(serde_json::to_value(a).unwrap())
            } else {
                Err(EnsembleError::Timeout("players/get".into()))
            }
        }));
        let registry = Arc::new(PlayerRegistry::new(
            transport.clone(),
            emitter.clone(),
            RegistryConfig::default(),
        ));
        let sync = PlaybackStateSync::new(
            transport,
            registry.clone(),
            emitter.clone(),
            SyncConfig::default(),
        );
        sync.start(&TokioSpawner::current());

        registry.select_player("a");
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(sync.current_media().unwrap().title.as_deref(), Some("Song"));
        let before = emitter.playback_count();

        registry.select_player("b");
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(sync.snapshot().is_none());
        assert!(sync.current_media().is_none());
        assert!(sync.snapshot.read().is_none());
        assert_eq!(emitter.playback_count(), before + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn polling_pauses_while_offline() {
        let h = harness();
        h.sync.start(&TokioSpawner::current());
        h.registry.select_player("a");
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(h.sync.is_polling());

        h.sync.set_online(false).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!h.sync.is_polling());
        let polls = h.transport.calls_to(CMD_PLAYERS_GET);

        h.sync.refresh_now().await;
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(h.transport.calls_to(CMD_PLAYERS_GET), polls);

        h.sync.set_online(true).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(h.sync.is_polling());
        assert_eq!(h.transport.calls_to(CMD_PLAYERS_GET), polls + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn suspended_worker_stays_paused_when_back_online() {
        let h = harness();
        h.sync.start(&TokioSpawner::current());
        h.registry.select_player("a");

        h.sync.set_online(false).await;
        h.sync.suspend().await;
        h.sync.set_online(true).await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(!h.sync.is_polling());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_interrupts_an_in_flight_poll() {
        let transport = Arc::new(HangingTransport);
        let registry = Arc::new(PlayerRegistry::new(
            transport.clone(),
            Arc::new(NoopEventEmitter),
            RegistryConfig::default(),
        ));
        let sync = PlaybackStateSync::new(
            transport,
            registry.clone(),
            Arc::new(NoopEventEmitter),
            SyncConfig::default(),
        );
        sync.start(&TokioSpawner::current());

        registry.select_player("a");
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!sync.input_tx.is_closed());

        sync.stop();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(sync.input_tx.is_closed());
        assert!(!sync.is_polling());
    }

    #[tokio::test(start_paused = true)]
    async fn suspend_and_resume_polling() {
        let h = harness();
        h.sync.start(&TokioSpawner::current());
        h.registry.select_player("a");
        tokio::time::sleep(Duration::from_millis(10)).await;

        h.sync.suspend().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        let polls = h.transport.calls_to(CMD_PLAYERS_GET);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(h.transport.calls_to(CMD_PLAYERS_GET), polls);

        h.sync.resume().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(h.transport.calls_to(CMD_PLAYERS_GET), polls + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_polls_keep_the_loop_running() {
        let failures = Arc::new(AtomicUsize::new(2));
        let remaining = failures.clone();
        let transport = Arc::new(MockTransport::new(move |_, _| {
            if remaining.load(Ordering::SeqCst) > 0 {
                remaining.fetch_sub(1, Ordering::SeqCst);
                return Err(EnsembleError::Timeout("players/get".into()));
            }
            Ok(serde_json::to_value(player("a", "A")).unwrap())
        }));
        let registry = Arc::new(PlayerRegistry::new(
            transport.clone(),
            Arc::new(NoopEventEmitter),
            RegistryConfig::default(),
        ));
        let sync = PlaybackStateSync::new(
            transport.clone(),
            registry.clone(),
            Arc::new(NoopEventEmitter),
            SyncConfig::default(),
        );
        sync.start(&TokioSpawner::current());

        registry.select_player("a");
        tokio::time::sleep(Duration::from_secs(7)).await;

        assert_eq!(transport.calls_to(CMD_PLAYERS_GET), 3);
        assert_eq!(sync.snapshot().unwrap().player_id, "a");
    }

    #[tokio::test(start_paused = true)]
    async fn pushed_snapshots_apply_to_selected_player_only() {
        let emitter = Arc::new(RecordingEmitter::default());
        let h = harness_with(vec![player("a", "A"), player("b", "B")], emitter.clone());
        h.sync.start(&TokioSpawner::current());
        h.registry.select_player("a");
        tokio::time::sleep(Duration::from_millis(10)).await;
        let before = emitter.playback_count();

        let mut louder = player("a", "A");
        louder.volume_level = 77;
        h.sync.apply_snapshot(louder).await;
        h.sync.apply_snapshot(player("b", "B")).await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        let snapshot = h.sync.snapshot().unwrap();
        assert_eq!(snapshot.player_id, "a");
        assert_eq!(snapshot.volume_level, 77);
        assert_eq!(emitter.playback_count(), before + 1);
    }

    #[tokio::test]
    async fn commands_require_an_id() {
        let h = harness();
        for result in [
            h.sync.play("").await,
            h.sync.pause("  ").await,
            h.sync.set_volume("", 10).await,
            h.sync.seek("", Duration::from_secs(5)).await,
        ] {
            assert!(matches!(result, Err(EnsembleError::InvalidRequest(_))));
        }
        assert!(h.transport.args_of(CMD_PLAYER_PLAY).is_empty());
        assert!(h.transport.args_of(CMD_QUEUE_SEEK).is_empty());
    }

    #[tokio::test]
    async fn command_arguments() {
        let h = harness();

        h.sync.set_volume("a", 150).await.unwrap();
        h.sync.seek("q1", Duration::from_millis(42_900)).await.unwrap();
        h.sync.set_repeat("q1", RepeatMode::One).await.unwrap();

        assert_eq!(
            h.transport.args_of(CMD_PLAYER_VOLUME_SET),
            [json!({"player_id": "a", "volume_level": 100})]
        );
        assert_eq!(
            h.transport.args_of(CMD_QUEUE_SEEK),
            [json!({"queue_id": "q1", "position": 42})]
        );
        assert_eq!(
            h.transport.args_of(CMD_QUEUE_REPEAT),
            [json!({"queue_id": "q1", "repeat_mode": "one"})]
        );
    }

    #[tokio::test]
    async fn power_and_mute_refresh_the_registry() {
        let h = harness();

        h.sync.set_power("a", false).await.unwrap();
        h.sync.set_mute("a", true).await.unwrap();

        assert_eq!(h.transport.calls_to(CMD_PLAYERS_ALL), 2);
        assert_eq!(
            h.transport.args_of(CMD_PLAYER_POWER),
            [json!({"player_id": "a", "powered": false})]
        );
    }

    #[tokio::test]
    async fn command_failures_are_returned() {
        let transport = Arc::new(MockTransport::new(|_, _| {
            Err(EnsembleError::NotFound("player a".into()))
        }));
        let registry = Arc::new(PlayerRegistry::new(
            transport.clone(),
            Arc::new(NoopEventEmitter),
            RegistryConfig::default(),
        ));
        let sync = PlaybackStateSync::new(
            transport,
            registry,
            Arc::new(NoopEventEmitter),
            SyncConfig::default(),
        );

        let err = sync.play("a").await.unwrap_err();
        assert!(matches!(err, EnsembleError::NotFound(_)));
    }

    #[tokio::test]
    async fn cycle_repeat_starts_at_all_without_snapshot() {
        let h = harness();
        assert_eq!(h.sync.cycle_repeat("q1").await.unwrap(), RepeatMode::All);
        assert!(h.sync.toggle_shuffle("q1").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn toggle_pauses_playing_player_and_refreshes() {
        let h = harness();
        h.sync.start(&TokioSpawner::current());
        h.registry.refresh(true).await;
        assert_eq!(h.registry.selected_id().as_deref(), Some("b"));
        tokio::time::sleep(Duration::from_millis(10)).await;
        let polls = h.transport.calls_to(CMD_PLAYERS_GET);

        h.sync.play_pause_toggle().await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(
            h.transport.args_of(CMD_PLAYER_PAUSE),
            [json!({"player_id": "b"})]
        );
        assert!(h.transport.args_of(CMD_PLAYER_PLAY).is_empty());
        assert_eq!(h.transport.calls_to(CMD_PLAYERS_GET), polls + 1);
    }

    #[tokio::test]
    async fn toggle_without_selection_is_rejected() {
        let h = harness();
        let err = h.sync.play_pause_toggle().await.unwrap_err();
        assert!(matches!(err, EnsembleError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let h = harness();
        assert!(h.sync.start(&TokioSpawner::current()));
        assert!(!h.sync.start(&TokioSpawner::current()));
    }
}
