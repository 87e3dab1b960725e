//! Session context and dependency wiring.
//!
//! [`SessionContext`] is the composition root: the one place where the
//! transport, registry, playback sync and event bridge are created and wired
//! together. A shell builds it once with [`SessionContext::init`], feeds it
//! lifecycle transitions, and calls [`SessionContext::teardown`] on exit.
//!
//! Background wiring started by `init`:
//!
//! - the playback sync worker
//! - a connection watcher that pauses polling while the session cannot carry
//!   commands and force-refreshes the registry on every `Connected`
//! - an event forwarder that folds server-pushed player snapshots into the
//!   registry and the sync worker

use std::sync::Arc;

use parking_lot::RwLock;
use reqwest::Client;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::auth::{strategy_for, AuthStrategy, AuthStrategyKind, Credentials};
use crate::config::Config;
use crate::error::{EnsembleError, EnsembleResult};
use crate::events::{BroadcastEventBridge, CoreEvent, EventEmitter};
use crate::lifecycle::LifecycleEvent;
use crate::playback::PlaybackStateSync;
use crate::players::{Player, PlayerRegistry};
use crate::protocol_constants::{EVENT_PLAYER_ADDED, EVENT_PLAYER_REMOVED, EVENT_PLAYER_UPDATED};
use crate::retry::RetryPolicy;
use crate::runtime::{TaskSpawner, TokioSpawner};
use crate::settings::SettingsStore;
use crate::transport::{
    CommandTransport, ConnectionState, HttpCommandClient, ServerEvent, SessionAuth,
    TransportSession,
};
use crate::utils::normalize_server_url;

/// Process-wide session state, constructed explicitly and injected.
pub struct SessionContext {
    config: Config,
    settings: Arc<dyn SettingsStore>,
    http: HttpCommandClient,
    transport: Arc<TransportSession>,
    registry: Arc<PlayerRegistry>,
    sync: Arc<PlaybackStateSync>,
    event_bridge: Arc<BroadcastEventBridge>,
    /// Auth used for the current connection, reused on reconnect.
    auth: RwLock<Option<SessionAuth>>,
    reconnect_policy: RetryPolicy,
    spawner: TokioSpawner,
    cancel_token: CancellationToken,
}

impl SessionContext {
    /// Builds every service and starts the background wiring.
    ///
    /// Nothing connects yet; call [`resume`](Self::resume) or
    /// [`login`](Self::login).
    ///
    /// # Errors
    /// `Configuration` if `config` is invalid or the HTTP client cannot be built.
    ///
    /// # Panics
    /// Panics if called outside of a Tokio runtime context.
    pub fn init(config: Config, settings: Arc<dyn SettingsStore>) -> EnsembleResult<Self> {
        config.validate()?;

        let spawner = TokioSpawner::current();
        let cancel_token = CancellationToken::new();

        // Shared HTTP client for out-of-band auth commands
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| EnsembleError::Configuration(format!("HTTP client: {}", e)))?;
        let http = HttpCommandClient::new(client, config.request_timeout());

        let event_bridge = Arc::new(BroadcastEventBridge::new(config.event_channel_capacity));
        let emitter = Arc::clone(&event_bridge) as Arc<dyn EventEmitter>;

        let transport = Arc::new(TransportSession::new(
            config.transport_config(),
            Arc::clone(&emitter),
            spawner.clone(),
        ));

        let registry = Arc::new(PlayerRegistry::new(
            Arc::clone(&transport) as Arc<dyn CommandTransport>,
            Arc::clone(&emitter),
            config.registry_config(),
        ));
        registry.set_local_player_id(settings.load().local_player_id);

        let sync = Arc::new(PlaybackStateSync::new(
            Arc::clone(&transport) as Arc<dyn CommandTransport>,
            Arc::clone(&registry),
            emitter,
            config.sync_config(),
        ));
        sync.start(&spawner);

        let context = Self {
            config,
            settings,
            http,
            transport,
            registry,
            sync,
            event_bridge,
            auth: RwLock::new(None),
            reconnect_policy: RetryPolicy::network(),
            spawner,
            cancel_token,
        };
        context.spawn_ready_watcher();
        context.spawn_event_forwarder();

        log::info!("[Bootstrap] Session context ready");
        Ok(context)
    }

    /// Strategy implementation for `kind`, wired to the shared HTTP client.
    pub fn strategy(&self, kind: AuthStrategyKind) -> Arc<dyn AuthStrategy> {
        strategy_for(kind, self.http.clone(), &self.config.client_name)
    }

    /// Logs in with `kind`, persists the credentials, then connects.
    ///
    /// # Errors
    /// Login failures (`Auth`, `Transport`, ...), persistence failures, or
    /// connection failures.
    pub async fn login(
        &self,
        kind: AuthStrategyKind,
        server_url: &str,
        username: &str,
        password: &str,
    ) -> EnsembleResult<()> {
        let server_url = normalize_server_url(server_url)?;
        let strategy = self.strategy(kind);
        let credentials = strategy.login(&server_url, username, password).await?;

        self.persist_credentials(&server_url, strategy.as_ref(), &credentials)?;
        self.connect_with_credentials(&server_url, SessionAuth { strategy, credentials })
            .await
    }

    /// Connects with already-issued credentials, remembering them for
    /// reconnects.
    pub async fn connect_with_credentials(
        &self,
        server_url: &str,
        auth: SessionAuth,
    ) -> EnsembleResult<()> {
        *self.auth.write() = Some(auth.clone());
        self.transport.connect(server_url, Some(&auth)).await
    }

    /// Reconnects silently from persisted state.
    ///
    /// Returns `Ok(false)` if there is no remembered server. Network-class
    /// failures are retried with the network profile.
    ///
    /// # Errors
    /// `Auth` for unreadable or rejected stored credentials, or the last
    /// connection error.
    pub async fn resume(&self) -> EnsembleResult<bool> {
        let persisted = self.settings.load();
        let Some(server_url) = persisted.server_url else {
            log::info!("[Bootstrap] No remembered server, login required");
            return Ok(false);
        };

        let auth = match persisted.credentials {
            Some(stored) => {
                let strategy = self.strategy(stored.strategy.parse()?);
                let credentials = strategy.deserialize(&stored)?;
                Some(SessionAuth {
                    strategy,
                    credentials,
                })
            }
            None => None,
        };

        *self.auth.write() = auth.clone();
        self.connect_with_retry(&server_url, auth.as_ref()).await?;
        Ok(true)
    }

    async fn connect_with_retry(
        &self,
        server_url: &str,
        auth: Option<&SessionAuth>,
    ) -> EnsembleResult<()> {
        self.reconnect_policy
            .execute("connect", || self.transport.connect(server_url, auth))
            .await
    }

    /// Reacts to a foreground/background transition.
    ///
    /// Foreground reconnects if the session dropped and a server is
    /// remembered, then resumes polling. Background suspends polling and
    /// releases the connection.
    ///
    /// # Errors
    /// The reconnect error on foreground.
    pub async fn handle_lifecycle(&self, event: LifecycleEvent) -> EnsembleResult<()> {
        tracing::debug!(?event, "lifecycle");

        match event {
            LifecycleEvent::Foreground => {
                if !self.transport.state().accepts_commands() {
                    match self.transport.server_url() {
                        Some(server_url) => {
                            let auth = self.auth.read().clone();
                            self.connect_with_retry(&server_url, auth.as_ref()).await?;
                        }
                        None => {
                            self.resume().await?;
                        }
                    }
                }
                self.sync.resume().await;
            }
            LifecycleEvent::Background => {
                self.sync.suspend().await;
                self.transport.disconnect().await;
            }
        }
        Ok(())
    }

    /// Forgets stored credentials and disconnects. The server URL is kept.
    pub async fn logout(&self) -> EnsembleResult<()> {
        let mut persisted = self.settings.load();
        persisted.credentials = None;
        self.settings.save(&persisted)?;

        *self.auth.write() = None;
        self.transport.disconnect().await;
        log::info!("[Bootstrap] Logged out");
        Ok(())
    }

    /// Remembers the id of the player registered for this device.
    ///
    /// Registering the player is the media-session collaborator's job;
    /// this only records the id it was given.
    pub fn set_local_player_id(&self, player_id: Option<String>) -> EnsembleResult<()> {
        self.registry.set_local_player_id(player_id.clone());

        let mut persisted = self.settings.load();
        persisted.local_player_id = player_id;
        self.settings.save(&persisted)
    }

    /// Stops all background work and disconnects.
    pub async fn teardown(&self) {
        log::info!("[Bootstrap] Beginning teardown...");
        self.cancel_token.cancel();
        self.sync.stop();
        self.transport.disconnect().await;
        log::info!("[Bootstrap] Teardown complete");
    }

    fn persist_credentials(
        &self,
        server_url: &str,
        strategy: &dyn AuthStrategy,
        credentials: &Credentials,
    ) -> EnsembleResult<()> {
        let mut persisted = self.settings.load();
        persisted.server_url = Some(server_url.to_string());
        persisted.credentials = Some(strategy.serialize(credentials)?);
        self.settings.save(&persisted)
    }

    fn spawn_ready_watcher(&self) {
        let mut state_rx = self.transport.subscribe_state();
        let registry = Arc::clone(&self.registry);
        let sync = Arc::clone(&self.sync);

        self.spawner
            .spawn_until_cancelled(self.cancel_token.clone(), async move {
                let online = state_rx.borrow_and_update().accepts_commands();
                sync.set_online(online).await;

                while state_rx.changed().await.is_ok() {
                    let state = *state_rx.borrow_and_update();
                    sync.set_online(state.accepts_commands()).await;
                    if state == ConnectionState::Connected {
                        log::info!("[Bootstrap] Session ready, refreshing players");
                        registry.refresh(true).await;
                    }
                }
            });
    }

    fn spawn_event_forwarder(&self) {
        let mut events = self.transport.subscribe_events();
        let registry = Arc::clone(&self.registry);
        let sync = Arc::clone(&self.sync);

        self.spawner
            .spawn_until_cancelled(self.cancel_token.clone(), async move {
                loop {
                    match events.recv().await {
                        Ok(event) => forward_event(&registry, &sync, event).await,
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            log::warn!("[Bootstrap] Missed {} server events, refreshing", missed);
                            registry.refresh(true).await;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            });
    }

    // ─────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn transport(&self) -> &Arc<TransportSession> {
        &self.transport
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<PlayerRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn playback(&self) -> &Arc<PlaybackStateSync> {
        &self.sync
    }

    /// Bridge for attaching an external emitter.
    #[must_use]
    pub fn event_bridge(&self) -> &Arc<BroadcastEventBridge> {
        &self.event_bridge
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.event_bridge.subscribe()
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.transport.state()
    }
}

impl Drop for SessionContext {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

/// Folds one server-pushed event into cached state.
async fn forward_event(registry: &PlayerRegistry, sync: &PlaybackStateSync, event: ServerEvent) {
    match event.event.as_str() {
        EVENT_PLAYER_UPDATED | EVENT_PLAYER_ADDED => {
            match serde_json::from_value::<Player>(event.data) {
                Ok(player) => {
                    registry.apply_snapshot(player.clone());
                    sync.apply_snapshot(player).await;
                }
                Err(e) => log::warn!("[Bootstrap] Malformed {} payload: {}", event.event, e),
            }
        }
        EVENT_PLAYER_REMOVED => match event.object_id.as_deref() {
            Some(player_id) => registry.remove_player(player_id),
            None => log::warn!("[Bootstrap] {} without object_id", event.event),
        },
        other => log::trace!("[Bootstrap] Ignoring event {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{MemorySettingsStore, PersistedSession};
    use crate::transport::test_server;
    use serde_json::Value;
    use std::time::Duration;

    fn context(settings: Arc<MemorySettingsStore>) -> SessionContext {
        let config = Config {
            request_timeout_secs: 5,
            connect_timeout_secs: 5,
            ..Default::default()
        };
        SessionContext::init(config, settings).unwrap()
    }

    async fn eventually<F: Fn() -> bool>(condition: F) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn init_rejects_invalid_config() {
        let config = Config {
            poll_interval_ms: 0,
            ..Default::default()
        };
        let result = SessionContext::init(config, Arc::new(MemorySettingsStore::default()));
        assert!(matches!(result, Err(EnsembleError::Configuration(_))));
    }

    #[tokio::test]
    async fn login_persists_and_refreshes_players() {
        let url = test_server::spawn(false).await;
        let settings = Arc::new(MemorySettingsStore::default());
        let ctx = context(settings.clone());

        ctx.login(AuthStrategyKind::None, &url, "", "").await.unwrap();

        assert_eq!(ctx.state(), ConnectionState::Connected);
        let persisted = settings.load();
        assert_eq!(persisted.server_url.as_deref(), Some(url.as_str()));
        assert_eq!(persisted.credentials.unwrap().strategy, "none");

        let registry = Arc::clone(ctx.registry());
        eventually(|| registry.players().len() == 2).await;
        assert_eq!(registry.selected_id().as_deref(), Some("kitchen"));

        ctx.teardown().await;
    }

    #[tokio::test]
    async fn resume_without_server_needs_login() {
        let ctx = context(Arc::new(MemorySettingsStore::default()));
        assert!(!ctx.resume().await.unwrap());
        assert_eq!(ctx.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn resume_reconnects_from_persisted_state() {
        let url = test_server::spawn(false).await;
        let settings = Arc::new(MemorySettingsStore::new(PersistedSession {
            server_url: Some(url),
            credentials: None,
            local_player_id: Some("bedroom".into()),
        }));
        let ctx = context(settings);

        assert!(ctx.resume().await.unwrap());
        assert_eq!(ctx.state(), ConnectionState::Connected);

        let registry = Arc::clone(ctx.registry());
        eventually(|| registry.selected_id().as_deref() == Some("bedroom")).await;

        ctx.teardown().await;
    }

    #[tokio::test]
    async fn resume_rejects_unknown_strategy() {
        let stored = crate::auth::StoredCredentials {
            strategy: "kerberos".into(),
            data: Default::default(),
        };
        let settings = Arc::new(MemorySettingsStore::new(PersistedSession {
            server_url: Some("http://127.0.0.1:1".into()),
            credentials: Some(stored),
            local_player_id: None,
        }));
        let ctx = context(settings);

        let err = ctx.resume().await.unwrap_err();
        assert!(matches!(err, EnsembleError::Auth(_)));
    }

    #[tokio::test]
    async fn pushed_events_reach_registry_and_playback() {
        let url = test_server::spawn(false).await;
        let ctx = context(Arc::new(MemorySettingsStore::default()));
        ctx.login(AuthStrategyKind::None, &url, "", "").await.unwrap();

        let registry = Arc::clone(ctx.registry());
        eventually(|| registry.selected_id().as_deref() == Some("kitchen")).await;

        ctx.transport().send("notify", Value::Null).await.unwrap();

        eventually(|| registry.player("kitchen").is_some_and(|p| p.volume_level == 55)).await;
        let playback = Arc::clone(ctx.playback());
        eventually(|| playback.snapshot().is_some_and(|p| p.volume_level == 55)).await;

        ctx.teardown().await;
    }

    #[tokio::test]
    async fn lifecycle_disconnects_and_reconnects() {
        let url = test_server::spawn(false).await;
        let ctx = context(Arc::new(MemorySettingsStore::default()));
        ctx.login(AuthStrategyKind::None, &url, "", "").await.unwrap();

        ctx.handle_lifecycle(LifecycleEvent::Background).await.unwrap();
        assert_eq!(ctx.state(), ConnectionState::Disconnected);

        ctx.handle_lifecycle(LifecycleEvent::Foreground).await.unwrap();
        assert_eq!(ctx.state(), ConnectionState::Connected);

        ctx.teardown().await;
        assert_eq!(ctx.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn polling_follows_the_connection() {
        let url = test_server::spawn(false).await;
        let ctx = context(Arc::new(MemorySettingsStore::default()));
        let playback = Arc::clone(ctx.playback());
        ctx.login(AuthStrategyKind::None, &url, "", "").await.unwrap();
        eventually(|| playback.is_polling()).await;

        let _ = ctx.transport().send("close", Value::Null).await;
        eventually(|| ctx.state() == ConnectionState::Disconnected).await;
        eventually(|| !playback.is_polling()).await;

        ctx.handle_lifecycle(LifecycleEvent::Foreground).await.unwrap();
        assert_eq!(ctx.state(), ConnectionState::Connected);
        eventually(|| playback.is_polling()).await;

        ctx.teardown().await;
        assert!(!playback.is_polling());
    }

    #[tokio::test]
    async fn logout_forgets_credentials() {
        let url = test_server::spawn(false).await;
        let settings = Arc::new(MemorySettingsStore::default());
        let ctx = context(settings.clone());
        ctx.login(AuthStrategyKind::None, &url, "", "").await.unwrap();
        ctx.set_local_player_id(Some("phone".into())).unwrap();

        ctx.logout().await.unwrap();

        let persisted = settings.load();
        assert!(persisted.credentials.is_none());
        assert_eq!(persisted.server_url.as_deref(), Some(url.as_str()));
        assert_eq!(persisted.local_player_id.as_deref(), Some("phone"));
        assert_eq!(ctx.state(), ConnectionState::Disconnected);
    }
}
