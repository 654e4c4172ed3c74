//! Dashboard state aggregator.
//!
//! A single actor task owns the current [`DashboardSnapshot`]. Everything
//! else talks to it through [`DashboardHandle`]: refresh requests, mode
//! toggles, and the connection manager's status and message streams.
//! Readers receive `Arc<DashboardSnapshot>` values through a `watch`
//! channel; a published snapshot is never mutated, changes are published as
//! a new one.
//!
//! At most one refresh runs at a time. A refresh stimulus that arrives while
//! one is in flight is coalesced, not queued.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::SentinelConfig;
use crate::domain::{
    AgentRecord, ConnectionState, ConnectionStatusEvent, DashboardSnapshot, DataOrigin, EventKind,
    InboundEvent, RefreshCause, RefreshStats, SystemHealth, VerificationReport,
};
use crate::error::{Result, SentinelError};
use crate::gateway::{DashboardData, DashboardSource, FallbackStore, HealthProbe, RefreshRequester};
use crate::realtime::Subscription;
use crate::services::liveness;

const COMMAND_BUFFER: usize = 64;

/// Messages accepted by the aggregator task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AggregatorCommand {
    Refresh(RefreshCause),
    SetForceOffline(bool),
    /// `None` restores the default threshold
    SetLivenessThreshold(Option<i64>),
    Shutdown,
}

#[derive(Debug, Clone)]
pub struct AggregatorSettings {
    /// Recent events kept on the snapshot
    pub event_window: usize,
    pub liveness_threshold_secs: Option<i64>,
    /// Upper bound on one data load, retries included
    pub load_timeout: Duration,
    /// Skip the primary path and serve from the record store
    pub force_offline: bool,
}

impl AggregatorSettings {
    pub fn from_config(config: &SentinelConfig) -> Self {
        let attempts = u64::from(config.api.retry_attempts.max(1));
        let backoff_ms: u64 = (1..attempts).map(|n| config.api.retry_delay_ms * n).sum();
        Self {
            event_window: config.dashboard.event_window,
            liveness_threshold_secs: Some(config.dashboard.liveness_threshold_secs),
            load_timeout: Duration::from_millis(config.api.timeout_ms * attempts + backoff_ms),
            force_offline: false,
        }
    }
}

impl Default for AggregatorSettings {
    fn default() -> Self {
        Self::from_config(&SentinelConfig::default())
    }
}

/// Cloneable front door to the aggregator task
#[derive(Clone)]
pub struct DashboardHandle {
    commands: mpsc::Sender<AggregatorCommand>,
    snapshots: watch::Receiver<Arc<DashboardSnapshot>>,
}

impl DashboardHandle {
    /// Latest published snapshot
    pub fn snapshot(&self) -> Arc<DashboardSnapshot> {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<DashboardSnapshot>> {
        self.snapshots.clone()
    }

    /// Ask for a refresh. Returns false only when the aggregator is gone.
    pub fn request_refresh(&self, cause: RefreshCause) -> bool {
        match self.commands.try_send(AggregatorCommand::Refresh(cause)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!("Aggregator busy, refresh request ({:?}) dropped", cause);
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    pub async fn set_force_offline(&self, enabled: bool) -> Result<()> {
        self.send(AggregatorCommand::SetForceOffline(enabled)).await
    }

    pub async fn set_liveness_threshold(&self, threshold_secs: Option<i64>) -> Result<()> {
        self.send(AggregatorCommand::SetLivenessThreshold(threshold_secs))
            .await
    }

    pub async fn shutdown(&self) {
        let _ = self.commands.send(AggregatorCommand::Shutdown).await;
    }

    /// Wait until a snapshot of at least `generation` is published.
    pub async fn wait_for_generation(
        &self,
        generation: u64,
        within: Duration,
    ) -> Option<Arc<DashboardSnapshot>> {
        let mut rx = self.snapshots.clone();
        let wait = async move {
            loop {
                let current = rx.borrow_and_update().clone();
                if current.generation >= generation {
                    return Some(current);
                }
                if rx.changed().await.is_err() {
                    return None;
                }
            }
        };
        tokio::time::timeout(within, wait).await.ok().flatten()
    }

    async fn send(&self, command: AggregatorCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SentinelError::Unavailable("dashboard aggregator stopped".to_string()))
    }
}

impl RefreshRequester for DashboardHandle {
    fn request_refresh(&self, cause: RefreshCause) -> bool {
        DashboardHandle::request_refresh(self, cause)
    }
}

/// What one refresh pass loaded, before assembly
struct RefreshOutcome {
    data: DashboardData,
    origin: DataOrigin,
    fallback_mode: bool,
    verification: VerificationReport,
    errors: BTreeMap<String, String>,
}

/// The I/O half of a refresh. Runs on its own task so the actor stays
/// responsive while loads are pending.
struct RefreshPipeline {
    source: Arc<dyn DashboardSource>,
    fallback: Option<Arc<dyn FallbackStore>>,
    probe: Arc<dyn HealthProbe>,
    load_timeout: Duration,
    event_limit: usize,
}

impl RefreshPipeline {
    async fn run(&self, force_offline: bool) -> RefreshOutcome {
        let (loaded, verification) = tokio::join!(self.load(force_offline), self.probe.verify());
        let (data, origin, fallback_mode, errors) = loaded;
        RefreshOutcome {
            data,
            origin,
            fallback_mode,
            verification,
            errors,
        }
    }

    async fn load(&self, force_offline: bool) -> (DashboardData, DataOrigin, bool, BTreeMap<String, String>) {
        let mut errors = BTreeMap::new();

        if !force_offline {
            match bounded(self.load_timeout, "primary data load", self.source.load(self.event_limit)).await {
                Ok(mut data) => {
                    if let Some(store) = &self.fallback {
                        match bounded(self.load_timeout, "killswitch state", store.load_killswitch_state()).await {
                            Ok(state) => data.killswitch = state,
                            Err(e) => {
                                errors.insert("killswitch".to_string(), e.to_string());
                            }
                        }
                    }
                    return (data, DataOrigin::Primary, false, errors);
                }
                Err(e) => {
                    warn!("Primary data load failed, switching to fallback: {}", e);
                    errors.insert("primary".to_string(), e.to_string());
                }
            }
        }

        let store = match &self.fallback {
            Some(store) => store,
            None => {
                errors.insert(
                    "fallback".to_string(),
                    "no fallback record store configured".to_string(),
                );
                return (DashboardData::default(), DataOrigin::None, true, errors);
            }
        };

        let limit = self.load_timeout;
        let (agents, events, regime, killswitch) = tokio::join!(
            bounded(limit, "fallback agents", store.load_agents()),
            bounded(limit, "fallback events", store.load_recent_events(self.event_limit)),
            bounded(limit, "fallback regime", store.load_regime()),
            bounded(limit, "killswitch state", store.load_killswitch_state()),
        );

        let mut data = DashboardData::default();
        settle(&mut errors, "agents", agents, |v| data.agents = v);
        settle(&mut errors, "events", events, |v| data.events = v);
        settle(&mut errors, "regime", regime, |v| data.regime = v);
        settle(&mut errors, "killswitch", killswitch, |v| data.killswitch = v);

        (data, DataOrigin::Fallback, true, errors)
    }
}

async fn bounded<T>(limit: Duration, operation: &str, fut: impl Future<Output = Result<T>>) -> Result<T> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(SentinelError::timeout(operation, limit.as_millis() as u64)),
    }
}

fn settle<T>(
    errors: &mut BTreeMap<String, String>,
    source: &str,
    result: Result<T>,
    apply: impl FnOnce(T),
) {
    match result {
        Ok(value) => apply(value),
        Err(e) => {
            warn!("Fallback {} load failed: {}", source, e);
            errors.insert(source.to_string(), e.to_string());
        }
    }
}

struct InFlight {
    cause: RefreshCause,
    started: Instant,
    handle: JoinHandle<RefreshOutcome>,
}

/// Builder for the aggregator task
pub struct DashboardAggregator {
    source: Arc<dyn DashboardSource>,
    fallback: Option<Arc<dyn FallbackStore>>,
    probe: Arc<dyn HealthProbe>,
    settings: AggregatorSettings,
}

impl DashboardAggregator {
    pub fn new(
        source: Arc<dyn DashboardSource>,
        probe: Arc<dyn HealthProbe>,
        settings: AggregatorSettings,
    ) -> Self {
        Self {
            source,
            fallback: None,
            probe,
            settings,
        }
    }

    pub fn with_fallback(mut self, store: Arc<dyn FallbackStore>) -> Self {
        self.fallback = Some(store);
        self
    }

    /// Start the actor. An initial refresh begins immediately.
    pub fn spawn(
        self,
        connection: ConnectionState,
        status: Option<Subscription<ConnectionStatusEvent>>,
        messages: Option<Subscription<InboundEvent>>,
    ) -> (DashboardHandle, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let initial = Arc::new(DashboardSnapshot::loading(connection));
        let (snapshot_tx, snapshot_rx) = watch::channel(Arc::clone(&initial));

        let actor = Actor {
            pipeline: Arc::new(RefreshPipeline {
                source: self.source,
                fallback: self.fallback,
                probe: self.probe,
                load_timeout: self.settings.load_timeout,
                event_limit: self.settings.event_window,
            }),
            event_window: self.settings.event_window,
            threshold: self.settings.liveness_threshold_secs,
            force_offline: self.settings.force_offline,
            connection,
            current: initial,
            publisher: snapshot_tx,
            stats: RefreshStats::default(),
            in_flight: None,
            pending_events: Vec::new(),
            pending_heartbeats: HashMap::new(),
        };
        let task = tokio::spawn(actor.run(command_rx, status, messages));

        (
            DashboardHandle {
                commands: command_tx,
                snapshots: snapshot_rx,
            },
            task,
        )
    }
}

struct Actor {
    pipeline: Arc<RefreshPipeline>,
    event_window: usize,
    threshold: Option<i64>,
    force_offline: bool,
    connection: ConnectionState,
    current: Arc<DashboardSnapshot>,
    publisher: watch::Sender<Arc<DashboardSnapshot>>,
    stats: RefreshStats,
    in_flight: Option<InFlight>,
    /// Stream events seen while a refresh was in flight, newest first
    pending_events: Vec<InboundEvent>,
    pending_heartbeats: HashMap<String, DateTime<Utc>>,
}

impl Actor {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<AggregatorCommand>,
        mut status: Option<Subscription<ConnectionStatusEvent>>,
        mut messages: Option<Subscription<InboundEvent>>,
    ) {
        info!("Dashboard aggregator started");
        self.start_refresh(RefreshCause::Initial);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(AggregatorCommand::Refresh(cause)) => self.start_refresh(cause),
                    Some(AggregatorCommand::SetForceOffline(enabled)) => {
                        info!("Forced offline mode {}", if enabled { "enabled" } else { "disabled" });
                        self.force_offline = enabled;
                    }
                    Some(AggregatorCommand::SetLivenessThreshold(threshold)) => {
                        info!("Liveness threshold set to {:?}", threshold);
                        self.threshold = threshold;
                    }
                    Some(AggregatorCommand::Shutdown) | None => break,
                },
                joined = join_in_flight(&mut self.in_flight), if self.in_flight.is_some() => {
                    self.finish_refresh(joined);
                }
                event = next_event(&mut status), if status.is_some() => match event {
                    Some(event) => self.on_connection(event),
                    None => status = None,
                },
                event = next_event(&mut messages), if messages.is_some() => match event {
                    Some(event) => self.on_message(event),
                    None => messages = None,
                },
            }
        }

        if let Some(in_flight) = self.in_flight.take() {
            in_flight.handle.abort();
        }
        info!("Dashboard aggregator stopped");
    }

    fn start_refresh(&mut self, cause: RefreshCause) {
        if let Some(in_flight) = &self.in_flight {
            self.stats.coalesced += 1;
            debug!(
                "Refresh ({:?}) coalesced into in-flight refresh ({:?})",
                cause, in_flight.cause
            );
            return;
        }

        self.stats.started += 1;
        let pipeline = Arc::clone(&self.pipeline);
        let force_offline = self.force_offline;
        debug!("Refresh started ({:?})", cause);
        self.in_flight = Some(InFlight {
            cause,
            started: Instant::now(),
            handle: tokio::spawn(async move { pipeline.run(force_offline).await }),
        });
    }

    fn finish_refresh(&mut self, joined: std::result::Result<RefreshOutcome, JoinError>) {
        let in_flight = match self.in_flight.take() {
            Some(in_flight) => in_flight,
            None => return,
        };

        match joined {
            Ok(outcome) => {
                let snapshot = self.assemble(in_flight.cause, in_flight.started, outcome);
                info!(
                    generation = snapshot.generation,
                    health = %snapshot.health,
                    fallback = snapshot.fallback_mode,
                    "Dashboard refreshed: {}/{} endpoints OK, {} agents ({} alive)",
                    snapshot.healthy_endpoints(),
                    snapshot.total_endpoints(),
                    snapshot.liveness.total,
                    snapshot.liveness.alive,
                );
                self.publish(snapshot);
            }
            Err(e) => {
                error!("Refresh task failed: {}", e);
                self.pending_events.clear();
                self.pending_heartbeats.clear();
            }
        }
    }

    /// Build the next generation from a completed refresh
    fn assemble(&mut self, cause: RefreshCause, started: Instant, outcome: RefreshOutcome) -> DashboardSnapshot {
        let RefreshOutcome {
            mut data,
            origin,
            fallback_mode,
            verification,
            errors,
        } = outcome;

        for agent in &mut data.agents {
            if let Some(beat) = self.pending_heartbeats.get(&agent.id) {
                if agent.last_heartbeat.map_or(true, |last| last < *beat) {
                    agent.last_heartbeat = Some(*beat);
                }
            }
        }
        self.pending_heartbeats.clear();

        let mut recent = std::mem::take(&mut self.pending_events);
        recent.retain(|e| e.id.is_none() || !data.events.iter().any(|loaded| loaded.id == e.id));
        recent.extend(data.events);
        recent.truncate(self.event_window);

        let now = Utc::now();
        self.stats.completed += 1;

        let mut snapshot = DashboardSnapshot {
            generation: self.current.generation + 1,
            assembled_at: now,
            cause: Some(cause),
            refresh_duration_ms: started.elapsed().as_millis() as u64,
            fallback_mode,
            data_origin: origin,
            connection_status: self.connection,
            verification: Some(verification),
            liveness: liveness::assess(&data.agents, now, self.threshold),
            regime: data.regime,
            recent_events: recent,
            killswitch: data.killswitch,
            errors,
            health: SystemHealth::Loading,
            stats: self.stats,
        };
        snapshot.health = snapshot.recompute_health();
        snapshot
    }

    fn on_connection(&mut self, event: ConnectionStatusEvent) {
        self.connection = event.state;
        let state = event.state;
        self.republish(|snapshot| snapshot.connection_status = state);

        if event.is_reconnect() {
            self.start_refresh(RefreshCause::Reconnected);
        }
    }

    fn on_message(&mut self, event: InboundEvent) {
        match event.kind {
            EventKind::Heartbeat => match event.heartbeat_agent() {
                Some(agent_id) => {
                    let agent_id = agent_id.to_string();
                    self.apply_heartbeat(&agent_id, event.timestamp);
                }
                None => debug!("Heartbeat without agent id ignored"),
            },
            EventKind::KillswitchActivated => {
                warn!("Killswitch activation received on stream");
                self.push_event(event);
                self.start_refresh(RefreshCause::StreamKillswitch);
            }
            _ => self.push_event(event),
        }
    }

    fn push_event(&mut self, event: InboundEvent) {
        if self.in_flight.is_some() {
            self.pending_events.insert(0, event.clone());
        }
        let window = self.event_window;
        let mut recent = Vec::with_capacity(window);
        recent.push(event);
        recent.extend(self.current.recent_events.iter().cloned());
        recent.truncate(window);
        self.republish(|snapshot| snapshot.recent_events = recent);
    }

    fn apply_heartbeat(&mut self, agent_id: &str, at: DateTime<Utc>) {
        if self.in_flight.is_some() {
            let entry = self.pending_heartbeats.entry(agent_id.to_string()).or_insert(at);
            if *entry < at {
                *entry = at;
            }
        }

        let mut records: Vec<AgentRecord> = self
            .current
            .liveness
            .agents
            .iter()
            .map(|a| a.record.clone())
            .collect();
        let record = match records.iter_mut().find(|r| r.id == agent_id) {
            Some(record) => record,
            None => {
                debug!("Heartbeat for unknown agent {}", agent_id);
                return;
            }
        };
        if record.last_heartbeat.map_or(false, |last| last >= at) {
            return;
        }
        record.last_heartbeat = Some(at);

        let report = liveness::assess(&records, Utc::now(), self.threshold);
        self.republish(|snapshot| snapshot.liveness = report);
    }

    /// Copy-on-write update of the published snapshot within the same generation
    fn republish(&mut self, update: impl FnOnce(&mut DashboardSnapshot)) {
        let mut next = (*self.current).clone();
        update(&mut next);
        next.health = next.recompute_health();
        self.publish(next);
    }

    fn publish(&mut self, snapshot: DashboardSnapshot) {
        self.current = Arc::new(snapshot);
        self.publisher.send_replace(Arc::clone(&self.current));
    }
}

async fn join_in_flight(
    in_flight: &mut Option<InFlight>,
) -> std::result::Result<RefreshOutcome, JoinError> {
    match in_flight {
        Some(in_flight) => (&mut in_flight.handle).await,
        None => std::future::pending().await,
    }
}

async fn next_event<T>(subscription: &mut Option<Subscription<T>>) -> Option<T> {
    match subscription {
        Some(subscription) => subscription.recv().await,
        None => std::future::pending().await,
    }
}
