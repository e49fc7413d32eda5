//! ═══════════════════════════════════════════════════════════════════════════
//! HEARTBEAT SUPERVISOR - Cooperative Multi-Bot Scheduler
//!
//! Owns the bot registry and a single driver task. The driver wakes at the
//! finest cadence any enabled bot requires (floored by config, minimum
//! 250 ms) and dispatches ticks for every bot whose heartbeat is due.
//!
//! Concurrency rules (the whole point of this module):
//! • ticks of DIFFERENT bots run in parallel — each instance has exactly
//!   one owner
//! • ticks of the SAME bot never overlap — the per-bot mutex is the busy
//!   flag; a due beat that finds the bot busy is skipped and the next due
//!   time advances
//! • stop() drains: no new ticks are scheduled, in-flight ticks get a
//!   bounded grace period, and ticks past transaction submission finish
//!   their receipt wait on their own task regardless
//! ═══════════════════════════════════════════════════════════════════════════

use chrono::{DateTime, Utc};
use ethers::types::I256;
use log::{debug, error, info, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

use crate::bots::instance::BotInstance;
use crate::bots::trading_bot::{BotServices, LiquidationReport, TickOutcome, TradingBot};
use crate::config::SupervisorConfig;
use crate::errors::{EngineError, EngineResult};
use crate::utils::alerts::AlertEvent;
use crate::utils::format::wei_to_eth_string_signed;

/// Hard floor of the base scheduler cadence
const MIN_BASE_TICK_MS: u64 = 250;

/// Per-bot scheduling state, kept outside the bot so a busy bot never
/// blocks the scheduling pass.
#[derive(Debug, Clone, Copy)]
struct ScheduleEntry {
    heartbeat_ms: u64,
    skip_setting: u32,
    last_fire: Option<Instant>,
    skip_remaining: u32,
    enabled: bool,
}

impl ScheduleEntry {
    fn new(heartbeat_ms: u64, skip_setting: u32, enabled: bool) -> Self {
        Self {
            heartbeat_ms,
            skip_setting,
            last_fire: None,
            skip_remaining: 0,
            enabled,
        }
    }

    /// Whether the interval has elapsed (ignoring skip accounting).
    fn interval_elapsed(&self, now: Instant) -> bool {
        match self.last_fire {
            None => true,
            Some(last) => now.duration_since(last).as_millis() as u64 >= self.heartbeat_ms,
        }
    }

    /// Advance the schedule at a due instant. Returns true when a tick
    /// should actually be dispatched (the skip counter has run out).
    fn fire(&mut self, now: Instant) -> bool {
        self.last_fire = Some(now);
        if self.skip_remaining > 0 {
            self.skip_remaining -= 1;
            return false;
        }
        self.skip_remaining = self.skip_setting;
        true
    }

    /// The occurrence is lost (bot busy): the due time still advances.
    fn skip_occurrence(&mut self, now: Instant) {
        self.last_fire = Some(now);
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SupervisorStatus {
    pub is_running: bool,
    pub total_bots: usize,
    pub running_bots: usize,
    pub last_tick_at: Option<DateTime<Utc>>,
}

struct Registry {
    bots: HashMap<Uuid, Arc<Mutex<TradingBot>>>,
    schedule: HashMap<Uuid, ScheduleEntry>,
}

pub struct HeartbeatSupervisor {
    services: Arc<BotServices>,
    config: SupervisorConfig,
    summary_interval_secs: u64,
    registry: Arc<Mutex<Registry>>,
    running: Arc<AtomicBool>,
    draining: Arc<AtomicBool>,
    in_flight: Arc<AtomicUsize>,
    last_tick_at: Arc<parking_lot::Mutex<Option<DateTime<Utc>>>>,
    driver: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl HeartbeatSupervisor {
    pub fn new(
        services: Arc<BotServices>,
        config: SupervisorConfig,
        summary_interval_secs: u64,
    ) -> Self {
        Self {
            services,
            config,
            summary_interval_secs,
            registry: Arc::new(Mutex::new(Registry {
                bots: HashMap::new(),
                schedule: HashMap::new(),
            })),
            running: Arc::new(AtomicBool::new(false)),
            draining: Arc::new(AtomicBool::new(false)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            last_tick_at: Arc::new(parking_lot::Mutex::new(None)),
            driver: Mutex::new(None),
        }
    }

    // ───────────────────────────────────────────────────────────────────────
    // Registry
    // ───────────────────────────────────────────────────────────────────────

    /// Rehydrate every persisted bot, reconciling transient positions
    /// against the chain before any of them is scheduled.
    pub async fn load_bots(&self) -> EngineResult<usize> {
        let instances = self.services.store.bots().await;
        let mut loaded = 0usize;

        for instance in instances {
            let name = instance.name.clone();
            match TradingBot::new(instance, Arc::clone(&self.services)) {
                Ok(mut bot) => {
                    if let Err(e) = bot.reconcile().await {
                        warn!("Bot {} reconcile at load failed: {}", name, e);
                    }
                    self.register(bot).await;
                    loaded += 1;
                }
                Err(e) => {
                    error!("Bot {} could not be rehydrated: {}", name, e);
                }
            }
        }

        info!("🤖 Supervisor loaded {} bot(s)", loaded);
        Ok(loaded)
    }

    pub async fn register(&self, bot: TradingBot) {
        let instance = bot.instance();
        let id = instance.id;
        let entry = ScheduleEntry::new(
            instance.settings.heartbeat_ms.max(MIN_BASE_TICK_MS),
            instance.settings.skip_heartbeats,
            instance.enabled,
        );

        let mut registry = self.registry.lock().await;
        registry.schedule.insert(id, entry);
        registry.bots.insert(id, Arc::new(Mutex::new(bot)));
    }

    /// Create and persist a new bot, returning its id.
    pub async fn add_bot(&self, instance: BotInstance) -> EngineResult<Uuid> {
        let id = instance.id;
        self.services.store.save_bot(&instance).await?;
        let bot = TradingBot::new(instance, Arc::clone(&self.services))?;
        self.register(bot).await;
        info!("➕ Bot {} registered", id);
        Ok(id)
    }

    /// Remove a bot from scheduling and the store.
    pub async fn delete_bot(&self, id: Uuid) -> EngineResult<bool> {
        let removed = {
            let mut registry = self.registry.lock().await;
            registry.schedule.remove(&id);
            registry.bots.remove(&id).is_some()
        };
        let existed = self.services.store.delete_bot(id).await?;
        if removed || existed {
            info!("➖ Bot {} deleted", id);
        }
        Ok(removed || existed)
    }

    /// Liquidate one bot (or every bot when `id` is None).
    pub async fn liquidate(&self, id: Option<Uuid>) -> EngineResult<LiquidationReport> {
        let targets: Vec<Arc<Mutex<TradingBot>>> = {
            let registry = self.registry.lock().await;
            match id {
                Some(id) => registry
                    .bots
                    .get(&id)
                    .cloned()
                    .map(|b| vec![b])
                    .ok_or_else(|| {
                        EngineError::Configuration(format!("no bot with id {}", id))
                    })?,
                None => registry.bots.values().cloned().collect(),
            }
        };

        // Distinct bots are independently owned, so their liquidations can
        // run in parallel
        let reports = futures::future::join_all(
            targets
                .into_iter()
                .map(|bot| async move { bot.lock().await.liquidate_all().await }),
        )
        .await;

        let mut total = LiquidationReport::default();
        for report in reports {
            total.success += report.success;
            total.failed += report.failed;
        }
        Ok(total)
    }

    // ───────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ───────────────────────────────────────────────────────────────────────

    /// Idempotent: a second start while running is a no-op.
    pub async fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            debug!("Supervisor start() ignored - already running");
            return;
        }
        self.draining.store(false, Ordering::SeqCst);

        let supervisor = Arc::clone(self);
        let handle = tokio::spawn(async move {
            supervisor.drive().await;
        });
        *self.driver.lock().await = Some(handle);
        info!("▶️  Supervisor started");
    }

    /// Idempotent: sets the draining flag, stops scheduling, and waits up
    /// to the configured grace period for in-flight ticks. Ticks that
    /// already submitted a transaction keep running on their own tasks
    /// until their receipt wait completes.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            debug!("Supervisor stop() ignored - not running");
            return;
        }
        self.draining.store(true, Ordering::SeqCst);

        let grace = Duration::from_secs(self.config.shutdown_grace_secs);
        let deadline = Instant::now() + grace;
        while self.in_flight.load(Ordering::SeqCst) > 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let in_flight = self.in_flight.load(Ordering::SeqCst);
        if in_flight > 0 {
            warn!(
                "⏳ {} tick(s) still in flight after {}s grace - they will settle in the background",
                in_flight,
                grace.as_secs()
            );
        }

        if let Some(handle) = self.driver.lock().await.take() {
            handle.abort();
        }
        info!("⏹️  Supervisor stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub async fn status(&self) -> SupervisorStatus {
        let registry = self.registry.lock().await;
        let mut running_bots = 0usize;
        for bot in registry.bots.values() {
            // A busy bot is by definition running a tick
            match bot.try_lock() {
                Ok(guard) => {
                    if guard.instance().is_running && guard.instance().enabled {
                        running_bots += 1;
                    }
                }
                Err(_) => running_bots += 1,
            }
        }

        SupervisorStatus {
            is_running: self.is_running(),
            total_bots: registry.bots.len(),
            running_bots,
            last_tick_at: *self.last_tick_at.lock(),
        }
    }

    // ───────────────────────────────────────────────────────────────────────
    // Driver
    // ───────────────────────────────────────────────────────────────────────

    /// Finest cadence any enabled bot needs, floored by config.
    async fn base_cadence(&self) -> Duration {
        let registry = self.registry.lock().await;
        let min_heartbeat = registry
            .schedule
            .values()
            .filter(|e| e.enabled)
            .map(|e| e.heartbeat_ms)
            .min()
            .unwrap_or(1_000);
        Duration::from_millis(
            min_heartbeat
                .max(self.config.base_tick_ms)
                .max(MIN_BASE_TICK_MS),
        )
    }

    async fn drive(self: Arc<Self>) {
        let mut last_summary = Instant::now();

        loop {
            if !self.running.load(Ordering::SeqCst) || self.draining.load(Ordering::SeqCst) {
                break;
            }

            let now = Instant::now();
            self.dispatch_due(now).await;

            if self.summary_interval_secs > 0
                && now.duration_since(last_summary).as_secs() >= self.summary_interval_secs
            {
                last_summary = now;
                self.emit_summary().await;
            }

            tokio::time::sleep(self.base_cadence().await).await;
        }

        debug!("Supervisor driver exited");
    }

    /// One scheduling pass: fire every due bot that is not busy.
    async fn dispatch_due(&self, now: Instant) {
        let due: Vec<(Uuid, Arc<Mutex<TradingBot>>)> = {
            let mut registry = self.registry.lock().await;

            let mut due = Vec::new();
            let ids: Vec<Uuid> = registry.schedule.keys().copied().collect();
            for id in ids {
                let Some(bot) = registry.bots.get(&id).cloned() else { continue };
                let Some(entry) = registry.schedule.get_mut(&id) else { continue };

                if !entry.enabled || !entry.interval_elapsed(now) {
                    continue;
                }

                // Busy flag: a tick from a previous beat is still running,
                // so this occurrence is lost rather than queued
                if bot.try_lock().is_err() {
                    debug!("Bot {} busy - heartbeat occurrence skipped", id);
                    entry.skip_occurrence(now);
                    continue;
                }

                if entry.fire(now) {
                    due.push((id, bot));
                }
            }
            due
        };

        for (id, bot) in due {
            self.in_flight.fetch_add(1, Ordering::SeqCst);
            let in_flight = Arc::clone(&self.in_flight);
            let last_tick_at = Arc::clone(&self.last_tick_at);

            tokio::spawn(async move {
                let mut guard = bot.lock().await;
                guard.instance_mut().last_heartbeat = Some(Utc::now());
                let outcome = guard.tick().await;
                drop(guard);

                match &outcome {
                    TickOutcome::Halted { reason } => {
                        warn!("Bot {} halted: {}", id, reason);
                    }
                    TickOutcome::Traded { buys, sells } => {
                        debug!("Bot {} traded: {} buy(s), {} sell(s)", id, buys, sells);
                    }
                    _ => {}
                }

                *last_tick_at.lock() = Some(Utc::now());
                in_flight.fetch_sub(1, Ordering::SeqCst);
            });
        }
    }

    async fn emit_summary(&self) {
        let bots = self.services.store.bots().await;
        let total_profit = bots
            .iter()
            .fold(I256::zero(), |acc, b| acc + b.total_profit_eth);
        let running = bots.iter().filter(|b| b.is_running && b.enabled).count();

        self.services
            .alerts
            .send(AlertEvent::Summary {
                total_bots: bots.len(),
                running_bots: running,
                total_trades: self.services.ledger.len(),
                total_profit_eth: wei_to_eth_string_signed(total_profit),
            })
            .await;
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_entry_interval() {
        let now = Instant::now();
        let mut entry = ScheduleEntry::new(1_000, 0, true);

        // First beat is always due
        assert!(entry.interval_elapsed(now));
        assert!(entry.fire(now));

        assert!(!entry.interval_elapsed(now + Duration::from_millis(500)));
        assert!(entry.interval_elapsed(now + Duration::from_millis(1_000)));
    }

    #[test]
    fn test_schedule_entry_skip_countdown() {
        let now = Instant::now();
        let mut entry = ScheduleEntry::new(1_000, 2, true);

        // Fires, then arms two skipped beats
        assert!(entry.fire(now));
        assert!(!entry.fire(now + Duration::from_millis(1_000)));
        assert!(!entry.fire(now + Duration::from_millis(2_000)));
        assert!(entry.fire(now + Duration::from_millis(3_000)));
    }

    #[test]
    fn test_busy_occurrence_advances_due_time() {
        let now = Instant::now();
        let mut entry = ScheduleEntry::new(1_000, 0, true);
        assert!(entry.fire(now));

        // Bot was busy at the next due time: the occurrence is lost
        let busy_at = now + Duration::from_millis(1_000);
        entry.skip_occurrence(busy_at);

        // Not due again until a full interval after the skipped occurrence
        assert!(!entry.interval_elapsed(busy_at + Duration::from_millis(500)));
        assert!(entry.interval_elapsed(busy_at + Duration::from_millis(1_000)));
    }
}
