//! Scheduler and range monitor
//!
//! Single cooperative loop on a fixed tick: re-reads every tracked
//! position's pool index, classifies range transitions, fires events and
//! auto-rebalances, then executes due DCA schedules. Positions are
//! processed sequentially within a tick; a slow venue delays the next
//! tick, never concurrent intents.

pub mod dca;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::context::AppContext;
use crate::error::Result;
use crate::notify::{Event, EventKind};
use crate::pipeline;
use crate::store::{keys, Store};
use crate::submit::SubmitMode;
use crate::types::{
    Position, Strategy, TipUrgency, TrackedPosition, WorkerState,
};

/// Durable worker log entry, kept in a capped ring
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub at: chrono::DateTime<Utc>,
    pub level: String,
    pub message: String,
}

/// Start tracking a position for range monitoring. Record first, set
/// membership second.
pub async fn track(store: &Store, wallet_id: &str, position: &Position) -> Result<()> {
    let tracked = TrackedPosition {
        position_id: position.id.clone(),
        wallet: wallet_id.to_string(),
        pool: position.pool.clone(),
        venue: position.venue,
        lower_index: position.lower_index,
        upper_index: position.upper_index,
        last_checked: Utc::now(),
        last_in_range: position.in_range,
        out_of_range_since: None,
    };
    store
        .set(&keys::tracked(wallet_id, &position.id), &tracked)
        .await?;
    store.sadd(&keys::tracked_set(wallet_id), &position.id).await?;
    store.sadd(keys::TRACKED_WALLETS, wallet_id).await?;
    Ok(())
}

pub async fn untrack(store: &Store, wallet_id: &str, position_id: &str) -> Result<()> {
    store.srem(&keys::tracked_set(wallet_id), position_id).await?;
    store.del(&keys::tracked(wallet_id, position_id)).await?;
    Ok(())
}

pub struct Monitor {
    ctx: Arc<AppContext>,
}

impl Monitor {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }

    /// Run the cooperative loop until the process stops
    pub async fn run(&self) -> Result<()> {
        let interval = Duration::from_secs(self.ctx.config.monitor.check_interval_secs);
        info!("monitor starting with {:?} tick", interval);

        let mut state: WorkerState = self
            .ctx
            .store
            .get(keys::WORKER_STATE)
            .await?
            .unwrap_or_default();
        state.running = true;
        state.started_at = Some(Utc::now());
        self.ctx.store.set(keys::WORKER_STATE, &state).await?;

        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if let Err(e) = self.tick().await {
                error!("monitor tick failed: {}", e);
            }
        }
    }

    /// One full pass: tracked positions, then due schedules
    pub async fn tick(&self) -> Result<WorkerState> {
        let started = Utc::now();
        let mut errors = 0u64;

        if let Err(e) = self.check_tracked_positions().await {
            warn!("tracked-position scan failed: {}", e);
            errors += 1;
        }
        if let Err(e) = self.run_due_schedules().await {
            warn!("schedule scan failed: {}", e);
            errors += 1;
        }

        let mut state: WorkerState = self
            .ctx
            .store
            .get(keys::WORKER_STATE)
            .await?
            .unwrap_or_default();
        state.running = true;
        state.last_check = Some(started);
        state.checks_completed += 1;
        state.errors += errors;
        self.ctx.store.set(keys::WORKER_STATE, &state).await?;

        self.log("info", format!("tick completed with {} errors", errors))
            .await;
        Ok(state)
    }

    async fn check_tracked_positions(&self) -> Result<()> {
        let wallets = self.ctx.store.smembers(keys::TRACKED_WALLETS).await?;
        for wallet_id in wallets {
            let position_ids = self
                .ctx
                .store
                .smembers(&keys::tracked_set(&wallet_id))
                .await?;
            for position_id in position_ids {
                if let Err(e) = self.check_one(&wallet_id, &position_id).await {
                    warn!(
                        "check failed for {} position {}: {}",
                        wallet_id, position_id, e
                    );
                    self.log(
                        "warn",
                        format!("check failed for {}: {}", position_id, e),
                    )
                    .await;
                }
            }
        }
        Ok(())
    }

    async fn check_one(&self, wallet_id: &str, position_id: &str) -> Result<()> {
        let key = keys::tracked(wallet_id, position_id);
        let Some(mut tracked) = self.ctx.store.get::<TrackedPosition>(&key).await? else {
            // Unreachable set entry; clean it up
            self.ctx
                .store
                .srem(&keys::tracked_set(wallet_id), position_id)
                .await?;
            return Ok(());
        };

        let pool = self
            .ctx
            .pools
            .describe(tracked.venue, &tracked.pool)
            .await?;
        let in_range = tracked.contains_index(pool.active_index);
        let was_in_range = tracked.last_in_range;

        tracked.last_checked = Utc::now();
        tracked.last_in_range = in_range;
        if in_range {
            tracked.out_of_range_since = None;
        } else if tracked.out_of_range_since.is_none() {
            tracked.out_of_range_since = Some(Utc::now());
        }
        self.ctx.store.set(&key, &tracked).await?;

        match (was_in_range, in_range) {
            (true, false) => {
                let drift = tracked.drift_units(pool.active_index, pool.granularity);
                info!(
                    "position {} left range (drift {} units)",
                    position_id, drift
                );
                self.handle_out_of_range(wallet_id, &tracked, drift).await;
            }
            (false, true) => {
                debug!("position {} back in range", position_id);
                let mut event = Event::new(
                    EventKind::BackInRange,
                    wallet_id,
                    format!(
                        "Pool index returned to [{}, {}]",
                        tracked.lower_index, tracked.upper_index
                    ),
                );
                event.position_id = Some(position_id.to_string());
                event.pool = Some(tracked.pool.clone());
                let _ = self.ctx.notifier.notify(&event).await;
            }
            _ => {}
        }
        Ok(())
    }

    async fn handle_out_of_range(
        &self,
        wallet_id: &str,
        tracked: &TrackedPosition,
        drift_units: u32,
    ) {
        let position = Position {
            id: tracked.position_id.clone(),
            wallet: wallet_id.to_string(),
            pool: tracked.pool.clone(),
            venue: tracked.venue,
            lower_index: tracked.lower_index,
            upper_index: tracked.upper_index,
            lower_price: 0.0,
            upper_price: 0.0,
            liquidity: 0,
            amount_a: 0,
            amount_b: 0,
            fee_a: 0,
            fee_b: 0,
            fee_a_ui: 0.0,
            fee_b_ui: 0.0,
            in_range: false,
        };
        let event = pipeline::out_of_range_event(&position, drift_units);
        let _ = self.ctx.notifier.notify(&event).await;

        // Auto-rebalance when opted in and drift clears the threshold
        let recipient = match self.ctx.notifier.recipient(wallet_id).await {
            Ok(Some(recipient)) => recipient,
            _ => return,
        };
        if !recipient.preferences.auto_rebalance {
            return;
        }
        let threshold_units = recipient.preferences.rebalance_drift_bps / 100;
        if drift_units < threshold_units.max(1) {
            debug!(
                "drift {} below threshold {} units, not rebalancing",
                drift_units, threshold_units
            );
            return;
        }

        info!("auto-rebalancing {} for {}", tracked.position_id, wallet_id);
        match pipeline::rebalance(
            &self.ctx,
            wallet_id,
            &tracked.position_id,
            TipUrgency::Fast,
        )
        .await
        {
            Ok(receipt) => {
                // The old shadow is replaced by the fresh position
                let _ = untrack(&self.ctx.store, wallet_id, &tracked.position_id).await;
                if let Some(new_id) = &receipt.position_id {
                    if let Ok(profile) = self.ctx.wallets.load(wallet_id).await {
                        if let Ok(position) =
                            self.ctx.indexer.find(&profile.address, new_id).await
                        {
                            let _ = track(&self.ctx.store, wallet_id, &position).await;
                        }
                    }
                }
                self.log(
                    "info",
                    format!("auto-rebalanced {}", tracked.position_id),
                )
                .await;
            }
            Err(e) => {
                warn!("auto-rebalance failed for {}: {}", tracked.position_id, e);
                self.log(
                    "warn",
                    format!("auto-rebalance failed for {}: {}", tracked.position_id, e),
                )
                .await;
            }
        }
    }

    async fn run_due_schedules(&self) -> Result<()> {
        let due = dca::due_schedules(&self.ctx.store).await?;
        for schedule in due {
            info!(
                "executing schedule {} ({} lamports into {})",
                schedule.id, schedule.amount_per_tick, schedule.pool
            );
            let strategy = Strategy {
                venue: schedule.venue,
                pool: schedule.pool.clone(),
                collateral_mint: crate::pools::tokens::WSOL_MINT.to_string(),
                collateral_amount: schedule.amount_per_tick,
                shape: schedule.shape,
                distribution: Default::default(),
                slippage_bps: pipeline::SLIPPAGE_LADDER[0],
                urgency: TipUrgency::Fast,
            };

            match pipeline::atomic_open(&self.ctx, &schedule.wallet, strategy, SubmitMode::Bundle)
                .await
            {
                Ok(receipt) => {
                    dca::record_success(
                        &self.ctx.store,
                        &schedule,
                        receipt.outcome.bundle_id.clone(),
                    )
                    .await?;
                    let mut event = Event::new(
                        EventKind::DcaExecuted,
                        &schedule.wallet,
                        format!(
                            "Deposited {} lamports into {} ({} of {})",
                            schedule.amount_per_tick,
                            schedule.pool,
                            schedule.executions + 1,
                            schedule.max_executions
                        ),
                    );
                    event.position_id = receipt.position_id.clone();
                    event.pool = Some(schedule.pool.clone());
                    let _ = self.ctx.notifier.notify(&event).await;

                    // New position joins the monitoring set
                    if let Some(position_id) = &receipt.position_id {
                        if let Ok(profile) = self.ctx.wallets.load(&schedule.wallet).await {
                            if let Ok(position) =
                                self.ctx.indexer.find(&profile.address, position_id).await
                            {
                                let _ =
                                    track(&self.ctx.store, &schedule.wallet, &position).await;
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!("schedule {} failed: {}", schedule.id, e);
                    let updated = dca::record_failure(&self.ctx.store, &schedule, &e).await?;
                    if updated.status == crate::types::ScheduleStatus::Failed {
                        let event = Event::new(
                            EventKind::DcaFailed,
                            &schedule.wallet,
                            format!("Schedule {} disabled: {}", schedule.id, e),
                        );
                        let _ = self.ctx.notifier.notify(&event).await;
                    }
                }
            }
        }
        Ok(())
    }

    async fn log(&self, level: &str, message: String) {
        let entry = LogEntry {
            at: Utc::now(),
            level: level.to_string(),
            message,
        };
        let capacity = self.ctx.config.monitor.log_capacity;
        if let Err(e) = self.ctx.store.list_push(keys::WORKER_LOGS, &entry).await {
            debug!("worker log write failed: {}", e);
            return;
        }
        let _ = self.ctx.store.list_trim(keys::WORKER_LOGS, capacity).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Venue;

    fn position(in_range: bool) -> Position {
        Position {
            id: "pos1".into(),
            wallet: "addr1".into(),
            pool: "pool1".into(),
            venue: Venue::Dlmm,
            lower_index: 4950,
            upper_index: 5050,
            lower_price: 0.0,
            upper_price: 0.0,
            liquidity: 10,
            amount_a: 0,
            amount_b: 0,
            fee_a: 0,
            fee_b: 0,
            fee_a_ui: 0.0,
            fee_b_ui: 0.0,
            in_range,
        }
    }

    #[tokio::test]
    async fn test_track_untrack_roundtrip() {
        let store = Store::memory();
        track(&store, "w1", &position(true)).await.unwrap();

        assert_eq!(store.smembers(keys::TRACKED_WALLETS).await.unwrap(), vec!["w1"]);
        assert_eq!(
            store.smembers(&keys::tracked_set("w1")).await.unwrap(),
            vec!["pos1"]
        );
        let tracked: TrackedPosition = store
            .get(&keys::tracked("w1", "pos1"))
            .await
            .unwrap()
            .unwrap();
        assert!(tracked.last_in_range);
        assert_eq!(tracked.lower_index, 4950);
        assert!(tracked.out_of_range_since.is_none());

        untrack(&store, "w1", "pos1").await.unwrap();
        assert!(store
            .smembers(&keys::tracked_set("w1"))
            .await
            .unwrap()
            .is_empty());
        assert!(store
            .get::<TrackedPosition>(&keys::tracked("w1", "pos1"))
            .await
            .unwrap()
            .is_none());
    }
}
