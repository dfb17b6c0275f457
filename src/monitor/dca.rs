//! DCA schedule management
//!
//! Schedules live in the store as a hash keyed by id plus an ACTIVE-id
//! set the monitor scans. Writes go value-first, set-membership second,
//! so a crash between the two leaves an unreachable record rather than a
//! dangling membership.

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::store::{keys, Store};
use crate::types::{RangeShape, Schedule, ScheduleStatus, Venue};

/// Entries kept per schedule history list
const HISTORY_CAP: usize = 100;

/// One execution attempt in a schedule's history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub at: chrono::DateTime<Utc>,
    pub success: bool,
    pub amount: u64,
    pub error: Option<String>,
    pub bundle_id: Option<String>,
}

/// Parameters for a new schedule
#[derive(Debug, Clone, Deserialize)]
pub struct CreateSchedule {
    pub wallet: String,
    pub pool: String,
    pub venue: Venue,
    pub amount_per_tick: u64,
    pub total_budget: u64,
    pub interval_secs: u64,
    pub max_executions: u32,
    pub shape: RangeShape,
}

pub async fn create(store: &Store, params: CreateSchedule) -> Result<Schedule> {
    if params.amount_per_tick == 0 || params.total_budget < params.amount_per_tick {
        return Err(Error::Validation(
            "amount_per_tick must be positive and within the budget".into(),
        ));
    }
    if params.interval_secs < 60 {
        return Err(Error::Validation("interval must be at least 60s".into()));
    }
    if params.max_executions == 0 {
        return Err(Error::Validation("max_executions must be positive".into()));
    }

    let schedule = Schedule {
        id: Uuid::new_v4().to_string(),
        wallet: params.wallet,
        pool: params.pool,
        venue: params.venue,
        amount_per_tick: params.amount_per_tick,
        total_budget: params.total_budget,
        spent: 0,
        interval_secs: params.interval_secs,
        // First execution on the next monitor tick
        next_tick: Utc::now(),
        executions: 0,
        max_executions: params.max_executions,
        shape: params.shape,
        status: ScheduleStatus::Active,
        last_error: None,
    };

    store
        .hset(keys::DCA_SCHEDULES, &schedule.id, &schedule)
        .await?;
    store.sadd(keys::DCA_ACTIVE, &schedule.id).await?;
    info!("created schedule {} for {}", schedule.id, schedule.wallet);
    Ok(schedule)
}

pub async fn get(store: &Store, id: &str) -> Result<Schedule> {
    store
        .hget(keys::DCA_SCHEDULES, id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("schedule {}", id)))
}

/// A wallet's schedules; cancelled ones drop out of the listing but
/// keep their history
pub async fn list_by_wallet(store: &Store, wallet: &str) -> Result<Vec<Schedule>> {
    let all: Vec<(String, Schedule)> = store.hgetall(keys::DCA_SCHEDULES).await?;
    Ok(all
        .into_iter()
        .map(|(_, schedule)| schedule)
        .filter(|s| s.wallet == wallet && s.status != ScheduleStatus::Cancelled)
        .collect())
}

/// ACTIVE schedules whose next tick has passed
pub async fn due_schedules(store: &Store) -> Result<Vec<Schedule>> {
    let now = Utc::now();
    let ids = store.smembers(keys::DCA_ACTIVE).await?;
    let mut due = Vec::new();
    for id in ids {
        if let Some(schedule) = store.hget::<Schedule>(keys::DCA_SCHEDULES, &id).await? {
            if schedule.is_due(now) {
                due.push(schedule);
            }
        }
    }
    Ok(due)
}

pub async fn pause(store: &Store, id: &str) -> Result<Schedule> {
    let mut schedule = get(store, id).await?;
    if schedule.status != ScheduleStatus::Active {
        return Err(Error::Validation(format!(
            "schedule {} is not active",
            id
        )));
    }
    schedule.status = ScheduleStatus::Paused;
    store.hset(keys::DCA_SCHEDULES, id, &schedule).await?;
    store.srem(keys::DCA_ACTIVE, id).await?;
    Ok(schedule)
}

pub async fn resume(store: &Store, id: &str) -> Result<Schedule> {
    let mut schedule = get(store, id).await?;
    if schedule.status != ScheduleStatus::Paused {
        return Err(Error::Validation(format!(
            "schedule {} is not paused",
            id
        )));
    }
    schedule.status = ScheduleStatus::Active;
    schedule.next_tick = Utc::now();
    store.hset(keys::DCA_SCHEDULES, id, &schedule).await?;
    store.sadd(keys::DCA_ACTIVE, id).await?;
    Ok(schedule)
}

pub async fn cancel(store: &Store, id: &str) -> Result<Schedule> {
    let mut schedule = get(store, id).await?;
    if matches!(
        schedule.status,
        ScheduleStatus::Complete | ScheduleStatus::Cancelled
    ) {
        return Err(Error::Validation(format!(
            "schedule {} already terminal",
            id
        )));
    }
    schedule.status = ScheduleStatus::Cancelled;
    store.hset(keys::DCA_SCHEDULES, id, &schedule).await?;
    store.srem(keys::DCA_ACTIVE, id).await?;
    Ok(schedule)
}

pub async fn history(store: &Store, id: &str) -> Result<Vec<HistoryEntry>> {
    store
        .list_range(&keys::dca_history(id), 0, HISTORY_CAP - 1)
        .await
}

/// Progress a schedule after a successful execution
pub async fn record_success(
    store: &Store,
    schedule: &Schedule,
    bundle_id: Option<String>,
) -> Result<Schedule> {
    let mut updated = schedule.clone();
    updated.spent += updated.amount_per_tick;
    updated.executions += 1;
    updated.next_tick = Utc::now() + Duration::seconds(updated.interval_secs as i64);
    updated.last_error = None;
    if updated.is_exhausted() {
        updated.status = ScheduleStatus::Complete;
    }

    store.hset(keys::DCA_SCHEDULES, &updated.id, &updated).await?;
    if updated.status == ScheduleStatus::Complete {
        store.srem(keys::DCA_ACTIVE, &updated.id).await?;
    }
    push_history(
        store,
        &updated.id,
        HistoryEntry {
            at: Utc::now(),
            success: true,
            amount: schedule.amount_per_tick,
            error: None,
            bundle_id,
        },
    )
    .await?;
    Ok(updated)
}

/// Record a failed execution. Retryable errors leave the schedule
/// ACTIVE for the next cycle; a repeated non-retryable sentinel (the
/// second consecutive hit) transitions it to FAILED.
pub async fn record_failure(
    store: &Store,
    schedule: &Schedule,
    error: &Error,
) -> Result<Schedule> {
    let code = error.code();
    let mut updated = schedule.clone();
    let repeated_fatal = !error.is_retryable()
        && schedule
            .last_error
            .as_deref()
            .map(|prev| prev.starts_with(code))
            .unwrap_or(false);

    updated.last_error = Some(format!("{}: {}", code, error));
    updated.next_tick = Utc::now() + Duration::seconds(updated.interval_secs as i64);
    if repeated_fatal {
        updated.status = ScheduleStatus::Failed;
    }

    store.hset(keys::DCA_SCHEDULES, &updated.id, &updated).await?;
    if updated.status == ScheduleStatus::Failed {
        store.srem(keys::DCA_ACTIVE, &updated.id).await?;
    }
    push_history(
        store,
        &updated.id,
        HistoryEntry {
            at: Utc::now(),
            success: false,
            amount: schedule.amount_per_tick,
            error: Some(updated.last_error.clone().unwrap_or_default()),
            bundle_id: None,
        },
    )
    .await?;
    Ok(updated)
}

async fn push_history(store: &Store, id: &str, entry: HistoryEntry) -> Result<()> {
    let key = keys::dca_history(id);
    store.list_push(&key, &entry).await?;
    store.list_trim(&key, HISTORY_CAP).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> CreateSchedule {
        CreateSchedule {
            wallet: "w1".into(),
            pool: "pool".into(),
            venue: Venue::Dlmm,
            amount_per_tick: 100_000_000,
            total_budget: 1_000_000_000,
            interval_secs: 86_400,
            max_executions: 10,
            shape: RangeShape::Concentrated,
        }
    }

    #[tokio::test]
    async fn test_create_and_list() {
        let store = Store::memory();
        let schedule = create(&store, params()).await.unwrap();
        assert_eq!(schedule.status, ScheduleStatus::Active);
        assert_eq!(schedule.spent, 0);

        let listed = list_by_wallet(&store, "w1").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(list_by_wallet(&store, "other").await.unwrap().is_empty());
        assert_eq!(store.smembers(keys::DCA_ACTIVE).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_create_validates() {
        let store = Store::memory();
        let mut bad = params();
        bad.amount_per_tick = 0;
        assert!(create(&store, bad).await.is_err());

        let mut bad = params();
        bad.total_budget = 1;
        assert!(create(&store, bad).await.is_err());

        let mut bad = params();
        bad.interval_secs = 5;
        assert!(create(&store, bad).await.is_err());
    }

    #[tokio::test]
    async fn test_success_progression() {
        let store = Store::memory();
        let schedule = {
            let mut s = create(&store, params()).await.unwrap();
            s.spent = 300_000_000;
            s.executions = 3;
            store.hset(keys::DCA_SCHEDULES, &s.id, &s).await.unwrap();
            s
        };

        let before = Utc::now();
        let updated = record_success(&store, &schedule, Some("bundle1".into()))
            .await
            .unwrap();
        assert_eq!(updated.spent, 400_000_000);
        assert_eq!(updated.executions, 4);
        assert_eq!(updated.status, ScheduleStatus::Active);
        // next-tick lands one interval in the future
        assert!(updated.next_tick > before + Duration::seconds(86_000));

        let entries = history(&store, &updated.id).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].success);
    }

    #[tokio::test]
    async fn test_completes_at_budget() {
        let store = Store::memory();
        let schedule = {
            let mut s = create(&store, params()).await.unwrap();
            s.spent = 900_000_000;
            s.executions = 9;
            store.hset(keys::DCA_SCHEDULES, &s.id, &s).await.unwrap();
            s
        };
        let updated = record_success(&store, &schedule, None).await.unwrap();
        assert_eq!(updated.status, ScheduleStatus::Complete);
        assert!(store.smembers(keys::DCA_ACTIVE).await.unwrap().is_empty());
        // Invariant: spent never exceeds budget
        assert!(updated.spent <= updated.total_budget);
    }

    #[tokio::test]
    async fn test_fatal_error_needs_two_hits() {
        let store = Store::memory();
        let schedule = create(&store, params()).await.unwrap();
        let error = Error::InsufficientFunds("0.05 SOL short".into());

        let first = record_failure(&store, &schedule, &error).await.unwrap();
        assert_eq!(first.status, ScheduleStatus::Active);
        assert!(first.last_error.as_deref().unwrap().starts_with("INSUFFICIENT_FUNDS"));

        let second = record_failure(&store, &first, &error).await.unwrap();
        assert_eq!(second.status, ScheduleStatus::Failed);
        assert!(store.smembers(keys::DCA_ACTIVE).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_retryable_error_stays_active() {
        let store = Store::memory();
        let schedule = create(&store, params()).await.unwrap();
        let error = Error::VenueUnavailable("down".into());
        let mut current = schedule;
        for _ in 0..3 {
            current = record_failure(&store, &current, &error).await.unwrap();
            assert_eq!(current.status, ScheduleStatus::Active);
        }
    }

    #[tokio::test]
    async fn test_pause_resume_cancel_lifecycle() {
        let store = Store::memory();
        let schedule = create(&store, params()).await.unwrap();

        let paused = pause(&store, &schedule.id).await.unwrap();
        assert_eq!(paused.status, ScheduleStatus::Paused);
        assert!(store.smembers(keys::DCA_ACTIVE).await.unwrap().is_empty());
        // Pausing twice is a validation error
        assert!(pause(&store, &schedule.id).await.is_err());

        let resumed = resume(&store, &schedule.id).await.unwrap();
        assert_eq!(resumed.status, ScheduleStatus::Active);

        // list -> cancel -> list removes exactly one id
        let before = list_by_wallet(&store, "w1").await.unwrap();
        cancel(&store, &schedule.id).await.unwrap();
        let after = list_by_wallet(&store, "w1").await.unwrap();
        assert_eq!(after.len(), before.len() - 1);
        // The record itself survives with its terminal status
        let cancelled = get(&store, &schedule.id).await.unwrap();
        assert_eq!(cancelled.status, ScheduleStatus::Cancelled);
        assert!(store.smembers(keys::DCA_ACTIVE).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_due_schedules() {
        let store = Store::memory();
        let schedule = create(&store, params()).await.unwrap();
        // Fresh schedule is due immediately
        let due = due_schedules(&store).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, schedule.id);

        record_success(&store, &schedule, None).await.unwrap();
        assert!(due_schedules(&store).await.unwrap().is_empty());
    }
}
