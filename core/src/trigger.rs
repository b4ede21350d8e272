//! Time triggers and the clock loop that fires them.
//!
//! Interval triggers first fire one period after registration, then every period after
//! the previous *scheduled* fire. If the loop falls behind, missed periods are skipped
//! rather than replayed. Calendar triggers always compute the next matching local
//! minute strictly after "now", so downtime is never backfilled and each match fires once.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Datelike, Days, Local, NaiveTime, TimeDelta, TimeZone};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::instrument::Handler;
use crate::job::{Event, Trigger};
use crate::runtime::{Module, ModuleCtx};

/// First fire time strictly after `after`.
pub fn next_fire<Tz: TimeZone>(trigger: &Trigger, after: &DateTime<Tz>) -> Option<DateTime<Tz>> {
    match trigger {
        Trigger::Interval { period_secs } => {
            let period = period(*period_secs)?;
            after.clone().checked_add_signed(period)
        }
        Trigger::Calendar { day_of_week, hour, minute } => {
            let at = NaiveTime::from_hms_opt(*hour, *minute, 0)?;
            let today = after.date_naive();
            // Eight days covers "later today" through "same weekday next week".
            for offset in 0..=7 {
                let date = today.checked_add_days(Days::new(offset))?;
                if day_of_week.is_some_and(|d| date.weekday() != d) {
                    continue;
                }
                // Local times skipped by a DST jump have no instant; try the next day.
                let Some(candidate) = after.timezone().from_local_datetime(&date.and_time(at)).earliest()
                else {
                    continue;
                };
                if candidate > *after {
                    return Some(candidate);
                }
            }
            None
        }
    }
}

/// Next fire after a trigger that was scheduled for `scheduled` fired at `now`.
fn reschedule<Tz: TimeZone>(
    trigger: &Trigger,
    scheduled: &DateTime<Tz>,
    now: &DateTime<Tz>,
) -> Option<DateTime<Tz>> {
    match trigger {
        Trigger::Interval { period_secs } => {
            let period = period(*period_secs)?;
            let mut next = scheduled.clone().checked_add_signed(period)?;
            if next <= *now {
                let behind = now.clone().signed_duration_since(next.clone());
                let skipped = behind.num_milliseconds() / period.num_milliseconds() + 1;
                next = next.checked_add_signed(period.checked_mul(i32::try_from(skipped).ok()?)?)?;
            }
            Some(next)
        }
        Trigger::Calendar { .. } => next_fire(trigger, now),
    }
}

fn period(period_secs: u64) -> Option<TimeDelta> {
    if period_secs == 0 {
        return None;
    }
    TimeDelta::try_seconds(i64::try_from(period_secs).ok()?)
}

struct Entry {
    trigger: Trigger,
    handler: Handler,
    next: DateTime<Local>,
}

/// Registered triggers keyed by unique id, plus the clock resolution.
pub struct TriggerEngine {
    tick: Duration,
    entries: BTreeMap<String, Entry>,
}

impl TriggerEngine {
    /// Engine whose clock loop wakes every `tick`.
    pub fn new(tick: Duration) -> Self {
        Self { tick: tick.max(Duration::from_millis(1)), entries: BTreeMap::new() }
    }

    /// Register `handler` under `id`. Duplicate ids and unfireable triggers are rejected.
    pub fn add(&mut self, id: impl Into<String>, trigger: Trigger, handler: Handler) -> Result<()> {
        self.add_at(id.into(), trigger, handler, Local::now())
    }

    fn add_at(&mut self, id: String, trigger: Trigger, handler: Handler, now: DateTime<Local>) -> Result<()> {
        if self.entries.contains_key(&id) {
            return Err(Error::DuplicateTrigger { id });
        }
        if let Err(reason) = trigger.validate() {
            return Err(Error::InvalidTrigger { id, reason });
        }
        let Some(next) = next_fire(&trigger, &now) else {
            return Err(Error::InvalidTrigger { id, reason: "no future fire time".to_string() });
        };
        info!(id = %id, key = %handler.info().key, next = %next.to_rfc3339(), "trigger registered");
        self.entries.insert(id, Entry { trigger, handler, next });
        Ok(())
    }

    /// Number of registered triggers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[cfg(test)]
    fn next_fire_of(&self, id: &str) -> Option<DateTime<Local>> {
        self.entries.get(id).map(|e| e.next)
    }

    /// Spawn every trigger due at `now` and move it to its next fire time.
    /// Does not wait for earlier executions of the same trigger.
    pub fn fire_due(&mut self, now: DateTime<Local>) -> Vec<String> {
        let mut fired = Vec::new();
        let mut exhausted = Vec::new();
        for (id, entry) in &mut self.entries {
            if entry.next > now {
                continue;
            }
            entry.handler.spawn(Event::Tick { trigger_id: id.clone() });
            match reschedule(&entry.trigger, &entry.next, &now) {
                Some(next) => entry.next = next,
                None => exhausted.push(id.clone()),
            }
            fired.push(id.clone());
        }
        for id in exhausted {
            warn!(id = %id, "trigger has no further fire time, removing");
            self.entries.remove(&id);
        }
        fired
    }
}

impl Module for TriggerEngine {
    fn name(&self) -> &'static str { "triggers" }

    fn spawn(mut self: Box<Self>, mut ctx: ModuleCtx) -> JoinHandle<anyhow::Result<()>> {
        tokio::spawn(async move {
            let mut tick = interval(self.tick);
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(triggers = self.entries.len(), "trigger engine started");
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        let fired = self.fire_due(Local::now());
                        if !fired.is_empty() {
                            debug!(?fired, "triggers fired");
                        }
                    }
                    changed = ctx.shutdown.changed() => {
                        if changed.is_err() || *ctx.shutdown.borrow() {
                            info!("trigger engine stopping");
                            break;
                        }
                    }
                }
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::JobRunner;
    use crate::job::JobInfo;
    use crate::store::MemoryCounterStore;
    use chrono::{Timelike, Utc, Weekday};
    use std::sync::Arc;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn counting(store: &Arc<MemoryCounterStore>, key: &str, sleep: Duration) -> Handler {
        Handler::new(JobInfo::new(key, "test job"), JobRunner::new(store.clone()), move |_| async move {
            tokio::time::sleep(sleep).await;
            Ok(())
        })
    }

    async fn wait_for_runs(store: &MemoryCounterStore, key: &str, runs: u64) {
        for _ in 0..500 {
            if store.get(key).map_or(0, |r| r.runs) >= runs {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("{key} never reached {runs} runs");
    }

    #[test]
    fn interval_first_fire_is_one_period_out() {
        let now = utc("2024-02-01T10:00:00Z");
        let next = next_fire(&Trigger::Interval { period_secs: 300 }, &now).unwrap();
        assert_eq!(next, utc("2024-02-01T10:05:00Z"));
    }

    #[test]
    fn interval_skips_missed_periods() {
        let t = Trigger::Interval { period_secs: 60 };
        let scheduled = utc("2024-02-01T10:01:00Z");
        assert_eq!(
            reschedule(&t, &scheduled, &utc("2024-02-01T10:01:00.200Z")).unwrap(),
            utc("2024-02-01T10:02:00Z")
        );
        // Woke up 3.5 periods late: one fire, next slot still on the registration grid.
        assert_eq!(
            reschedule(&t, &scheduled, &utc("2024-02-01T10:04:30Z")).unwrap(),
            utc("2024-02-01T10:05:00Z")
        );
        assert_eq!(
            reschedule(&t, &scheduled, &utc("2024-02-01T10:05:00Z")).unwrap(),
            utc("2024-02-01T10:06:00Z")
        );
    }

    #[test]
    fn daily_calendar_later_today_or_tomorrow() {
        let t = Trigger::Calendar { day_of_week: None, hour: 4, minute: 30 };
        assert_eq!(next_fire(&t, &utc("2024-02-01T01:00:00Z")).unwrap(), utc("2024-02-01T04:30:00Z"));
        assert_eq!(next_fire(&t, &utc("2024-02-01T04:30:00Z")).unwrap(), utc("2024-02-02T04:30:00Z"));
        assert_eq!(next_fire(&t, &utc("2024-02-01T23:59:59Z")).unwrap(), utc("2024-02-02T04:30:00Z"));
    }

    #[test]
    fn weekly_calendar_matches_weekday() {
        // 2024-02-01 is a Thursday.
        let t = Trigger::Calendar { day_of_week: Some(Weekday::Mon), hour: 2, minute: 0 };
        let next = next_fire(&t, &utc("2024-02-01T12:00:00Z")).unwrap();
        assert_eq!(next, utc("2024-02-05T02:00:00Z"));
        assert_eq!(next.weekday(), Weekday::Mon);
        // Just past this Monday's slot: a full week out.
        assert_eq!(next_fire(&t, &utc("2024-02-05T02:00:01Z")).unwrap(), utc("2024-02-12T02:00:00Z"));
    }

    #[test]
    fn calendar_does_not_backfill() {
        let t = Trigger::Calendar { day_of_week: None, hour: 0, minute: 0 };
        // Process was down across several midnights; only the next one counts.
        let scheduled = utc("2024-02-01T00:00:00Z");
        let next = reschedule(&t, &scheduled, &utc("2024-02-04T09:00:00Z")).unwrap();
        assert_eq!(next, utc("2024-02-05T00:00:00Z"));
        assert_eq!((next.hour(), next.minute()), (0, 0));
    }

    #[tokio::test]
    async fn duplicate_id_is_rejected() {
        let store = Arc::new(MemoryCounterStore::new());
        let mut engine = TriggerEngine::new(Duration::from_millis(10));
        let t = Trigger::Interval { period_secs: 60 };
        engine.add("ping", t.clone(), counting(&store, "a", Duration::ZERO)).unwrap();
        let err = engine.add("ping", t, counting(&store, "b", Duration::ZERO)).unwrap_err();
        assert!(matches!(err, Error::DuplicateTrigger { ref id } if id == "ping"));
        assert_eq!(engine.len(), 1);
    }

    #[tokio::test]
    async fn invalid_trigger_is_rejected() {
        let store = Arc::new(MemoryCounterStore::new());
        let mut engine = TriggerEngine::new(Duration::from_millis(10));
        let err = engine
            .add("bad", Trigger::Interval { period_secs: 0 }, counting(&store, "a", Duration::ZERO))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTrigger { .. }));
        assert!(engine.is_empty());
    }

    #[tokio::test]
    async fn due_trigger_fires_once_per_slot() {
        let store = Arc::new(MemoryCounterStore::new());
        let mut engine = TriggerEngine::new(Duration::from_millis(10));
        let now = Local::now();
        engine
            .add_at("t".into(), Trigger::Interval { period_secs: 60 }, counting(&store, "k", Duration::ZERO), now)
            .unwrap();

        assert!(engine.fire_due(now).is_empty());
        let due = now + TimeDelta::try_seconds(60).unwrap();
        assert_eq!(engine.fire_due(due), vec!["t".to_string()]);
        assert!(engine.fire_due(due).is_empty());
        assert_eq!(engine.next_fire_of("t").unwrap(), now + TimeDelta::try_seconds(120).unwrap());

        wait_for_runs(&store, "k", 1).await;
        assert_eq!(store.get("k").unwrap().runs, 1);
    }

    #[tokio::test]
    async fn slow_job_overlaps_itself() {
        let store = Arc::new(MemoryCounterStore::new());
        let mut engine = TriggerEngine::new(Duration::from_millis(10));
        let now = Local::now();
        engine
            .add_at(
                "slow".into(),
                Trigger::Interval { period_secs: 1 },
                counting(&store, "slow", Duration::from_millis(200)),
                now,
            )
            .unwrap();
        engine.fire_due(now + TimeDelta::try_seconds(1).unwrap());
        engine.fire_due(now + TimeDelta::try_seconds(2).unwrap());
        wait_for_runs(&store, "slow", 2).await;
        assert_eq!(store.get("slow").unwrap().errors, 0);
    }

    #[tokio::test]
    async fn clock_loop_stops_on_shutdown() {
        let store = Arc::new(MemoryCounterStore::new());
        let mut engine = TriggerEngine::new(Duration::from_millis(5));
        engine
            .add("fast", Trigger::Interval { period_secs: 1 }, counting(&store, "fast", Duration::ZERO))
            .unwrap();
        let (tx, rx) = tokio::sync::watch::channel(false);
        let handle = Box::new(engine).spawn(ModuleCtx { shutdown: rx });

        wait_for_runs(&store, "fast", 1).await;
        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
    }
}
