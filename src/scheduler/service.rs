//! Scheduler service — recurring jobs plus durable one-time reconciliation.
//!
//! A single control task ticks on a fixed cadence. Each tick first fires due
//! recurring jobs, then reconciles the durable one-time store. Task
//! execution is synchronous within a tick: a slow handler delays later due
//! tasks of the same tick, but scheduling decisions stay single-threaded and
//! nothing is dispatched twice.

use anyhow::Result;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::scheduler::store::TaskStore;
use crate::scheduler::types::{RawScheduleRecord, RecurringJobDef, ScheduleSpec};
use crate::tasks::{TaskOutcome, TaskRegistry};

/// A materialized recurring job with its computed next fire instant.
#[derive(Debug, Clone)]
pub struct LiveJob {
    pub def: RecurringJobDef,
    pub next_fire: DateTime<Utc>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct TickReport {
    pub recurring_fired: usize,
    pub onetime_executed: usize,
    pub onetime_dropped: usize,
}

pub struct Scheduler {
    registry: Arc<TaskRegistry>,
    store: Arc<dyn TaskStore>,
    static_source: PathBuf,
    generated_source: PathBuf,
    tz: Tz,
    jobs: Vec<LiveJob>,
}

impl Scheduler {
    pub fn new(
        registry: Arc<TaskRegistry>,
        store: Arc<dyn TaskStore>,
        static_source: &Path,
        generated_source: &Path,
        tz: Tz,
    ) -> Self {
        Self {
            registry,
            store,
            static_source: static_source.to_path_buf(),
            generated_source: generated_source.to_path_buf(),
            tz,
            jobs: Vec::new(),
        }
    }

    pub fn jobs(&self) -> &[LiveJob] {
        &self.jobs
    }

    /// Clear all live recurring jobs and re-materialize them from the two
    /// declarative sources, static first. Callable at any time; never
    /// touches the one-time store. A missing, empty or unreadable source
    /// contributes zero jobs.
    pub fn reload_all(&mut self, now: DateTime<Utc>) -> usize {
        self.jobs.clear();
        let sources = [self.static_source.clone(), self.generated_source.clone()];
        for source in &sources {
            for record in load_source(source) {
                self.materialize(source, record, now);
            }
        }
        info!(job_count = self.jobs.len(), "Recurring jobs loaded");
        self.jobs.len()
    }

    fn materialize(&mut self, source: &Path, record: RawScheduleRecord, now: DateTime<Utc>) {
        if !self.registry.contains(&record.task_name) {
            warn!(
                source = %source.display(),
                task_name = %record.task_name,
                "Skipping schedule for unknown task"
            );
            return;
        }
        let schedule = match ScheduleSpec::try_from(&record.schedule) {
            Ok(s) => s,
            Err(e) => {
                warn!(
                    source = %source.display(),
                    task_name = %record.task_name,
                    error = %e,
                    "Skipping invalid schedule"
                );
                return;
            }
        };
        let Some(next_fire) = schedule.next_after(now, self.tz) else {
            warn!(
                source = %source.display(),
                task_name = %record.task_name,
                "Schedule has no future fire time, skipping"
            );
            return;
        };
        self.jobs.push(LiveJob {
            def: RecurringJobDef {
                task_name: record.task_name,
                schedule,
                task_args: record.task_args,
            },
            next_fire,
        });
    }

    /// One scheduling pass. Idempotent for a fixed `now`: a job fires once
    /// and advances past `now`; a due one-time record is removed in the same
    /// pass it executes in.
    pub async fn tick(&mut self, now: DateTime<Utc>) -> TickReport {
        let mut report = TickReport::default();
        report.recurring_fired = self.run_due_jobs(now).await;
        let (executed, dropped) = self.reconcile_onetime(now).await;
        report.onetime_executed = executed;
        report.onetime_dropped = dropped;
        report
    }

    async fn run_due_jobs(&mut self, now: DateTime<Utc>) -> usize {
        let mut fired = 0;
        let mut keep = vec![true; self.jobs.len()];
        for idx in 0..self.jobs.len() {
            if self.jobs[idx].next_fire > now {
                continue;
            }
            let (name, args) = {
                let job = &self.jobs[idx];
                (job.def.task_name.clone(), job.def.task_args.clone())
            };
            fired += 1;
            let outcome = self.registry.run(&name, args).await;
            if outcome == TaskOutcome::Cancel {
                info!(task_name = %name, "Recurring job cancelled by its handler");
                keep[idx] = false;
                continue;
            }
            match self.jobs[idx].def.schedule.next_after(now, self.tz) {
                Some(next) => self.jobs[idx].next_fire = next,
                None => {
                    warn!(task_name = %name, "No further fire time, removing job");
                    keep[idx] = false;
                }
            }
        }
        if keep.contains(&false) {
            let mut it = keep.into_iter();
            self.jobs.retain(|_| it.next().unwrap_or(true));
        }
        fired
    }

    /// Reconcile the durable store: execute due records, then remove them in
    /// one atomic write. Crash between execution and removal re-runs at most
    /// this tick's records once (at-least-once). Records failing validation
    /// are dropped without execution — terminal, so a record pointing at a
    /// deleted resource cannot wedge the loop in a retry cycle.
    async fn reconcile_onetime(&mut self, now: DateTime<Utc>) -> (usize, usize) {
        let due = match self.store.list_due(now) {
            Ok(due) => due,
            Err(e) => {
                error!(error = %e, "Failed to read one-time task store");
                return (0, 0);
            }
        };
        if due.is_empty() {
            return (0, 0);
        }

        let mut executed = 0;
        let mut dropped = 0;
        let mut finished_ids = Vec::with_capacity(due.len());
        for task in due {
            if !self.registry.validate(&task.task_name, &task.task_args) {
                warn!(
                    task_id = %task.id,
                    task_name = %task.task_name,
                    "Dropping one-time task that failed validation"
                );
                dropped += 1;
                finished_ids.push(task.id);
                continue;
            }
            let outcome = self.registry.run(&task.task_name, task.task_args).await;
            if let TaskOutcome::Failed(reason) = &outcome {
                warn!(task_id = %task.id, reason = %reason, "One-time task failed");
            }
            executed += 1;
            finished_ids.push(task.id);
        }

        if let Err(e) = self.store.remove(&finished_ids) {
            error!(error = %e, "Failed to write back one-time task store");
        }
        (executed, dropped)
    }
}

fn load_source(path: &Path) -> Vec<RawScheduleRecord> {
    if !path.exists() {
        return Vec::new();
    }
    let text = match std::fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) => {
            warn!(source = %path.display(), error = %e, "Could not read schedule source");
            return Vec::new();
        }
    };
    if text.trim().is_empty() {
        return Vec::new();
    }
    match serde_json::from_str(&text) {
        Ok(records) => records,
        Err(e) => {
            warn!(source = %path.display(), error = %e, "Could not parse schedule source");
            Vec::new()
        }
    }
}

/// Drive the scheduler until shutdown. An in-flight tick always finishes;
/// cancellation only stops future ticks.
pub async fn run(
    scheduler: Arc<Mutex<Scheduler>>,
    tick_interval: Duration,
    shutdown: CancellationToken,
) -> Result<()> {
    info!(interval_secs = tick_interval.as_secs(), "Scheduler started");
    let mut interval = tokio::time::interval(tick_interval);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Scheduler stopped");
                return Ok(());
            }
            _ = interval.tick() => {
                let mut sched = scheduler.lock().await;
                sched.tick(Utc::now()).await;
            }
        }
    }
}
