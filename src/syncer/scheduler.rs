// ABOUTME: Work scheduler - runs sync units sequentially or on a bounded worker pool
// ABOUTME: Applies the failure policy and stops handing out units on cancellation

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinSet;

use super::executor::ApplyReport;
use super::types::SyncUnit;
use super::worker::UnitWorker;
use crate::config::FailurePolicy;
use crate::error::{Result, SyncError};

/// How units are distributed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleMode {
    /// One unit at a time in plan order; the first apply fault ends the run
    Sequential,
    /// `workers` tasks pulling from a shared queue
    Concurrent {
        workers: usize,
        failure_policy: FailurePolicy,
    },
}

impl ScheduleMode {
    /// Configuration and schema faults only ever skip their own unit.
    fn aborts_on(&self, error: &SyncError) -> bool {
        if error.is_fatal() {
            return true;
        }
        let unit_local = matches!(
            error,
            SyncError::Configuration(_) | SyncError::Schema { .. }
        );
        match self {
            ScheduleMode::Sequential => !unit_local,
            ScheduleMode::Concurrent { failure_policy, .. } => {
                !unit_local && *failure_policy == FailurePolicy::AbortRun
            }
        }
    }
}

/// The result of one processed unit.
#[derive(Debug)]
pub struct UnitResult {
    /// Position of the unit in the plan
    pub index: usize,
    pub unit: SyncUnit,
    pub outcome: Result<ApplyReport>,
    /// Whether this failure stopped the run
    pub aborted_run: bool,
    /// Completion sequence number across all workers
    finished: usize,
}

/// Everything the scheduler observed.
#[derive(Debug, Default)]
pub struct ScheduleOutcome {
    /// Processed units, in plan order
    pub results: Vec<UnitResult>,
    pub not_started: usize,
    pub cancelled: bool,
    /// A worker task died without reporting its unit
    worker_failure: Option<SyncError>,
}

impl ScheduleOutcome {
    pub fn aborted(&self) -> bool {
        self.worker_failure.is_some() || self.results.iter().any(|r| r.aborted_run)
    }

    /// Take the fault that stopped the run: the earliest-finishing aborting
    /// unit, or a lost worker.
    pub fn take_abort_error(&mut self) -> Option<SyncError> {
        if let Some(error) = self.worker_failure.take() {
            return Some(error);
        }
        let position = self
            .results
            .iter()
            .enumerate()
            .filter(|(_, r)| r.aborted_run)
            .min_by_key(|(_, r)| r.finished)
            .map(|(i, _)| i)?;
        let result = self.results.remove(position);
        result.outcome.err()
    }
}

pub struct Scheduler {
    worker: UnitWorker,
    mode: ScheduleMode,
}

impl Scheduler {
    pub fn new(worker: UnitWorker, mode: ScheduleMode) -> Self {
        Self { worker, mode }
    }

    pub async fn run(&self, units: Vec<SyncUnit>, shutdown: watch::Receiver<bool>) -> ScheduleOutcome {
        match self.mode {
            ScheduleMode::Sequential => self.run_sequential(units, shutdown).await,
            ScheduleMode::Concurrent { workers, .. } => {
                self.run_concurrent(units, workers.max(1), shutdown).await
            }
        }
    }

    async fn run_sequential(
        &self,
        units: Vec<SyncUnit>,
        shutdown: watch::Receiver<bool>,
    ) -> ScheduleOutcome {
        let total = units.len();
        let mut outcome = ScheduleOutcome::default();

        for (index, unit) in units.into_iter().enumerate() {
            if *shutdown.borrow() {
                tracing::info!("Cancellation requested, not starting remaining units");
                outcome.cancelled = true;
                break;
            }

            let result = self.worker.process(&unit).await;
            let aborted_run = match &result {
                Err(e) => {
                    tracing::error!("Unit {} failed: {}", unit.label(), e);
                    self.mode.aborts_on(e)
                }
                Ok(_) => false,
            };
            outcome.results.push(UnitResult {
                index,
                unit,
                outcome: result,
                aborted_run,
                finished: index,
            });
            if aborted_run {
                break;
            }
        }

        outcome.not_started = total - outcome.results.len();
        outcome
    }

    async fn run_concurrent(
        &self,
        units: Vec<SyncUnit>,
        workers: usize,
        shutdown: watch::Receiver<bool>,
    ) -> ScheduleOutcome {
        let total = units.len();
        let queue: Arc<Mutex<VecDeque<(usize, SyncUnit)>>> =
            Arc::new(Mutex::new(units.into_iter().enumerate().collect()));
        let stop = Arc::new(AtomicBool::new(false));
        let cancelled = Arc::new(AtomicBool::new(false));
        let sequence = Arc::new(AtomicUsize::new(0));

        tracing::info!("Processing {} units with {} workers", total, workers.min(total));

        let mut tasks = JoinSet::new();
        for worker_id in 0..workers.min(total) {
            let worker = self.worker.clone();
            let mode = self.mode;
            let queue = queue.clone();
            let stop = stop.clone();
            let cancelled = cancelled.clone();
            let sequence = sequence.clone();
            let shutdown = shutdown.clone();

            tasks.spawn(async move {
                let mut done = Vec::new();
                loop {
                    if stop.load(Ordering::SeqCst) {
                        break;
                    }
                    if *shutdown.borrow() {
                        cancelled.store(true, Ordering::SeqCst);
                        break;
                    }
                    let next = queue
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .pop_front();
                    let Some((index, unit)) = next else {
                        break;
                    };

                    tracing::debug!("Worker {} picked up {}", worker_id, unit.label());
                    let result = worker.process(&unit).await;
                    let aborted_run = match &result {
                        Err(e) => {
                            tracing::error!("Unit {} failed: {}", unit.label(), e);
                            let abort = mode.aborts_on(e);
                            if abort {
                                tracing::warn!("Stopping the run after failure in {}", unit.label());
                                stop.store(true, Ordering::SeqCst);
                            }
                            abort
                        }
                        Ok(_) => false,
                    };
                    done.push(UnitResult {
                        index,
                        unit,
                        outcome: result,
                        aborted_run,
                        finished: sequence.fetch_add(1, Ordering::SeqCst),
                    });
                }
                done
            });
        }

        let mut outcome = ScheduleOutcome::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(done) => outcome.results.extend(done),
                Err(e) => {
                    tracing::error!("Sync worker task failed: {}", e);
                    stop.store(true, Ordering::SeqCst);
                    if outcome.worker_failure.is_none() {
                        outcome.worker_failure = Some(SyncError::infrastructure(
                            "sync",
                            format!("worker task failed: {}", e),
                        ));
                    }
                }
            }
        }

        outcome.results.sort_by_key(|r| r.index);
        outcome.cancelled = cancelled.load(Ordering::SeqCst);
        outcome.not_started = total.saturating_sub(outcome.results.len());
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunConfig;
    use crate::syncer::memory::{MemoryDatabase, MemoryHashStore};
    use crate::syncer::mutation_log::MutationLog;
    use crate::syncer::types::{ColumnDefinition, TableDefinition, UnitMode};
    use mysql_async::Value;

    fn table(name: &str) -> TableDefinition {
        TableDefinition::new(
            name,
            vec![
                ColumnDefinition::new("id", "int"),
                ColumnDefinition::new("v", "varchar"),
            ],
            vec!["id".to_string()],
        )
    }

    struct Fixture {
        master: Arc<MemoryDatabase>,
        slave: Arc<MemoryDatabase>,
        units: Vec<SyncUnit>,
    }

    fn fixture(names: &[&str]) -> Fixture {
        let master = Arc::new(MemoryDatabase::new("master"));
        let slave = Arc::new(MemoryDatabase::new("slave"));
        let mut units = Vec::new();
        for name in names {
            master.create_table(table(name));
            slave.create_table(table(name));
            master.insert_rows(
                name,
                vec![vec![Value::Int(1), Value::Bytes(b"x".to_vec())]],
            );
            units.push(SyncUnit::whole_table(Arc::new(table(name)), UnitMode::HashDiff));
        }
        Fixture {
            master,
            slave,
            units,
        }
    }

    fn worker(f: &Fixture) -> UnitWorker {
        UnitWorker::new(
            f.master.clone(),
            f.slave.clone(),
            Arc::new(MemoryHashStore::new()),
            Arc::new(MutationLog::disabled()),
            Arc::new(RunConfig::default()),
        )
    }

    fn idle() -> watch::Receiver<bool> {
        watch::channel(false).1
    }

    #[tokio::test]
    async fn test_sequential_stops_at_first_failure() {
        let f = fixture(&["a", "b", "c"]);
        f.slave.fail_statements_on("b");
        let scheduler = Scheduler::new(worker(&f), ScheduleMode::Sequential);

        let mut outcome = scheduler.run(f.units.clone(), idle()).await;
        assert!(outcome.aborted());
        assert_eq!(outcome.results.len(), 2);
        assert_eq!(outcome.not_started, 1);
        assert_eq!(f.slave.rows("a").len(), 1);
        assert!(f.slave.rows("c").is_empty());

        let error = outcome.take_abort_error().unwrap();
        assert!(matches!(error, SyncError::Apply { ref unit, .. } if unit == "b"));
    }

    #[tokio::test]
    async fn test_concurrent_isolates_failed_unit() {
        let f = fixture(&["a", "b", "c", "d"]);
        f.slave.fail_statements_on("b");
        let scheduler = Scheduler::new(
            worker(&f),
            ScheduleMode::Concurrent {
                workers: 2,
                failure_policy: FailurePolicy::IsolateUnit,
            },
        );

        let outcome = scheduler.run(f.units.clone(), idle()).await;
        assert!(!outcome.aborted());
        assert_eq!(outcome.results.len(), 4);
        let indexes: Vec<usize> = outcome.results.iter().map(|r| r.index).collect();
        assert_eq!(indexes, vec![0, 1, 2, 3]);
        assert!(outcome.results[1].outcome.is_err());
        for name in ["a", "c", "d"] {
            assert_eq!(f.slave.rows(name).len(), 1);
        }
    }

    #[tokio::test]
    async fn test_concurrent_abort_policy_returns_fault() {
        let f = fixture(&["a", "b"]);
        f.slave.fail_statements_on("a");
        let scheduler = Scheduler::new(
            worker(&f),
            ScheduleMode::Concurrent {
                workers: 1,
                failure_policy: FailurePolicy::AbortRun,
            },
        );

        let mut outcome = scheduler.run(f.units.clone(), idle()).await;
        assert!(outcome.aborted());
        assert_eq!(outcome.not_started, 1);
        assert!(outcome.take_abort_error().is_some());
    }

    #[tokio::test]
    async fn test_infrastructure_fault_aborts_even_when_isolating() {
        let f = fixture(&["a", "b"]);
        f.master.set_offline(true);
        let scheduler = Scheduler::new(
            worker(&f),
            ScheduleMode::Concurrent {
                workers: 1,
                failure_policy: FailurePolicy::IsolateUnit,
            },
        );

        let mut outcome = scheduler.run(f.units.clone(), idle()).await;
        assert!(outcome.aborted());
        assert!(outcome.take_abort_error().unwrap().is_fatal());
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let f = fixture(&["a", "b"]);
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();

        for mode in [
            ScheduleMode::Sequential,
            ScheduleMode::Concurrent {
                workers: 2,
                failure_policy: FailurePolicy::IsolateUnit,
            },
        ] {
            let scheduler = Scheduler::new(worker(&f), mode);
            let outcome = scheduler.run(f.units.clone(), rx.clone()).await;
            assert!(outcome.cancelled);
            assert_eq!(outcome.not_started, 2);
            assert!(outcome.results.is_empty());
        }
    }
}
