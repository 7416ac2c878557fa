//! Coalescing single-writer task runner.
//!
//! While a task runs, further `run` calls fold into at most one pending
//! rerun, executed by the active caller after its task finishes. This
//! gives each consumer at-most-one-active processing and guarantees a
//! rerun whenever a `run` call overlapped a running task, which is what
//! the projection loops rely on to never miss a change notification.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::warn;

use crate::error::RuntimeResult;

const DEFAULT_BUDGET: Duration = Duration::from_millis(100);

#[derive(Debug, Default)]
struct RunnerState {
    running: bool,
    rerun_pending: bool,
}

type BudgetCallback = Arc<dyn Fn(&str, Duration) + Send + Sync>;

/// Serializes one consumer's processing.
#[derive(Clone)]
pub struct TaskRunner {
    name: Arc<str>,
    state: Arc<Mutex<RunnerState>>,
    budget: Duration,
    on_budget_exceeded: BudgetCallback,
}

impl TaskRunner {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(RunnerState::default())),
            budget: DEFAULT_BUDGET,
            on_budget_exceeded: Arc::new(|name, elapsed| {
                warn!(runner = name, elapsed_ms = elapsed.as_millis() as u64,
                    "task exceeded soft budget");
            }),
        }
    }

    /// Override the soft budget and its warning callback. The budget is
    /// telemetry only, never a cancellation.
    pub fn with_budget(
        mut self,
        budget: Duration,
        on_budget_exceeded: impl Fn(&str, Duration) + Send + Sync + 'static,
    ) -> Self {
        self.budget = budget;
        self.on_budget_exceeded = Arc::new(on_budget_exceeded);
        self
    }

    /// Run `task`, or coalesce into the active run.
    ///
    /// If a task is already active this returns immediately after flagging
    /// a rerun; the active caller drains it. Task errors are logged, not
    /// propagated: the persisted cursor makes the next run pick up where
    /// the failed one left off.
    pub async fn run<F, Fut>(&self, task: F)
    where
        F: Fn() -> Fut,
        Fut: Future<Output = RuntimeResult<()>>,
    {
        {
            let mut state = self.state.lock().expect("task runner lock");
            if state.running {
                state.rerun_pending = true;
                return;
            }
            state.running = true;
        }

        loop {
            let started = Instant::now();
            if let Err(err) = task().await {
                if err.is_deferral() {
                    tracing::debug!(runner = &*self.name, "deferred: master key not set");
                } else {
                    warn!(runner = &*self.name, error = %err, "task failed");
                }
            }

            let elapsed = started.elapsed();
            if elapsed > self.budget {
                (self.on_budget_exceeded)(&self.name, elapsed);
            }

            let mut state = self.state.lock().expect("task runner lock");
            if state.rerun_pending {
                state.rerun_pending = false;
                // Keep `running` set; this caller executes the rerun.
            } else {
                state.running = false;
                return;
            }
        }
    }
}

impl core::fmt::Debug for TaskRunner {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TaskRunner")
            .field("name", &self.name)
            .field("budget", &self.budget)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn overlapping_runs_coalesce_into_one_rerun() {
        let runner = Arc::new(TaskRunner::new("test"));
        let executions = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(tokio::sync::Semaphore::new(0));

        // First run blocks until we release the gate.
        let first = {
            let runner = runner.clone();
            let executions = executions.clone();
            let gate = gate.clone();
            tokio::spawn(async move {
                runner
                    .run(|| {
                        let executions = executions.clone();
                        let gate = gate.clone();
                        async move {
                            executions.fetch_add(1, Ordering::SeqCst);
                            let _permit = gate.acquire().await.expect("gate");
                            Ok(())
                        }
                    })
                    .await;
            })
        };

        // Wait until the first task is inside the gate.
        while executions.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        // Three overlapping calls collapse into a single rerun.
        for _ in 0..3 {
            runner
                .run(|| async { panic!("overlapping callers must not execute the task inline") })
                .await;
        }

        // Release both the active run and the rerun.
        gate.add_permits(2);
        first.await.unwrap();

        assert_eq!(executions.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn sequential_runs_execute_each_time() {
        let runner = TaskRunner::new("test");
        let executions = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let executions = executions.clone();
            runner
                .run(move || {
                    let executions = executions.clone();
                    async move {
                        executions.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                })
                .await;
        }

        assert_eq!(executions.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn budget_overrun_fires_the_callback() {
        let fired = Arc::new(AtomicUsize::new(0));
        let observer = fired.clone();

        let runner = TaskRunner::new("slow").with_budget(Duration::from_millis(1), move |_, _| {
            observer.fetch_add(1, Ordering::SeqCst);
        });

        runner
            .run(|| async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok(())
            })
            .await;

        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
