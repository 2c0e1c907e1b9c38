//! Sequential stage scheduler.
//!
//! A plan is an ordered list of stages. Each stage pairs an action, run
//! exactly once when the stage becomes current, with a completion predicate
//! that is polled on a fixed interval. The plan only moves forward when the
//! current predicate returns true.
//!
//! The scheduler has no timeout of its own: a predicate that never becomes
//! true stalls the run. Predicates that give up report failure through the
//! run's `Outcome` themselves.

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info};

type Action = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;
type Predicate = Box<dyn FnMut() -> bool + Send>;

pub struct Stage {
    name: String,
    action: Option<Action>,
    is_complete: Predicate,
}

impl Stage {
    pub fn new<A, F, P>(name: impl Into<String>, action: A, is_complete: P) -> Self
    where
        A: FnOnce() -> F + Send + 'static,
        F: Future<Output = ()> + Send + 'static,
        P: FnMut() -> bool + Send + 'static,
    {
        Self {
            name: name.into(),
            action: Some(Box::new(move || action().boxed())),
            is_complete: Box::new(is_complete),
        }
    }

    /// A stage that is complete as soon as its action has run.
    pub fn once<A, F>(name: impl Into<String>, action: A) -> Self
    where
        A: FnOnce() -> F + Send + 'static,
        F: Future<Output = ()> + Send + 'static,
    {
        Self::new(name, action, || true)
    }

    async fn run_action(&mut self) {
        if let Some(action) = self.action.take() {
            info!(stage = %self.name, "Starting stage");
            action().await;
        }
    }
}

pub struct StageScheduler {
    stages: Vec<Stage>,
    poll_interval: Duration,
}

impl StageScheduler {
    pub fn new(stages: Vec<Stage>, poll_interval: Duration) -> Self {
        Self {
            stages,
            poll_interval,
        }
    }

    /// Drives the plan until the last stage's predicate is true. Returns the
    /// number of stages that completed.
    pub async fn run(self) -> usize {
        let poll_interval = self.poll_interval;
        let mut stages = self.stages.into_iter();
        let Some(mut current) = stages.next() else {
            return 0;
        };
        let mut completed = 0;

        current.run_action().await;

        loop {
            if (current.is_complete)() {
                completed += 1;
                debug!(stage = %current.name, "Stage complete");

                match stages.next() {
                    Some(next) => {
                        current = next;
                        current.run_action().await;
                    }
                    None => {
                        info!(stages = completed, "Stage plan exhausted");
                        return completed;
                    }
                }
            }

            tokio::time::sleep(poll_interval).await;
        }
    }
}
