use crate::error::HarnessError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};

/// Final result of a run.
#[derive(Debug)]
pub enum Verdict {
    Passed,
    Failed(HarnessError),
}

impl Verdict {
    pub fn exit_code(&self) -> i32 {
        match self {
            Verdict::Passed => 0,
            Verdict::Failed(_) => 1,
        }
    }
}

/// Shared handle every actor reports through. Only the first verdict counts;
/// anything reported after it is logged and dropped.
#[derive(Clone)]
pub struct Outcome {
    tx: mpsc::UnboundedSender<Verdict>,
    decided: Arc<AtomicBool>,
}

impl Outcome {
    pub fn channel() -> (Self, OutcomeReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                decided: Arc::new(AtomicBool::new(false)),
            },
            OutcomeReceiver { rx },
        )
    }

    pub fn fail(&self, err: HarnessError) {
        error!(reason = %err, "Test failed");
        self.decide(Verdict::Failed(err));
    }

    pub fn succeed(&self) {
        info!("Test success");
        self.decide(Verdict::Passed);
    }

    fn decide(&self, verdict: Verdict) {
        if self.decided.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.tx.send(verdict);
    }
}

pub struct OutcomeReceiver {
    rx: mpsc::UnboundedReceiver<Verdict>,
}

impl OutcomeReceiver {
    /// Waits for the first verdict. Returns `None` if every `Outcome` handle
    /// was dropped without deciding.
    pub async fn wait(mut self) -> Option<Verdict> {
        self.rx.recv().await
    }

    pub fn try_verdict(&mut self) -> Option<Verdict> {
        self.rx.try_recv().ok()
    }
}
