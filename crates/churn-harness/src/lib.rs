pub mod client;
pub mod control;
pub mod engine;
pub mod error;
pub mod fleet;
pub mod metrics;
pub mod parser;
pub mod plan;
pub mod stats;

pub use engine::outcome::{Outcome, Verdict};
pub use engine::scheduler::{Stage, StageScheduler};
pub use engine::verifier::{Observation, Verifier};
pub use error::HarnessError;
