//! Durable polling of one remote generation job.

mod cancel;
mod record;
mod session;

pub use cancel::CancelToken;
pub use record::{JobRecord, JobStatus};
pub use session::{
    JobEvent, JobPhase, JobSession, PollConfig, RecoveryOutcome, Sleeper, ThreadSleeper,
};
