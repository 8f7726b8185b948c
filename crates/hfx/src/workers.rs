//! 🧵 Workers: the two long-running tasks that actually do the work while `run()`
//! takes all the credit in the sprint retro.
//!
//! - the connection [`Supervisor`](crate::supervisors::Supervisor) keeps the feed alive
//! - the [`Pipeline`](crate::pipeline::Pipeline) drains the delivery queue into the store

use tokio::task::JoinHandle;

/// 🏗️ A background worker, that does work. duh.
///
/// `start` consumes the worker and hands back the task. Whatever the task
/// returns when it finishes is the worker's report.
pub trait Worker {
    type Output: Send + 'static;

    fn start(self) -> JoinHandle<Self::Output>;
}
