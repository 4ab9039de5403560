//! The one-shot batch execution path.

mod work_item;
mod worker_pool;

pub use work_item::{ResultValue, TerminalStatus, WorkItem, WorkResult};
pub use worker_pool::{FnHandler, Handler, WorkerPool};
