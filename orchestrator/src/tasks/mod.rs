//! Task queue, dispatch loop and executor handoff.

pub mod dispatcher;
pub mod executor;
pub mod queue;

pub use dispatcher::{DispatchOutcome, DispatchRecord, DispatchReport, Dispatcher, DispatcherConfig};
pub use executor::{ChannelExecutor, HttpExecutor, RedisExecutor, TaskExecutor, TaskHandoff};
pub use queue::TaskQueue;
