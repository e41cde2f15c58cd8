//! Orchestration core for a hierarchy of marketing agents.
//!
//! Three loops share one durable store and nothing else:
//!
//! * agents exchange messages through [`MessageLog`], which only admits what
//!   the [`CommunicationValidator`] allows for their hierarchy levels;
//! * the [`EventProcessor`] turns recorded events into pending tasks through a
//!   [`DecisionTable`];
//! * the [`Dispatcher`] claims pending tasks in priority order and hands them
//!   to a [`TaskExecutor`].

pub mod agents;
pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod messages;
pub mod metrics;
pub mod models;
pub mod redis_client;
pub mod store;
pub mod tasks;

pub use agents::{Agent, AgentRegistry, CommunicationValidator};
pub use config::{Config, ExecutorKind};
pub use events::{DecisionRule, DecisionTable, EventPerceiver, EventProcessor, ProcessorConfig};
pub use messages::MessageLog;
pub use metrics::Metrics;
pub use store::{MemoryStore, PgStore, Store};
pub use tasks::{Dispatcher, DispatcherConfig, TaskExecutor, TaskQueue};
