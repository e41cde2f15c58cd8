//! Perception -> decision -> action: events in, pending tasks out.

pub mod decision;
pub mod perceiver;
pub mod processor;

pub use decision::{DecisionRule, DecisionTable, FnRule};
pub use perceiver::EventPerceiver;
pub use processor::{EventOutcome, EventProcessor, EventRecord, ProcessorConfig, SweepReport};
