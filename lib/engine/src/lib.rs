//! Workflow engine for the copper-spaniel platform.
//!
//! This crate turns workflow definitions into running executions:
//!
//! - **Definitions**: Workflows, their entry conditions, and step forests
//! - **Enrollment**: The guarded pipeline from a trigger to an execution
//! - **Suppression**: Segment checks that exclude records, failing open
//! - **Lifecycle**: Advancing, pausing, and resuming executions
//! - **Dispatch**: Queue messages for the external step executor
//! - **Backends**: Postgres-shaped store trait, NATS queues, in-memory twins

pub mod dispatch;
pub mod enrollment;
pub mod error;
pub mod execution;
pub mod lifecycle;
pub mod memory;
pub mod nats;
pub mod segment;
pub mod step;
pub mod store;
pub mod workflow;

pub use dispatch::{Dispatcher, QueueClient, StepCommand, StepMessage, TriggerMessage};
pub use enrollment::{EnrollmentEngine, EnrollmentOutcome, EventContext, SkipReason};
pub use error::{EngineError, QueueError, StoreError};
pub use execution::{ExecutionLog, ExecutionStatus, LogEvent, PauseReason, WorkflowExecution};
pub use lifecycle::ExecutionLifecycle;
pub use memory::{MemoryQueue, MemoryStore};
pub use nats::{NatsConfig, NatsQueue};
pub use segment::{Segment, SegmentOutcome, SegmentRule, SuppressionChecker};
pub use step::{StepAction, WorkflowStep};
pub use store::{Record, RecordRef, RecordStore};
pub use workflow::{EntryCondition, Workflow, WorkflowSettings, WorkflowStatus};
