//! Core domain types and utilities for the copper-spaniel platform.
//!
//! This crate provides the foundational types and error handling shared
//! across the copper-spaniel automation engine.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{
    ExecutionId, LogId, ParseIdError, RecordId, SegmentId, StepId, TenantId, WorkflowId,
};
