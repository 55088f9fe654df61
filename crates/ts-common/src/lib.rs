//! Telespool shared types.
//!
//! This crate provides:
//! - The delivery/storage failure taxonomy with stable codes
//! - The diagnostic event model and sinks used to surface deliberate data loss

pub mod diagnostics;
pub mod failure;

pub use diagnostics::{
    DiagnosticEvent, DiagnosticSink, DropReason, FanoutSink, MemorySink, RecordedEvent,
    TracingSink,
};
pub use failure::{FailureCategory, FailureKind};
