//! GPUDiag Core Library
//!
//! Fact correlation and severity aggregation for GPU server diagnostics.
//! This crate provides fact acquisition, rule evaluators, issue aggregation
//! and report rendering.

pub mod aggregator;
pub mod engine;
pub mod evaluators;
pub mod facts;
pub mod metrics;
pub mod report;

// Re-export common types
pub use aggregator::IssueAggregator;
pub use engine::{DiagnosticEngine, ExecutionMode};
pub use evaluators::{Evaluation, EvaluationConfig, Evaluator, Section};
pub use facts::{
    create_fact_provider, FactError, FactProvider, FactSnapshot, FactSource, ProcFs,
    ProcessTable, ProviderSettings,
};
pub use report::{DiagnosticReport, Issue, IssueLevel, Severity};
