//! Flow definition layer
//!
//! Holds the data model the interpreter consumes: flows, invoke and branch
//! steps, and conditions. Registration and lookup live on the engine.

// Core flow type definitions
pub mod types;

// Re-export commonly used types
pub use types::{BranchCase, BranchStep, Condition, FlowDefinition, InvokeStep, Step, When};
