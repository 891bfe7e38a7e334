//! Pipeline stages
//!
//! Stage order is fixed: research → write → qa → render. Each stage reads
//! the previous stage's durable output and appends its own artifact; the
//! orchestrator owns sequencing, progress, and failure handling.

pub mod qa;
pub mod render;
pub mod research;
pub mod write;
