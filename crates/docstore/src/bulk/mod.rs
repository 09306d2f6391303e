//! Amortizing many writes and deletes into few bulk requests.
//!
//! Both pipelines queue the same commands: an `index` or `delete` metadata line
//! carrying index, id, routing and, for conditional commands, the concurrency tokens,
//! followed by the document for writes. [`BulkContext`] reports failures per command
//! and fails on close if any command failed. [`BatchContext`] only reports a flag.

mod batch;
mod command;
mod context;
mod result;

pub use batch::BatchContext;
pub use context::BulkContext;
pub use result::BulkResult;
