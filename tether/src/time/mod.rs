//! Deadline bookkeeping for blocking calls.

mod deadline;

#[doc(inline)]
pub use deadline::Deadline;
