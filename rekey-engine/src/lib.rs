//! Rekey Engine - Change Propagation
//!
//! The orchestrator: given a changed instance, walk the relationship graph
//! with an explicit worklist, re-key every dependent instance exactly once,
//! and finish with the global-care bulk purge.
//!
//! One propagation pass is synchronous and runs to completion inside the
//! calling thread before control returns to the write/publish hook. Any
//! blocking happens in the storage collaborator; the engine itself has no
//! suspension point, no timeout, and no cross-process coordination.

pub mod pass;
pub mod processor;

pub use pass::{PassContext, PassTracker};
pub use processor::ChangeProcessor;
