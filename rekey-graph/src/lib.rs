//! Rekey Graph - Relationship Graph Construction
//!
//! Compiles declarative relation descriptors into the directed graph of
//! "who invalidates whom". The graph is built once from an immutable
//! [`TypeRegistry`], cached process-wide behind [`GraphCache`], and rebuilt
//! only through an explicit `invalidate()` call.
//!
//! # Edge direction
//!
//! An edge `from -> to` means: when an instance of `from` changes, the
//! related instance(s) of `to` reachable via the edge's relation field must
//! be invalidated. Two declaration styles produce edges:
//!
//! - `touches` - "I change, therefore you are invalidated" (edge points away
//!   from the declarer)
//! - `cares` - "you change, therefore I am invalidated" (edge points toward
//!   the declarer, with kind and field normalized to the other side)

pub mod cache;
pub mod graph;
pub mod registry;

pub use cache::GraphCache;
pub use graph::{Edge, RelationGraph};
pub use registry::{RelationField, RelationRef, TypeDescriptor, TypeRegistry};
