//! pag-profile library.
//!
//! Offline analysis of parallel programs: per-function structural graphs are
//! linked into a Program Abstraction Graph (PAG), sampled performance data is
//! embedded into it by call-path resolution, and the PAG is expanded across
//! threads and processes into a Multi-Program Abstraction Graph (MPAG)
//! annotated with communication dependencies.

#![deny(unsafe_code)]

pub mod analyze;
pub mod comm;
pub mod config;
pub mod error;
pub mod expand;
pub mod global;
pub mod graph;
pub mod link;
pub mod model;
pub mod perf;
pub mod resolver;
pub mod somap;

mod filebuf;

#[cfg(test)]
mod tests;

/// Address in the analyzed binary.
pub type Address = u64;
/// Dense index of a vertex inside one graph.
pub type VertexId = usize;
/// Dense index of an edge inside one graph.
pub type EdgeId = usize;
/// Process rank.
pub type ProcId = i32;
/// Thread id inside one process (0 is the root thread).
pub type ThreadId = i32;
/// Call path: return addresses, innermost frame first.
pub type CallPath = Vec<Address>;
