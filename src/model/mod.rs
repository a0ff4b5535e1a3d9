//! pag-profile structural graph model.
//!
//! Three specializations of the graph store: per-function control-flow
//! graphs, the whole-binary program call graph and the program abstraction
//! graphs (per function, whole program, multi-thread/multi-process).

mod cfg;
mod pag;
mod pcg;


pub use cfg::ControlFlowGraph;
pub use pag::{FunctionGraphs, MultiProgramAbstractionGraph, ProgramAbstractionGraph};
pub use pcg::ProgramCallGraph;
