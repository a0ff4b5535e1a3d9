//! pag-profile program abstraction graphs.

use super::ControlFlowGraph;
use crate::config::{Map, GRAPH_EXTENSION, GRAPH_INDEX};
use crate::error::{Error, Result};
use crate::graph::{Graph, VertexKind};
use crate::{filebuf, Address, VertexId};
use lazy_static::lazy_static;
use regex::Regex;
use std::ops::{Deref, DerefMut};
use std::path::Path;

/// Structural tree of one function, or of the whole program after linking.
/// Vertex 0 is the function the tree is rooted at.
#[derive(Debug, Clone)]
pub struct ProgramAbstractionGraph {
    graph: Graph,
}

impl ProgramAbstractionGraph {
    /// Id of the root function vertex.
    pub const ROOT: VertexId = 0;

    /// Creates a graph holding only the root function vertex.
    pub fn new(name: &str, entry_addr: Address, exit_addr: Address) -> Self {
        let mut graph = Graph::new();
        graph.add_vertex_of(VertexKind::Function, name, entry_addr, exit_addr);
        ProgramAbstractionGraph { graph }
    }

    /// Wraps a graph whose vertex 0 is a function.
    pub fn from_graph(mut graph: Graph) -> Result<Self> {
        graph.prepare();
        if !graph.is_vertex(Self::ROOT) {
            return Err(Error::GraphRoot("<empty>".into()));
        }
        let kind = graph.vertex(Self::ROOT).kind();
        if kind != VertexKind::Function {
            return Err(Error::GraphRoot(kind.to_string()));
        }
        Ok(ProgramAbstractionGraph { graph })
    }

    /// Reads a graph file; per-function control-flow graphs are reduced to
    /// their structure tree.
    pub fn read_file(filepath: &Path) -> Result<Self> {
        let graph = Graph::read_file(filepath)?;
        if ControlFlowGraph::has_blocks(&graph) {
            ControlFlowGraph::from_graph(graph)?.abstract_structure()
        } else {
            ProgramAbstractionGraph::from_graph(graph)
        }
    }

    /// Returns the root vertex.
    pub fn root(&self) -> VertexId {
        Self::ROOT
    }

    /// Returns the name of the root function.
    pub fn function_name(&self) -> &str {
        self.graph.vertex(Self::ROOT).name()
    }

    /// Returns the entry address of the root function.
    pub fn entry_addr(&self) -> Address {
        self.graph.vertex(Self::ROOT).entry_addr()
    }

    /// Unwraps the underlying graph.
    pub fn into_graph(self) -> Graph {
        self.graph
    }
}

impl Deref for ProgramAbstractionGraph {
    type Target = Graph;

    fn deref(&self) -> &Graph {
        &self.graph
    }
}

impl DerefMut for ProgramAbstractionGraph {
    fn deref_mut(&mut self) -> &mut Graph {
        &mut self.graph
    }
}

/// Abstraction graph expanded across threads and processes.
///
/// Vertex 0 is a synthesized root; an empty graph stands for an aborted
/// expansion.
#[derive(Debug, Clone, Default)]
pub struct MultiProgramAbstractionGraph {
    graph: Graph,
    processes: usize,
    threads: usize,
}

impl MultiProgramAbstractionGraph {
    /// Creates a graph holding only the synthesized root.
    pub fn new(processes: usize, threads: usize) -> Self {
        let mut graph = Graph::new();
        graph.add_vertex_of(VertexKind::Function, "root", 0, 0);
        MultiProgramAbstractionGraph {
            graph,
            processes,
            threads,
        }
    }

    /// Creates the graph of an aborted expansion.
    pub fn empty() -> Self {
        MultiProgramAbstractionGraph::default()
    }

    /// Checks if the expansion produced no vertices.
    pub fn is_empty(&self) -> bool {
        self.graph.vertex_count() == 0
    }

    /// Returns the synthesized root, if any.
    pub fn root(&self) -> Option<VertexId> {
        (!self.is_empty()).then(|| 0)
    }

    /// Returns the number of processes modelled.
    pub fn processes(&self) -> usize {
        self.processes
    }

    /// Returns the number of threads modelled per process.
    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Records the number of threads modelled per process.
    pub fn set_threads(&mut self, threads: usize) {
        self.threads = threads;
    }

    /// Unwraps the underlying graph.
    pub fn into_graph(self) -> Graph {
        self.graph
    }
}

impl Deref for MultiProgramAbstractionGraph {
    type Target = Graph;

    fn deref(&self) -> &Graph {
        &self.graph
    }
}

impl DerefMut for MultiProgramAbstractionGraph {
    fn deref_mut(&mut self) -> &mut Graph {
        &mut self.graph
    }
}

/// Per-function abstraction graphs keyed by function entry address.
#[derive(Debug, Clone, Default)]
pub struct FunctionGraphs {
    graphs: Map<Address, ProgramAbstractionGraph>,
}

impl FunctionGraphs {
    /// Creates an empty set.
    pub fn new() -> Self {
        FunctionGraphs::default()
    }

    /// Loads the graphs listed in the directory's index file.
    pub fn read_dir(dirpath: &Path) -> Result<Self> {
        lazy_static! {
            static ref ENTRY: Regex =
                Regex::new(r"^\s*(\S+)\s+(?:0x)?([[:xdigit:]]+)\s*$").expect("Invalid regex");
        }

        tracing::debug!("FunctionGraphs.read_dir {:?}", dirpath);
        let mut index = Vec::new();
        filebuf::for_each_line(filebuf::open(&dirpath.join(GRAPH_INDEX))?, |line, lc| {
            let err = || Error::IndexParsing(line.into(), lc);
            let caps = ENTRY.captures(line).ok_or_else(err)?;
            let entry = Address::from_str_radix(&caps[2], 16).map_err(|_| err())?;
            index.push((caps[1].to_string(), entry));
            Ok(())
        })?;

        let mut graphs = FunctionGraphs::new();
        for (stem, entry) in index {
            let path = dirpath.join(stem).with_extension(GRAPH_EXTENSION);
            let pag = ProgramAbstractionGraph::read_file(&path)?;
            if pag.entry_addr() != entry {
                tracing::warn!(
                    "Graph {:?} starts at 0x{:x}, index says 0x{:x}",
                    path,
                    pag.entry_addr(),
                    entry
                );
            }
            graphs.insert(entry, pag);
        }
        Ok(graphs)
    }

    /// Adds a graph under the entry address of its function.
    pub fn insert(&mut self, entry_addr: Address, pag: ProgramAbstractionGraph) {
        self.graphs.insert(entry_addr, pag);
    }

    /// Returns the graph of the function entered at `entry_addr`.
    pub fn get(&self, entry_addr: Address) -> Option<&ProgramAbstractionGraph> {
        self.graphs.get(&entry_addr)
    }

    /// Returns the entry address of the first function named `name`.
    pub fn entry_of(&self, name: &str) -> Option<Address> {
        let mut entries: Vec<Address> = self
            .graphs
            .iter()
            .filter(|(_, pag)| pag.function_name() == name)
            .map(|(&entry, _)| entry)
            .collect();
        entries.sort_unstable();
        entries.first().copied()
    }

    /// Returns the number of graphs.
    pub fn len(&self) -> usize {
        self.graphs.len()
    }

    /// Checks if no graph is loaded.
    pub fn is_empty(&self) -> bool {
        self.graphs.is_empty()
    }
}
