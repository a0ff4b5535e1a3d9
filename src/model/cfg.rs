//! pag-profile control-flow graph.

use super::ProgramAbstractionGraph;
use crate::error::{Error, Result};
use crate::graph::{deep_copy_vertex, Graph, VertexKind};
use crate::{Address, EdgeId, VertexId};
use std::ops::{Deref, DerefMut};

/// Control flow of one function: a function vertex (id 0), basic blocks with
/// flow edges, and the loop and call vertices found inside the function.
#[derive(Debug, Clone)]
pub struct ControlFlowGraph {
    graph: Graph,
}

impl ControlFlowGraph {
    /// Creates a graph holding only the function vertex.
    pub fn new(name: &str, entry_addr: Address, exit_addr: Address) -> Self {
        let mut graph = Graph::new();
        graph.add_vertex_of(VertexKind::Function, name, entry_addr, exit_addr);
        ControlFlowGraph { graph }
    }

    /// Wraps a loaded graph; vertex 0 must be the function.
    pub fn from_graph(graph: Graph) -> Result<Self> {
        if graph.vertex_bound() == 0 || graph.vertex(0).kind() != VertexKind::Function {
            let found = match graph.vertex_bound() {
                0 => "<empty>".to_string(),
                _ => graph.vertex(0).kind().to_string(),
            };
            return Err(Error::GraphRoot(found));
        }
        Ok(ControlFlowGraph { graph })
    }

    /// Returns the function name.
    pub fn function_name(&self) -> &str {
        self.graph.vertex(0).name()
    }

    /// Adds a basic block; the first block becomes the function's entry block.
    pub fn add_block(&mut self, entry_addr: Address, exit_addr: Address) -> VertexId {
        let first = self.blocks().next().is_none();
        let name = format!("bb_{:x}", entry_addr);
        let v = self
            .graph
            .add_vertex_of(VertexKind::BasicBlock, &name, entry_addr, exit_addr);
        if first {
            self.graph.add_edge(0, v);
        }
        v
    }

    /// Adds a flow edge between two blocks.
    pub fn add_flow(&mut self, from: VertexId, to: VertexId) -> EdgeId {
        self.graph.add_edge(from, to)
    }

    /// Adds a loop covering the address range.
    pub fn add_loop(&mut self, name: &str, entry_addr: Address, exit_addr: Address) -> VertexId {
        self.graph
            .add_vertex_of(VertexKind::Loop, name, entry_addr, exit_addr)
    }

    /// Adds a call site of the given kind.
    pub fn add_call(
        &mut self,
        kind: VertexKind,
        callee: &str,
        entry_addr: Address,
        exit_addr: Address,
    ) -> VertexId {
        self.graph.add_vertex_of(kind, callee, entry_addr, exit_addr)
    }

    /// Returns the basic blocks in id order.
    pub fn blocks(&self) -> impl Iterator<Item = VertexId> + '_ {
        self.graph
            .vertex_ids()
            .filter(move |&v| self.graph.vertex(v).kind() == VertexKind::BasicBlock)
    }

    /// Checks if the graph carries basic blocks (as opposed to a bare structure tree).
    pub fn has_blocks(graph: &Graph) -> bool {
        graph
            .vertex_ids()
            .any(|v| graph.vertex(v).kind() == VertexKind::BasicBlock)
    }

    /// Reduces the control flow to the structure tree of the function.
    ///
    /// Loops, call sites and communication operations are nested by address
    /// range containment: a vertex hangs under the innermost loop covering it,
    /// or under the function. Blocks and instructions are dropped.
    pub fn abstract_structure(&self) -> Result<ProgramAbstractionGraph> {
        let mut structural: Vec<VertexId> = self
            .graph
            .vertex_ids()
            .filter(|&v| v != 0)
            .filter(|&v| {
                let kind = self.graph.vertex(v).kind();
                kind == VertexKind::Loop || kind == VertexKind::CommOp || kind.is_call()
            })
            .collect();
        structural.sort_by(|&a, &b| {
            let (a, b) = (self.graph.vertex(a), self.graph.vertex(b));
            a.entry_addr()
                .cmp(&b.entry_addr())
                .then(b.exit_addr().cmp(&a.exit_addr()))
        });

        let mut pag = Graph::new();
        let root = pag.add_vertex();
        deep_copy_vertex(&mut pag, root, &self.graph, 0)?;

        // Open loops, innermost last, as (cfg vertex, pag vertex)
        let mut open: Vec<(VertexId, VertexId)> = Vec::new();
        for v in structural {
            let vertex = self.graph.vertex(v);
            while let Some(&(l, _)) = open.last() {
                let lp = self.graph.vertex(l);
                if lp.entry_addr() <= vertex.entry_addr() && vertex.exit_addr() <= lp.exit_addr() {
                    break;
                }
                open.pop();
            }
            let parent = open.last().map(|&(_, p)| p).unwrap_or(root);
            let nv = pag.add_vertex();
            deep_copy_vertex(&mut pag, nv, &self.graph, v)?;
            pag.add_edge(parent, nv);
            if vertex.kind() == VertexKind::Loop {
                open.push((v, nv));
            }
        }

        pag.prepare();
        ProgramAbstractionGraph::from_graph(pag)
    }
}

impl Deref for ControlFlowGraph {
    type Target = Graph;

    fn deref(&self) -> &Graph {
        &self.graph
    }
}

impl DerefMut for ControlFlowGraph {
    fn deref_mut(&mut self) -> &mut Graph {
        &mut self.graph
    }
}
