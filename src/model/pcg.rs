//! pag-profile program call graph.

use crate::config::Map;
use crate::error::{Error, Result};
use crate::graph::{EdgeKind, Graph, VertexKind};
use crate::{filebuf, Address, EdgeId, VertexId};
use std::collections::BTreeMap;
use std::io::BufRead;
use std::ops::{Deref, DerefMut};
use std::path::Path;

/// Whole-binary call graph indexed by address.
///
/// Function vertices are indexed by entry address and range, call-site
/// vertices by the address of the call instruction. Each function has a plain
/// edge to its call sites; each call site has a static or dynamic call edge
/// to every callee.
#[derive(Debug, Clone, Default)]
pub struct ProgramCallGraph {
    graph: Graph,
    functions: BTreeMap<Address, VertexId>,
    call_sites: BTreeMap<Address, VertexId>,
    call_edges: Map<(VertexId, VertexId), EdgeId>,
}

impl ProgramCallGraph {
    /// Creates an empty call graph.
    pub fn new() -> Self {
        ProgramCallGraph::default()
    }

    /// Reads a call graph file.
    pub fn read_file(filepath: &Path) -> Result<Self> {
        Ok(ProgramCallGraph::from_graph(Graph::read_file(filepath)?))
    }

    /// Indexes a loaded graph.
    pub fn from_graph(mut graph: Graph) -> Self {
        graph.prepare();
        let mut pcg = ProgramCallGraph::default();
        for v in graph.vertex_ids() {
            let vertex = graph.vertex(v);
            if vertex.kind() == VertexKind::Function {
                pcg.functions.insert(vertex.entry_addr(), v);
            } else if vertex.kind().is_call() {
                pcg.call_sites.insert(vertex.entry_addr(), v);
            }
        }
        for e in graph.edge_ids() {
            let edge = graph.edge(e);
            if edge.kind() != EdgeKind::None {
                pcg.call_edges.insert((edge.src(), edge.dest()), e);
            }
        }
        pcg.graph = graph;
        pcg
    }

    /// Adds a function, or returns the one already at `entry_addr`.
    pub fn add_function(&mut self, name: &str, entry_addr: Address, exit_addr: Address) -> VertexId {
        if let Some(&v) = self.functions.get(&entry_addr) {
            return v;
        }
        let v = self
            .graph
            .add_vertex_of(VertexKind::Function, name, entry_addr, exit_addr);
        self.functions.insert(entry_addr, v);
        v
    }

    /// Adds a call site, or returns the one already at `address`.
    /// A new call site is attached to the function containing it.
    pub fn add_call_site(&mut self, address: Address) -> VertexId {
        if let Some(&v) = self.call_sites.get(&address) {
            return v;
        }
        let caller = self.function_at(address);
        let v = self
            .graph
            .add_vertex_of(VertexKind::Call, "", address, address);
        self.call_sites.insert(address, v);
        if let Some(caller) = caller {
            self.graph.add_edge(caller, v);
        }
        v
    }

    /// Adds a call edge from the call site to the function entered at
    /// `callee_entry`; returns the existing edge for a repeated pair and
    /// `None` if the callee is unknown.
    pub fn add_call_edge(
        &mut self,
        call_addr: Address,
        callee_entry: Address,
        kind: EdgeKind,
    ) -> Option<EdgeId> {
        let callee = *self.functions.get(&callee_entry)?;
        let site = self.add_call_site(call_addr);
        if let Some(&e) = self.call_edges.get(&(site, callee)) {
            return Some(e);
        }
        if self.graph.vertex(site).name().is_empty() {
            let name = self.graph.vertex(callee).name().to_string();
            self.graph.set_vertex_name(site, &name);
        }
        let e = self.graph.add_edge_of(site, callee, kind);
        self.call_edges.insert((site, callee), e);
        Some(e)
    }

    /// Adds a dynamic call edge for a return address observed at run time.
    ///
    /// The call site is the closest known one at or below `return_addr`
    /// within `window` bytes; the callee is the function containing `target`.
    pub fn add_dynamic_call_near(
        &mut self,
        return_addr: Address,
        target: Address,
        window: Address,
    ) -> Option<EdgeId> {
        let call_addr = self.call_site_near(return_addr, window)?;
        let callee = self.function_at(target)?;
        let callee_entry = self.graph.vertex(callee).entry_addr();
        self.add_call_edge(call_addr, callee_entry, EdgeKind::DynamicCall)
    }

    /// Returns entry addresses of all callees of the call site, in edge order.
    pub fn callees(&self, call_addr: Address) -> Vec<Address> {
        let site = match self.call_sites.get(&call_addr) {
            Some(&site) => site,
            None => return Vec::new(),
        };
        self.graph
            .children(site)
            .filter(|&c| self.graph.vertex(c).kind() == VertexKind::Function)
            .map(|c| self.graph.vertex(c).entry_addr())
            .collect()
    }

    /// Returns the function whose range contains the address.
    pub fn function_at(&self, address: Address) -> Option<VertexId> {
        let (_, &v) = self.functions.range(..=address).next_back()?;
        self.graph.vertex(v).covers(address, 0).then(|| v)
    }

    /// Returns the function entered at `entry_addr`.
    pub fn function_by_entry(&self, entry_addr: Address) -> Option<VertexId> {
        self.functions.get(&entry_addr).copied()
    }

    /// Returns the first function with the given name.
    pub fn function_by_name(&self, name: &str) -> Option<VertexId> {
        self.functions
            .values()
            .copied()
            .find(|&v| self.graph.vertex(v).name() == name)
    }

    /// Returns the closest call site at or below `return_addr` within `window` bytes.
    pub fn call_site_near(&self, return_addr: Address, window: Address) -> Option<Address> {
        self.call_sites
            .range(return_addr.saturating_sub(window)..=return_addr)
            .next_back()
            .map(|(&a, _)| a)
    }

    /// Returns the number of functions.
    pub fn function_count(&self) -> usize {
        self.functions.len()
    }

    /// Reads `<call hex> <target hex>` lines into dynamic call edges.
    /// Returns the number of edges added; unknown targets are skipped.
    pub fn read_indirect_calls(&mut self, reader: impl BufRead) -> Result<usize> {
        let mut added = 0;
        filebuf::for_each_line(reader, |line, lc| {
            let err = || Error::IndirectParsing(line.into(), lc);
            let mut fields = line.split_whitespace().map(|f| {
                Address::from_str_radix(f.trim_start_matches("0x"), 16).map_err(|_| err())
            });
            let call = fields.next().ok_or_else(err)??;
            let target = fields.next().ok_or_else(err)??;
            let entry = self
                .function_at(target)
                .map(|f| self.graph.vertex(f).entry_addr());
            match entry.and_then(|entry| self.add_call_edge(call, entry, EdgeKind::DynamicCall)) {
                Some(_) => added += 1,
                None => tracing::debug!("Indirect call target 0x{:x} is not a function", target),
            }
            Ok(())
        })?;
        Ok(added)
    }

    /// Reads an indirect call trace file.
    pub fn read_indirect_calls_file(&mut self, filepath: &Path) -> Result<usize> {
        self.read_indirect_calls(filebuf::open(filepath)?)
    }
}

impl Deref for ProgramCallGraph {
    type Target = Graph;

    fn deref(&self) -> &Graph {
        &self.graph
    }
}

impl DerefMut for ProgramCallGraph {
    fn deref_mut(&mut self) -> &mut Graph {
        &mut self.graph
    }
}
