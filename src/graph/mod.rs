//! pag-profile attributed graph store.
//!
//! Every structural graph (control-flow graph, call graph, abstraction graphs)
//! is an arena of vertices and edges addressed by dense ids. Ids are never
//! reused while the graph lives: deleted vertices and edges stay in the arena
//! as tombstones. Vertex slots are allocated in chunks of [`VERTEX_CHUNK`];
//! unused trailing slots are trimmed before traversals and dumps.
//!
//! Edges may be added lazily: they are queued and materialized by [`Graph::flush`],
//! which every traversal, dump and mutation of existing edges does first.

use crate::config::{ATTR_ID, VERTEX_CHUNK};
use crate::error::{Error, Result};
use crate::perf::PerfDataStore;
use crate::{Address, EdgeId, VertexId};
use std::fmt;
use std::str::FromStr;

mod attr;
mod io;
mod traverse;

#[cfg(test)]
mod tests;

pub use attr::{AttrValue, Attributes};
pub use traverse::Visitor;

use attr::AttrSchema;

/// Kind of a structural vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum VertexKind {
    /// Function body.
    Function,
    /// Direct call site.
    Call,
    /// Indirect call site (through a pointer).
    CallIndirect,
    /// Call site whose callee is already on the linking stack.
    CallRecursive,
    /// Loop nest.
    Loop,
    /// Basic block of a control-flow graph.
    BasicBlock,
    /// Single instruction.
    Instruction,
    /// Bare address without structure.
    Address,
    /// Communication operation.
    CommOp,
}

impl Default for VertexKind {
    fn default() -> Self {
        Self::Address
    }
}

impl VertexKind {
    /// Returns the textual name used in graph files.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Call => "call",
            Self::CallIndirect => "call_indirect",
            Self::CallRecursive => "call_recursive",
            Self::Loop => "loop",
            Self::BasicBlock => "basic_block",
            Self::Instruction => "instruction",
            Self::Address => "address",
            Self::CommOp => "comm_op",
        }
    }

    /// Containers hold the address they cover without consuming a call-path frame.
    pub fn is_container(&self) -> bool {
        matches!(self, Self::Function | Self::Loop | Self::BasicBlock)
    }

    /// Checks if the vertex is a call site of any flavor.
    pub fn is_call(&self) -> bool {
        matches!(self, Self::Call | Self::CallIndirect | Self::CallRecursive)
    }
}

impl fmt::Display for VertexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VertexKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "function" => Ok(Self::Function),
            "call" => Ok(Self::Call),
            "call_indirect" => Ok(Self::CallIndirect),
            "call_recursive" => Ok(Self::CallRecursive),
            "loop" => Ok(Self::Loop),
            "basic_block" => Ok(Self::BasicBlock),
            "instruction" => Ok(Self::Instruction),
            "address" => Ok(Self::Address),
            "comm_op" => Ok(Self::CommOp),
            _ => Err(Error::VertexKind(s.into())),
        }
    }
}

/// Kind of an edge; only call graphs use the call kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EdgeKind {
    /// Call edge found by static analysis.
    StaticCall,
    /// Call edge observed at run time.
    DynamicCall,
    /// Plain structural edge.
    None,
}

impl Default for EdgeKind {
    fn default() -> Self {
        Self::None
    }
}

impl EdgeKind {
    /// Returns the textual name used in graph files.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StaticCall => "static",
            Self::DynamicCall => "dynamic",
            Self::None => "none",
        }
    }
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EdgeKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "static" => Ok(Self::StaticCall),
            "dynamic" => Ok(Self::DynamicCall),
            "none" => Ok(Self::None),
            _ => Err(Error::EdgeKind(s.into())),
        }
    }
}

/// Vertex of an attributed graph.
#[derive(Debug, Clone, Default)]
pub struct Vertex {
    kind: VertexKind,
    entry_addr: Address,
    exit_addr: Address,
    name: String,
    attrs: Attributes,
    out: Vec<EdgeId>,
    inc: Vec<EdgeId>,
    removed: bool,
}

impl Vertex {
    /// Returns the kind of the vertex.
    pub fn kind(&self) -> VertexKind {
        self.kind
    }

    /// Returns the first address covered by the vertex.
    pub fn entry_addr(&self) -> Address {
        self.entry_addr
    }

    /// Returns the last address covered by the vertex.
    pub fn exit_addr(&self) -> Address {
        self.exit_addr
    }

    /// Returns the name of the vertex.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the attribute bag.
    pub fn attrs(&self) -> &Attributes {
        &self.attrs
    }

    /// Checks if `address` falls into `[entry - slack, exit + slack]`.
    pub fn covers(&self, address: Address, slack: Address) -> bool {
        self.entry_addr.saturating_sub(slack) <= address
            && address <= self.exit_addr.saturating_add(slack)
    }
}

/// Directed edge of an attributed graph.
#[derive(Debug, Clone)]
pub struct Edge {
    src: VertexId,
    dest: VertexId,
    kind: EdgeKind,
    attrs: Attributes,
    removed: bool,
}

impl Edge {
    /// Returns the source vertex.
    pub fn src(&self) -> VertexId {
        self.src
    }

    /// Returns the destination vertex.
    pub fn dest(&self) -> VertexId {
        self.dest
    }

    /// Returns the kind of the edge.
    pub fn kind(&self) -> EdgeKind {
        self.kind
    }

    /// Returns the attribute bag.
    pub fn attrs(&self) -> &Attributes {
        &self.attrs
    }
}

/// Edge queued by a lazy insertion.
#[derive(Debug, Clone)]
struct PendingEdge {
    src: VertexId,
    dest: VertexId,
    kind: EdgeKind,
    attrs: Attributes,
}

/// Attributed directed graph with its performance data.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    vertices: Vec<Vertex>,
    used: usize,
    removed_vertices: usize,
    edges: Vec<Edge>,
    removed_edges: usize,
    pending: Vec<PendingEdge>,
    attrs: Attributes,
    graph_schema: AttrSchema,
    vertex_schema: AttrSchema,
    edge_schema: AttrSchema,
    perf: PerfDataStore,
}

impl Graph {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Graph::default()
    }

    /// Adds a default vertex, growing the arena by a whole chunk when full.
    pub fn add_vertex(&mut self) -> VertexId {
        if self.used == self.vertices.len() {
            let len = self.vertices.len() + VERTEX_CHUNK;
            self.vertices.resize_with(len, Vertex::default);
        }
        let id = self.used;
        self.used += 1;
        id
    }

    /// Adds a vertex with its structural fields set.
    pub fn add_vertex_of(
        &mut self,
        kind: VertexKind,
        name: &str,
        entry_addr: Address,
        exit_addr: Address,
    ) -> VertexId {
        let id = self.add_vertex();
        let vertex = &mut self.vertices[id];
        vertex.kind = kind;
        vertex.name = name.into();
        vertex.entry_addr = entry_addr;
        vertex.exit_addr = exit_addr;
        id
    }

    /// Returns the number of live vertices.
    pub fn vertex_count(&self) -> usize {
        self.used - self.removed_vertices
    }

    /// Returns one past the largest vertex id handed out.
    pub fn vertex_bound(&self) -> usize {
        self.used
    }

    /// Returns the number of live edges, queued ones included.
    pub fn edge_count(&self) -> usize {
        self.edges.len() - self.removed_edges + self.pending.len()
    }

    /// Returns the number of queued edges.
    pub fn pending_edges(&self) -> usize {
        self.pending.len()
    }

    /// Checks if the id names a live vertex.
    pub fn is_vertex(&self, v: VertexId) -> bool {
        v < self.used && !self.vertices[v].removed
    }

    /// Returns the vertex; panics on an id never handed out.
    pub fn vertex(&self, v: VertexId) -> &Vertex {
        &self.vertices[self.check(v)]
    }

    /// Returns the edge; queued edges must be flushed first.
    pub fn edge(&self, e: EdgeId) -> &Edge {
        &self.edges[e]
    }

    /// Sets the kind of a vertex.
    pub fn set_vertex_kind(&mut self, v: VertexId, kind: VertexKind) {
        let v = self.check(v);
        self.vertices[v].kind = kind;
    }

    /// Sets the name of a vertex.
    pub fn set_vertex_name(&mut self, v: VertexId, name: &str) {
        let v = self.check(v);
        self.vertices[v].name = name.into();
    }

    /// Sets the address range of a vertex.
    pub fn set_vertex_range(&mut self, v: VertexId, entry_addr: Address, exit_addr: Address) {
        let v = self.check(v);
        self.vertices[v].entry_addr = entry_addr;
        self.vertices[v].exit_addr = exit_addr;
    }

    /// Adds a plain edge immediately.
    pub fn add_edge(&mut self, src: VertexId, dest: VertexId) -> EdgeId {
        self.add_edge_of(src, dest, EdgeKind::None)
    }

    /// Adds an edge of the given kind immediately.
    pub fn add_edge_of(&mut self, src: VertexId, dest: VertexId, kind: EdgeKind) -> EdgeId {
        let (src, dest) = (self.check(src), self.check(dest));
        self.flush();
        self.materialize(PendingEdge {
            src,
            dest,
            kind,
            attrs: Attributes::new(),
        })
    }

    /// Queues a plain edge; returns the id it will have once flushed.
    pub fn add_edge_lazy(&mut self, src: VertexId, dest: VertexId) -> EdgeId {
        self.add_edge_lazy_of(src, dest, EdgeKind::None)
    }

    /// Queues an edge of the given kind.
    pub fn add_edge_lazy_of(&mut self, src: VertexId, dest: VertexId, kind: EdgeKind) -> EdgeId {
        let (src, dest) = (self.check(src), self.check(dest));
        self.pending.push(PendingEdge {
            src,
            dest,
            kind,
            attrs: Attributes::new(),
        });
        self.edges.len() + self.pending.len() - 1
    }

    /// Materializes all queued edges in insertion order.
    pub fn flush(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        tracing::debug!("Graph.flush {} edges", self.pending.len());
        let pending = std::mem::take(&mut self.pending);
        self.edges.reserve(pending.len());
        for edge in pending {
            self.materialize(edge);
        }
    }

    /// Drops preallocated vertex slots that were never handed out.
    pub fn trim(&mut self) {
        assert!(
            self.used <= self.vertices.len(),
            "Graph holds {} vertices but only {} slots",
            self.used,
            self.vertices.len()
        );
        self.vertices.truncate(self.used);
        self.vertices.shrink_to_fit();
    }

    /// Flushes queued edges and trims unused slots.
    pub fn prepare(&mut self) {
        self.flush();
        self.trim();
    }

    /// Deletes a vertex together with its incident edges.
    pub fn delete_vertex(&mut self, v: VertexId) {
        let v = self.check(v);
        if self.vertices[v].removed {
            return;
        }
        self.flush();
        let incident: Vec<EdgeId> = self.vertices[v]
            .out
            .iter()
            .chain(self.vertices[v].inc.iter())
            .copied()
            .collect();
        for e in incident {
            self.delete_edge(e);
        }
        let vertex = &mut self.vertices[v];
        vertex.removed = true;
        vertex.attrs.clear();
        self.removed_vertices += 1;
        self.perf.remove_vertex(v);
    }

    /// Deletes an edge.
    pub fn delete_edge(&mut self, e: EdgeId) {
        self.flush();
        let edge = &mut self.edges[e];
        if edge.removed {
            return;
        }
        edge.removed = true;
        let (src, dest) = (edge.src, edge.dest);
        self.vertices[src].out.retain(|&x| x != e);
        self.vertices[dest].inc.retain(|&x| x != e);
        self.removed_edges += 1;
    }

    /// Returns ids of live vertices in ascending order.
    pub fn vertex_ids(&self) -> impl Iterator<Item = VertexId> + '_ {
        (0..self.used).filter(move |&v| !self.vertices[v].removed)
    }

    /// Returns ids of live, materialized edges in ascending order.
    pub fn edge_ids(&self) -> impl Iterator<Item = EdgeId> + '_ {
        (0..self.edges.len()).filter(move |&e| !self.edges[e].removed)
    }

    /// Returns the destinations of outgoing edges, queued edges included.
    pub fn children(&self, v: VertexId) -> impl Iterator<Item = VertexId> + '_ {
        let v = self.check(v);
        self.vertices[v]
            .out
            .iter()
            .map(move |&e| self.edges[e].dest)
            .chain(
                self.pending
                    .iter()
                    .filter(move |p| p.src == v)
                    .map(|p| p.dest),
            )
    }

    /// Returns the sources of incoming edges, queued edges included.
    pub fn parents(&self, v: VertexId) -> impl Iterator<Item = VertexId> + '_ {
        let v = self.check(v);
        self.vertices[v]
            .inc
            .iter()
            .map(move |&e| self.edges[e].src)
            .chain(
                self.pending
                    .iter()
                    .filter(move |p| p.dest == v)
                    .map(|p| p.src),
            )
    }

    /// Returns ids of materialized outgoing edges.
    pub fn out_edges(&self, v: VertexId) -> &[EdgeId] {
        &self.vertices[self.check(v)].out
    }

    /// Returns the first live vertex (in id order) matching the predicate.
    pub fn find_vertex(&self, mut pred: impl FnMut(&Vertex) -> bool) -> Option<VertexId> {
        self.vertex_ids().find(|&v| pred(&self.vertices[v]))
    }

    /// Returns the performance data attached to the graph.
    pub fn perf_data(&self) -> &PerfDataStore {
        &self.perf
    }

    /// Returns the mutable performance data attached to the graph.
    pub fn perf_data_mut(&mut self) -> &mut PerfDataStore {
        &mut self.perf
    }

    /// Appends a full copy of `other` and returns the image of its vertex 0.
    ///
    /// Edges of the copy are queued, so splicing many graphs costs one flush.
    pub fn splice(&mut self, other: &Graph) -> Result<Option<VertexId>> {
        tracing::debug!(
            "Graph.splice {} vertices, {} edges",
            other.vertex_count(),
            other.edge_count()
        );
        let mut image = vec![None; other.used];
        for v in other.vertex_ids() {
            let nv = self.add_vertex();
            deep_copy_vertex(self, nv, other, v)?;
            image[v] = Some(nv);
        }

        let materialized = other
            .edge_ids()
            .map(|e| &other.edges[e])
            .map(|e| (e.src, e.dest, e.kind, &e.attrs));
        let queued = other
            .pending
            .iter()
            .map(|p| (p.src, p.dest, p.kind, &p.attrs));
        for (src, dest, kind, attrs) in materialized.chain(queued) {
            let (src, dest) = match (image[src], image[dest]) {
                (Some(src), Some(dest)) => (src, dest),
                _ => continue,
            };
            for (name, value) in attrs {
                self.edge_schema.check(name, value)?;
            }
            self.pending.push(PendingEdge {
                src,
                dest,
                kind,
                attrs: attrs.clone(),
            });
        }

        Ok(image.first().copied().flatten())
    }

    /// Panics on ids never handed out; returns the id otherwise.
    fn check(&self, v: VertexId) -> VertexId {
        assert!(
            v < self.used,
            "Vertex {} out of range (graph has {})",
            v,
            self.used
        );
        v
    }

    fn materialize(&mut self, edge: PendingEdge) -> EdgeId {
        let id = self.edges.len();
        self.vertices[edge.src].out.push(id);
        self.vertices[edge.dest].inc.push(id);
        self.edges.push(Edge {
            src: edge.src,
            dest: edge.dest,
            kind: edge.kind,
            attrs: edge.attrs,
            removed: false,
        });
        id
    }
}

/// Copies structure and attributes of `src_id`, except the positional id attribute.
pub fn copy_vertex(dst: &mut Graph, dst_id: VertexId, src: &Graph, src_id: VertexId) -> Result<()> {
    copy_vertex_impl(dst, dst_id, src, src_id, false)
}

/// Copies structure and all attributes of `src_id`, including the id attribute.
pub fn deep_copy_vertex(
    dst: &mut Graph,
    dst_id: VertexId,
    src: &Graph,
    src_id: VertexId,
) -> Result<()> {
    copy_vertex_impl(dst, dst_id, src, src_id, true)
}

fn copy_vertex_impl(
    dst: &mut Graph,
    dst_id: VertexId,
    src: &Graph,
    src_id: VertexId,
    deep: bool,
) -> Result<()> {
    let from = src.vertex(src_id);
    for (name, value) in &from.attrs {
        if deep || name != ATTR_ID {
            dst.vertex_schema.check(name, value)?;
        }
    }
    let dst_id = dst.check(dst_id);
    let to = &mut dst.vertices[dst_id];
    to.kind = from.kind;
    to.name = from.name.clone();
    to.entry_addr = from.entry_addr;
    to.exit_addr = from.exit_addr;
    for (name, value) in &from.attrs {
        if deep || name != ATTR_ID {
            to.attrs.insert(name.clone(), value.clone());
        }
    }
    Ok(())
}
