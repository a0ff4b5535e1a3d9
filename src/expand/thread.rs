//! pag-profile thread expansion.
//!
//! Every thread becomes a pre-order chain of vertex copies. The subtree below
//! a thread creation call belongs to the created threads: it is walked once
//! per matching creation record, hanging from a synthesized create vertex.
//! Joins add a synthesized join vertex that the joined thread's last vertex
//! waits on.

use super::{
    connect_waits, copy_into, is_named_call, synthesize, ExpandStats, ExpansionContext, Spawn,
    SpawnIndex,
};
use crate::config::{
    Config, Map, Set, ATTR_WAIT, ATTR_WAIT_TIME, THREAD_CREATE_VERTEX, THREAD_JOIN_VERTEX,
};
use crate::error::Result;
use crate::graph::Graph;
use crate::model::{MultiProgramAbstractionGraph, ProgramAbstractionGraph};
use crate::resolver::{self, ResolveOptions};
use crate::{Address, ProcId, ThreadId, VertexId};

/// Expands the abstraction graph per spawned thread, for every process.
pub fn expand_threads(
    pag: &ProgramAbstractionGraph,
    ctx: &mut ExpansionContext<'_>,
) -> Result<MultiProgramAbstractionGraph> {
    let entry = match ctx.entry(pag) {
        Some(entry) => entry,
        None => return Ok(MultiProgramAbstractionGraph::empty()),
    };
    let procs = ctx.procs(pag);
    let mut mpag = MultiProgramAbstractionGraph::new(procs.len(), 1);
    let mut widest = 1;

    for proc in procs {
        let mut walker = ThreadWalker {
            pag,
            config: ctx.config,
            index: ctx.index,
            opts: ctx.opts,
            mpag: &mut mpag,
            stats: &mut ctx.stats,
            proc,
            roots: Map::new(),
            copies: Map::new(),
            last: Map::new(),
            expanded: Set::new(),
            joined: Set::new(),
        };
        walker.roots.insert(0, entry);
        walker.walk(0, vec![entry], 0)?;
        walker.place_syncs()?;
        walker.count_unmatched();
        widest = widest.max(walker.expanded.len() + 1);
    }

    let waits = connect_waits(&mut mpag)?;
    tracing::debug!("expand_threads {} wait edges", waits);
    mpag.set_threads(widest);
    Ok(ctx.finish(mpag))
}

/// Copies the threads of one process.
struct ThreadWalker<'a> {
    pag: &'a Graph,
    config: &'a Config,
    index: &'a SpawnIndex,
    opts: ResolveOptions,
    mpag: &'a mut Graph,
    stats: &'a mut ExpandStats,
    proc: ProcId,
    /// Vertex the call paths of each walked thread resolve from.
    roots: Map<ThreadId, VertexId>,
    copies: Map<(ThreadId, VertexId), VertexId>,
    /// Last copy of each finished thread.
    last: Map<ThreadId, VertexId>,
    expanded: Set<ThreadId>,
    joined: Set<usize>,
}

impl<'a> ThreadWalker<'a> {
    /// Copies the subtrees of `starts` in pre-order as one chain hanging
    /// from `attach`; returns the last copy.
    fn walk(&mut self, thread: ThreadId, starts: Vec<VertexId>, attach: VertexId) -> Result<VertexId> {
        let mut cursor = attach;
        let mut stack: Vec<VertexId> = starts.into_iter().rev().collect();

        while let Some(v) = stack.pop() {
            let nv = copy_into(self.mpag, self.pag, v, self.proc, Some(thread))?;
            self.mpag.add_edge(cursor, nv);
            self.copies.insert((thread, v), nv);
            cursor = nv;

            if is_named_call(self.pag, v, &self.config.thread_create) {
                if let Some(last) = self.create_threads(thread, v, cursor)? {
                    cursor = last;
                    continue;
                }
                // No recorded creation: the routine stays in the creator's chain
                self.stats.unspawned_create_sites += 1;
            }
            if is_named_call(self.pag, v, &self.config.thread_join) {
                cursor = self.join_threads(thread, v, cursor)?;
            }
            let children: Vec<VertexId> = self.pag.children(v).collect();
            stack.extend(children.into_iter().rev());
        }

        self.last.insert(thread, cursor);
        Ok(cursor)
    }

    /// Walks the routine below a create vertex once per thread it created;
    /// returns `None` when no creation record resolves to the vertex.
    fn create_threads(
        &mut self,
        thread: ThreadId,
        v: VertexId,
        cursor: VertexId,
    ) -> Result<Option<VertexId>> {
        let index = self.index;
        let spawns: Vec<&Spawn> = index
            .spawns()
            .iter()
            .filter(|s| s.proc == self.proc && s.parent_thread == thread)
            .filter(|s| !self.expanded.contains(&s.thread))
            .filter(|s| self.resolve(thread, &s.parent_path) == Some(v))
            .collect();
        if spawns.is_empty() {
            tracing::debug!("No thread created at vertex {} by thread {}", v, thread);
            return Ok(None);
        }

        let routine: Vec<VertexId> = self.pag.children(v).collect();
        let mut cursor = cursor;
        for spawn in spawns {
            self.expanded.insert(spawn.thread);
            self.roots.insert(spawn.thread, v);
            let cv = synthesize(self.mpag, self.pag, v, THREAD_CREATE_VERTEX, self.proc, spawn.thread)?;
            self.mpag.add_edge(cursor, cv);
            cursor = cv;
            self.walk(spawn.thread, routine.clone(), cv)?;
        }
        Ok(Some(cursor))
    }

    /// Adds a join vertex per thread joined here; the joined thread's last
    /// copy waits on it.
    fn join_threads(&mut self, thread: ThreadId, v: VertexId, cursor: VertexId) -> Result<VertexId> {
        let index = self.index;
        let joins: Vec<(usize, ThreadId)> = index
            .joins()
            .iter()
            .enumerate()
            .filter(|(j, join)| {
                join.proc == self.proc && join.joiner_thread == thread && !self.joined.contains(j)
            })
            .filter(|(_, join)| self.resolve(thread, &join.joiner_path) == Some(v))
            .map(|(j, join)| (j, join.thread))
            .collect();

        let mut cursor = cursor;
        for (j, joined) in joins {
            let last = match self.last.get(&joined) {
                Some(&last) => last,
                None => continue,
            };
            self.joined.insert(j);
            let jv = synthesize(self.mpag, self.pag, v, THREAD_JOIN_VERTEX, self.proc, thread)?;
            self.mpag.add_edge(cursor, jv);
            self.mpag.set_vertex_attr(last, ATTR_WAIT, jv)?;
            cursor = jv;
        }
        Ok(cursor)
    }

    /// Records a timed wait between the copies of both ends of every
    /// synchronization record of the process.
    fn place_syncs(&mut self) -> Result<()> {
        let index = self.index;
        for sync in index.syncs().iter().filter(|s| s.src_proc == self.proc) {
            let src = self.place(sync.src_thread, &sync.src_path);
            let dest = self.place(sync.dest_thread, &sync.dest_path);
            match (src, dest) {
                (Some(src), Some(dest)) => {
                    self.mpag.set_vertex_attr(src, ATTR_WAIT, dest)?;
                    self.mpag.set_vertex_attr(src, ATTR_WAIT_TIME, sync.value)?;
                }
                _ => self.stats.unmatched_syncs += 1,
            }
        }
        Ok(())
    }

    fn count_unmatched(&mut self) {
        let proc = self.proc;
        let creates = self
            .index
            .spawns()
            .iter()
            .filter(|s| s.proc == proc && !self.expanded.contains(&s.thread))
            .count();
        let joins = self
            .index
            .joins()
            .iter()
            .enumerate()
            .filter(|(j, join)| join.proc == proc && !self.joined.contains(j))
            .count();
        self.stats.unmatched_creates += creates;
        self.stats.unmatched_joins += joins;
    }

    /// Returns the copy of the vertex a call path of the thread resolves to.
    fn place(&self, thread: ThreadId, path: &[Address]) -> Option<VertexId> {
        let v = self.resolve(thread, path)?;
        self.copies.get(&(thread, v)).copied()
    }

    fn resolve(&self, thread: ThreadId, path: &[Address]) -> Option<VertexId> {
        let root = *self.roots.get(&thread)?;
        resolver::resolve_path(self.pag, root, path, &self.opts)
    }
}
