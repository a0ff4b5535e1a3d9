//! pag-profile sample embedding.
//!
//! Every sample is attached to a structural vertex by call-path resolution.
//! Samples of a spawned thread resolve from the vertex its creator was
//! resolved to, recursively up to the root thread, so each thread lands on
//! its own subtree instance.

use super::PerfSample;
use crate::config::Map;
use crate::expand::SpawnIndex;
use crate::graph::Graph;
use crate::resolver::{self, ResolveOptions};
use crate::{Address, CallPath, ProcId, ThreadId, VertexId};
use serde::Serialize;

/// Creator of every spawned thread, per process.
#[derive(Debug, Clone, Default)]
pub struct ThreadAncestry {
    parents: Map<(ProcId, ThreadId), (CallPath, ThreadId)>,
}

impl ThreadAncestry {
    /// Creates an empty ancestry: every thread is a root thread.
    pub fn new() -> Self {
        ThreadAncestry::default()
    }

    /// Collects the creators recorded in a spawn index.
    pub fn from_spawns(index: &SpawnIndex) -> Self {
        let mut ancestry = ThreadAncestry::new();
        for spawn in index.spawns() {
            ancestry.insert(
                spawn.proc,
                spawn.thread,
                spawn.parent_path.clone(),
                spawn.parent_thread,
            );
        }
        ancestry
    }

    /// Records that `thread` was created by `parent_thread` at `parent_path`.
    pub fn insert(
        &mut self,
        proc: ProcId,
        thread: ThreadId,
        parent_path: CallPath,
        parent_thread: ThreadId,
    ) {
        self.parents
            .insert((proc, thread), (parent_path, parent_thread));
    }

    /// Returns the creation call path and creator thread of a thread.
    pub fn parent(&self, proc: ProcId, thread: ThreadId) -> Option<(&[Address], ThreadId)> {
        self.parents
            .get(&(proc, thread))
            .map(|(path, parent)| (path.as_slice(), *parent))
    }

    /// Checks if the thread is the root thread or has a recorded creator.
    pub fn is_known(&self, proc: ProcId, thread: ThreadId) -> bool {
        thread == 0 || self.parents.contains_key(&(proc, thread))
    }

    /// Returns the number of recorded threads.
    pub fn len(&self) -> usize {
        self.parents.len()
    }

    /// Checks if no spawned thread is recorded.
    pub fn is_empty(&self) -> bool {
        self.parents.is_empty()
    }
}

/// Outcome counts of one embedding run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EmbedStats {
    /// Samples read.
    pub samples: usize,
    /// Samples placed on the vertex covering their innermost frame.
    pub resolved: usize,
    /// Samples placed on the deepest matching ancestor.
    pub approximate: usize,
    /// Samples dropped by the strict miss policy.
    pub unresolved: usize,
    /// Samples of threads with no recorded creator, resolved from the root.
    pub unknown_threads: usize,
}

/// Accumulates `samples` into the graph's performance data under `metric`.
pub fn embed(
    graph: &mut Graph,
    root: VertexId,
    samples: &[PerfSample],
    ancestry: &ThreadAncestry,
    metric: &str,
    opts: &ResolveOptions,
) -> EmbedStats {
    let mut stats = EmbedStats::default();
    let placed: Vec<(VertexId, &PerfSample)> = {
        let view: &Graph = graph;
        let mut roots = ThreadRoots::new(view, root, ancestry, opts);
        samples
            .iter()
            .filter_map(|sample| {
                stats.samples += 1;
                if !ancestry.is_known(sample.proc, sample.thread) {
                    stats.unknown_threads += 1;
                }
                let start = roots.root_of(sample.proc, sample.thread);
                let mut stack = sample.call_path.clone();
                match resolver::resolve_trimmed(view, start, &mut stack, opts) {
                    Some(v) => {
                        match stack.last() {
                            Some(&top) if !view.vertex(v).covers(top, opts.slack) => {
                                stats.approximate += 1
                            }
                            _ => stats.resolved += 1,
                        }
                        Some((v, sample))
                    }
                    None => {
                        stats.unresolved += 1;
                        None
                    }
                }
            })
            .collect()
    };

    let perf = graph.perf_data_mut();
    for (v, sample) in placed {
        perf.accumulate(v, metric, sample.proc, sample.thread, sample.value);
    }

    tracing::debug!("embed {:?}", stats);
    stats
}

/// Memoized start vertices of threads.
struct ThreadRoots<'a> {
    graph: &'a Graph,
    root: VertexId,
    ancestry: &'a ThreadAncestry,
    opts: &'a ResolveOptions,
    memo: Map<(ProcId, ThreadId), VertexId>,
}

impl<'a> ThreadRoots<'a> {
    fn new(
        graph: &'a Graph,
        root: VertexId,
        ancestry: &'a ThreadAncestry,
        opts: &'a ResolveOptions,
    ) -> Self {
        ThreadRoots {
            graph,
            root,
            ancestry,
            opts,
            memo: Map::new(),
        }
    }

    /// Returns the vertex samples of the thread resolve from.
    fn root_of(&mut self, proc: ProcId, thread: ThreadId) -> VertexId {
        self.walk(proc, thread, 0)
    }

    fn walk(&mut self, proc: ProcId, thread: ThreadId, depth: usize) -> VertexId {
        if thread == 0 {
            return self.root;
        }
        if let Some(&v) = self.memo.get(&(proc, thread)) {
            return v;
        }
        let ancestry = self.ancestry;
        let v = match ancestry.parent(proc, thread) {
            // A creator chain longer than the thread count is a cycle
            Some(_) if depth > ancestry.len() => {
                tracing::warn!("Thread {} of process {} has cyclic ancestry", thread, proc);
                self.root
            }
            Some((path, parent)) => {
                let start = self.walk(proc, parent, depth + 1);
                resolver::resolve_path(self.graph, start, path, self.opts).unwrap_or(start)
            }
            None => self.root,
        };
        self.memo.insert((proc, thread), v);
        v
    }
}
