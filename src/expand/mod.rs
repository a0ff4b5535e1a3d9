//! pag-profile expansion module.
//!
//! Turns the single-thread program abstraction graph into a multi-program
//! abstraction graph: per spawned thread, per parallel worker, or per process.
//! Thread creation and join records of the PerfData trace are indexed once
//! into a [`SpawnIndex`] and read through an [`ExpansionContext`].

use crate::config::{self, Config, Set, ATTR_ID, ATTR_PROCESS, ATTR_THREAD};
use crate::error::{Error, Result};
use crate::graph::{copy_vertex, EdgeKind, Graph, VertexKind};
use crate::model::{MultiProgramAbstractionGraph, ProgramAbstractionGraph, ProgramCallGraph};
use crate::perf::PerfEdgeSample;
use crate::resolver::ResolveOptions;
use crate::{Address, CallPath, ProcId, ThreadId, VertexId};
use serde::Serialize;
use std::str::FromStr;

mod omp;
mod process;
mod thread;

#[cfg(test)]
mod tests;

pub use omp::expand_openmp;
pub use process::expand_processes;
pub use thread::expand_threads;

/// Creation of a thread.
#[derive(Debug, Clone, PartialEq)]
pub struct Spawn {
    /// Process of both threads.
    pub proc: ProcId,
    /// Creating thread.
    pub parent_thread: ThreadId,
    /// Call path of the creating call.
    pub parent_path: CallPath,
    /// Created thread.
    pub thread: ThreadId,
    /// First call path of the created thread.
    pub child_path: CallPath,
    /// Index of the matching join, if any.
    pub join: Option<usize>,
}

/// Join of a spawned thread.
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    /// Process of both threads.
    pub proc: ProcId,
    /// Joined thread.
    pub thread: ThreadId,
    /// Last call path of the joined thread.
    pub last_path: CallPath,
    /// Joining thread.
    pub joiner_thread: ThreadId,
    /// Call path of the joining call.
    pub joiner_path: CallPath,
}

/// Edge records of a PerfData trace sorted by role.
#[derive(Debug, Clone, Default)]
pub struct SpawnIndex {
    spawns: Vec<Spawn>,
    joins: Vec<Join>,
    syncs: Vec<PerfEdgeSample>,
    comms: Vec<PerfEdgeSample>,
    dropped: usize,
}

impl SpawnIndex {
    /// Sorts edge records into creates, joins, synchronizations and
    /// cross-process communication.
    ///
    /// A fork record whose destination thread has not been seen is a create;
    /// otherwise it joins its source thread if that thread is still open.
    /// Any other fork record is dropped.
    pub fn new(edges: &[PerfEdgeSample]) -> Self {
        let mut index = SpawnIndex::default();
        let mut known: Set<(ProcId, ThreadId)> = Set::new();
        let mut open: Vec<((ProcId, ThreadId), usize)> = Vec::new();

        for edge in edges {
            if !edge.is_fork() {
                if edge.src_proc != edge.dest_proc {
                    index.comms.push(edge.clone());
                } else if edge.src_thread != edge.dest_thread {
                    index.syncs.push(edge.clone());
                } else {
                    index.dropped += 1;
                }
                continue;
            }
            if edge.src_proc != edge.dest_proc {
                index.dropped += 1;
                continue;
            }

            let proc = edge.src_proc;
            let created = (proc, edge.dest_thread);
            if edge.dest_thread != 0 && !known.contains(&created) {
                known.insert(created);
                open.push((created, index.spawns.len()));
                index.spawns.push(Spawn {
                    proc,
                    parent_thread: edge.src_thread,
                    parent_path: edge.src_path.clone(),
                    thread: edge.dest_thread,
                    child_path: edge.dest_path.clone(),
                    join: None,
                });
                continue;
            }

            match open.iter().position(|(key, _)| *key == (proc, edge.src_thread)) {
                Some(pos) => {
                    let (_, s) = open.remove(pos);
                    index.spawns[s].join = Some(index.joins.len());
                    index.joins.push(Join {
                        proc,
                        thread: edge.src_thread,
                        last_path: edge.src_path.clone(),
                        joiner_thread: edge.dest_thread,
                        joiner_path: edge.dest_path.clone(),
                    });
                }
                None => {
                    tracing::debug!(
                        "Dropping fork record {} -> {} of process {}",
                        edge.src_thread,
                        edge.dest_thread,
                        proc
                    );
                    index.dropped += 1;
                }
            }
        }

        tracing::debug!(
            "SpawnIndex {} spawns, {} joins, {} syncs, {} comms, {} dropped",
            index.spawns.len(),
            index.joins.len(),
            index.syncs.len(),
            index.comms.len(),
            index.dropped
        );
        index
    }

    /// Returns thread creations in record order.
    pub fn spawns(&self) -> &[Spawn] {
        &self.spawns
    }

    /// Returns thread joins in record order.
    pub fn joins(&self) -> &[Join] {
        &self.joins
    }

    /// Returns timed relations between threads of one process.
    pub fn syncs(&self) -> &[PerfEdgeSample] {
        &self.syncs
    }

    /// Returns timed relations between processes.
    pub fn comms(&self) -> &[PerfEdgeSample] {
        &self.comms
    }

    /// Returns the number of records fitting no role.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    /// Returns the creation of a thread.
    pub fn spawn_of(&self, proc: ProcId, thread: ThreadId) -> Option<&Spawn> {
        self.spawns
            .iter()
            .find(|s| s.proc == proc && s.thread == thread)
    }

    /// Returns the join matching a creation.
    pub fn join_of(&self, spawn: &Spawn) -> Option<&Join> {
        spawn.join.and_then(|j| self.joins.get(j))
    }

    /// Returns the processes mentioned by any record, in ascending order.
    pub fn procs(&self) -> Vec<ProcId> {
        let mut procs: Vec<ProcId> = self
            .spawns
            .iter()
            .map(|s| s.proc)
            .chain(self.syncs.iter().map(|s| s.src_proc))
            .chain(self.comms.iter().flat_map(|c| [c.src_proc, c.dest_proc]))
            .collect();
        procs.sort_unstable();
        procs.dedup();
        procs
    }

    /// Adds dynamic call edges from thread creation sites to thread routines.
    ///
    /// The creation site is the innermost frame of the creator's path that
    /// returns from a known call site; the routine is the outermost frame of
    /// the created thread's path that falls into a known function.
    /// Returns the number of distinct edges found.
    pub fn add_dynamic_calls(&self, pcg: &mut ProgramCallGraph, window: Address) -> usize {
        let mut added = Set::new();
        for spawn in &self.spawns {
            let call = spawn
                .parent_path
                .iter()
                .find_map(|&a| pcg.call_site_near(a, window));
            let routine = spawn.child_path.iter().rev().find_map(|&a| pcg.function_at(a));
            let (call, routine) = match (call, routine) {
                (Some(call), Some(routine)) => (call, routine),
                _ => {
                    tracing::debug!("No call edge for thread {} of process {}", spawn.thread, spawn.proc);
                    continue;
                }
            };
            let entry = pcg.vertex(routine).entry_addr();
            if let Some(e) = pcg.add_call_edge(call, entry, EdgeKind::DynamicCall) {
                added.insert(e);
            }
        }
        added.len()
    }
}

/// Expansion selected for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expansion {
    /// Keep the program abstraction graph.
    None,
    /// Per spawned thread.
    Threads,
    /// Per parallel-region worker.
    OpenMp,
    /// Per process.
    Processes,
}

impl FromStr for Expansion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(Self::None),
            "threads" => Ok(Self::Threads),
            "openmp" => Ok(Self::OpenMp),
            "processes" => Ok(Self::Processes),
            _ => Err(Error::Expansion(s.into())),
        }
    }
}

/// Outcome counts of one expansion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExpandStats {
    /// Thread creations never placed on a create vertex.
    pub unmatched_creates: usize,
    /// Joins never placed on a join vertex.
    pub unmatched_joins: usize,
    /// Create calls no creation record resolved to; their routine was
    /// copied into the creating thread.
    pub unspawned_create_sites: usize,
    /// Synchronization records whose ends could not be placed.
    pub unmatched_syncs: usize,
    /// Communication edges whose ends could not be placed.
    pub unmapped_comm_edges: usize,
    /// Parallel regions replicated.
    pub regions: usize,
    /// Vertices of the expanded graph.
    pub vertices: usize,
    /// Edges of the expanded graph.
    pub edges: usize,
}

/// State shared by the expansions of one run.
#[derive(Debug)]
pub struct ExpansionContext<'a> {
    config: &'a Config,
    index: &'a SpawnIndex,
    opts: ResolveOptions,
    processes: Option<usize>,
    threads: Option<usize>,
    stats: ExpandStats,
}

impl<'a> ExpansionContext<'a> {
    /// Creates a context over the run's config and spawn index.
    pub fn new(config: &'a Config, index: &'a SpawnIndex) -> Self {
        ExpansionContext {
            config,
            index,
            opts: config.resolve_options(),
            processes: None,
            threads: None,
            stats: ExpandStats::default(),
        }
    }

    /// Fixes the number of processes instead of deriving it from the data.
    pub fn with_processes(mut self, processes: Option<usize>) -> Self {
        self.processes = processes;
        self
    }

    /// Fixes the number of workers per parallel region.
    pub fn with_threads(mut self, threads: Option<usize>) -> Self {
        self.threads = threads;
        self
    }

    /// Returns the counts gathered so far.
    pub fn stats(&self) -> ExpandStats {
        self.stats
    }

    /// Returns the entry function vertex, or `None` with a warning.
    fn entry(&self, pag: &ProgramAbstractionGraph) -> Option<VertexId> {
        let name = &self.config.entry_function;
        let entry = pag.find_vertex(|v| v.kind() == VertexKind::Function && v.name() == name);
        if entry.is_none() {
            tracing::warn!("Entry function '{}' not found, nothing to expand", name);
        }
        entry
    }

    /// Returns the processes to expand: the explicit count, or every
    /// process holding data (at least process 0).
    fn procs(&self, pag: &ProgramAbstractionGraph) -> Vec<ProcId> {
        if let Some(n) = self.processes {
            return (0..n as ProcId).collect();
        }
        let mut procs = pag.perf_data().all_procs();
        procs.extend(self.index.procs());
        procs.push(0);
        procs.sort_unstable();
        procs.dedup();
        procs.retain(|&p| p >= 0);
        procs
    }

    /// Records the size of the finished graph.
    fn finish(&mut self, mut mpag: MultiProgramAbstractionGraph) -> MultiProgramAbstractionGraph {
        mpag.prepare();
        self.stats.vertices = mpag.vertex_count();
        self.stats.edges = mpag.edge_count();
        tracing::debug!("Expansion {:?}", self.stats);
        mpag
    }
}

/// Runs the selected expansion; `None` keeps the abstraction graph.
pub fn expand(
    pag: &ProgramAbstractionGraph,
    expansion: Expansion,
    ctx: &mut ExpansionContext<'_>,
) -> Result<Option<MultiProgramAbstractionGraph>> {
    let mpag = match expansion {
        Expansion::None => return Ok(None),
        Expansion::Threads => expand_threads(pag, ctx)?,
        Expansion::OpenMp => expand_openmp(pag, ctx)?,
        Expansion::Processes => expand_processes(pag, ctx)?,
    };
    Ok(Some(mpag))
}

/// Checks if the vertex is a call whose name is listed.
fn is_named_call(graph: &Graph, v: VertexId, names: &[String]) -> bool {
    let vertex = graph.vertex(v);
    vertex.kind().is_call() && names.iter().any(|n| n == vertex.name())
}

/// Copies a vertex of the abstraction graph together with its performance
/// data slice, tagged with its origin.
fn copy_into(
    mpag: &mut Graph,
    pag: &Graph,
    v: VertexId,
    proc: ProcId,
    thread: Option<ThreadId>,
) -> Result<VertexId> {
    let nv = mpag.add_vertex();
    copy_vertex(mpag, nv, pag, v)?;
    mpag.set_vertex_attr(nv, ATTR_ID, v)?;
    mpag.set_vertex_attr(nv, ATTR_PROCESS, proc)?;
    if let Some(thread) = thread {
        mpag.set_vertex_attr(nv, ATTR_THREAD, thread)?;
    }
    pag.perf_data()
        .copy_slice(v, proc, thread, mpag.perf_data_mut(), nv);
    Ok(nv)
}

/// Adds a vertex standing for a runtime event at the address range of `like`.
fn synthesize(
    mpag: &mut Graph,
    pag: &Graph,
    like: VertexId,
    name: &str,
    proc: ProcId,
    thread: ThreadId,
) -> Result<VertexId> {
    let vertex = pag.vertex(like);
    let nv = mpag.add_vertex_of(VertexKind::Call, name, vertex.entry_addr(), vertex.exit_addr());
    mpag.set_vertex_attr(nv, ATTR_PROCESS, proc)?;
    mpag.set_vertex_attr(nv, ATTR_THREAD, thread)?;
    Ok(nv)
}

/// Adds an edge from every vertex holding a `wait` target to that target,
/// timed when a `wait_time` is present. Returns the number of edges added.
fn connect_waits(mpag: &mut Graph) -> Result<usize> {
    let waits: Vec<(VertexId, VertexId, Option<f64>)> = mpag
        .vertex_ids()
        .filter_map(|v| {
            let target = mpag.vertex_num(v, config::ATTR_WAIT)? as VertexId;
            Some((v, target, mpag.vertex_num(v, config::ATTR_WAIT_TIME)))
        })
        .collect();
    let mut added = 0;
    for (v, target, time) in waits {
        if !mpag.is_vertex(target) {
            continue;
        }
        let e = mpag.add_edge(v, target);
        if let Some(time) = time {
            mpag.set_edge_attr(e, config::ATTR_TIME, time)?;
        }
        added += 1;
    }
    Ok(added)
}
