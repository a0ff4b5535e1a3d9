//! pag-profile parallel region expansion.
//!
//! A fork call with children opens a region: its subtree, followed by the
//! siblings up to a join call when there is one, is replicated once per
//! worker as parallel chains that rejoin at a synthesized end vertex.
//! Workers are assumed to run the same sequence; only their count and data
//! differ.

use super::{copy_into, is_named_call, synthesize, ExpandStats, ExpansionContext};
use crate::config::{Config, PARALLEL_END_VERTEX};
use crate::error::Result;
use crate::graph::Graph;
use crate::model::{MultiProgramAbstractionGraph, ProgramAbstractionGraph};
use crate::{ProcId, ThreadId, VertexId};

/// Expands every parallel region of the abstraction graph into worker chains.
pub fn expand_openmp(
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
        let mut walker = RegionWalker {
            pag,
            config: ctx.config,
            workers: ctx.threads,
            mpag: &mut mpag,
            stats: &mut ctx.stats,
            proc,
            widest: 1,
        };
        walker.walk(entry, 0)?;
        widest = widest.max(walker.widest);
    }

    mpag.set_threads(widest);
    Ok(ctx.finish(mpag))
}

struct RegionWalker<'a> {
    pag: &'a Graph,
    config: &'a Config,
    workers: Option<usize>,
    mpag: &'a mut Graph,
    stats: &'a mut ExpandStats,
    proc: ProcId,
    widest: usize,
}

impl<'a> RegionWalker<'a> {
    /// Copies the subtree of `v` in pre-order after `cursor`; returns the last copy.
    fn walk(&mut self, v: VertexId, cursor: VertexId) -> Result<VertexId> {
        let nv = copy_into(self.mpag, self.pag, v, self.proc, None)?;
        self.mpag.add_edge(cursor, nv);
        let mut cursor = nv;

        let children: Vec<VertexId> = self.pag.children(v).collect();
        let mut i = 0;
        while i < children.len() {
            let c = children[i];
            if self.is_fork(c) {
                let join = children[i + 1..]
                    .iter()
                    .position(|&s| is_named_call(self.pag, s, &self.config.omp_join))
                    .map(|p| i + 1 + p);
                let end = join.unwrap_or(i + 1);
                cursor = self.region(c, &children[i + 1..end], cursor)?;
                // The join call itself is copied after the rejoin
                i = end;
                continue;
            }
            cursor = self.walk(c, cursor)?;
            i += 1;
        }
        Ok(cursor)
    }

    fn is_fork(&self, v: VertexId) -> bool {
        is_named_call(self.pag, v, &self.config.omp_fork) && self.pag.children(v).next().is_some()
    }

    /// Replicates the region opened by `fork`; returns the synthesized end vertex.
    fn region(&mut self, fork: VertexId, siblings: &[VertexId], cursor: VertexId) -> Result<VertexId> {
        let fc = copy_into(self.mpag, self.pag, fork, self.proc, None)?;
        self.mpag.add_edge(cursor, fc);

        let mut body: Vec<VertexId> = self.pag.preorder(fork).into_iter().skip(1).collect();
        for &s in siblings {
            body.extend(self.pag.preorder(s));
        }

        let mut recorded: Vec<ThreadId> = body
            .iter()
            .flat_map(|&b| self.pag.perf_data().threads(b, self.proc))
            .collect();
        recorded.sort_unstable();
        recorded.dedup();
        let n = self.workers.unwrap_or(recorded.len()).max(1);

        // Thread ordinal i lands on chain i % n
        let mut assigned: Vec<Vec<ThreadId>> = vec![Vec::new(); n];
        for (i, &t) in recorded.iter().enumerate() {
            assigned[i % n].push(t);
        }
        let mut fresh = recorded.last().map_or(0, |&t| t + 1);
        for threads in assigned.iter_mut().filter(|t| t.is_empty()) {
            threads.push(fresh);
            fresh += 1;
        }

        let mut ends = Vec::with_capacity(n);
        for threads in &assigned {
            let mut chain = fc;
            for &b in &body {
                let nb = copy_into(self.mpag, self.pag, b, self.proc, Some(threads[0]))?;
                for &t in &threads[1..] {
                    self.pag
                        .perf_data()
                        .copy_slice(b, self.proc, Some(t), self.mpag.perf_data_mut(), nb);
                }
                self.mpag.add_edge(chain, nb);
                chain = nb;
            }
            ends.push(chain);
        }

        let end = synthesize(self.mpag, self.pag, fork, PARALLEL_END_VERTEX, self.proc, 0)?;
        for last in ends {
            self.mpag.add_edge(last, end);
        }
        self.stats.regions += 1;
        self.widest = self.widest.max(n);
        tracing::debug!(
            "Region at vertex {}: {} vertices x {} workers",
            fork,
            body.len(),
            n
        );
        Ok(end)
    }
}
