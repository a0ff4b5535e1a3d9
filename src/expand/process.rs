//! pag-profile process expansion.
//!
//! The abstraction graph is numbered once in pre-order and replicated per
//! process: the copy of sequence index `i` for rank `r` is vertex
//! `1 + r * len + i`, vertex 0 being the synthesized root. Every rank thus
//! owns a disjoint id range and cross-process edges are plain arithmetic.

use super::{copy_into, ExpansionContext};
use crate::config::{Map, ATTR_TIME};
use crate::error::Result;
use crate::model::{MultiProgramAbstractionGraph, ProgramAbstractionGraph};
use crate::resolver;
use crate::{Address, ProcId, VertexId};

/// Replicates the abstraction graph per process and adds communication edges.
pub fn expand_processes(
    pag: &ProgramAbstractionGraph,
    ctx: &mut ExpansionContext<'_>,
) -> Result<MultiProgramAbstractionGraph> {
    let entry = match ctx.entry(pag) {
        Some(entry) => entry,
        None => return Ok(MultiProgramAbstractionGraph::empty()),
    };
    let count = match ctx.processes {
        Some(n) => n,
        None => ctx
            .procs(pag)
            .last()
            .map_or(1, |&p| p as usize + 1),
    };

    let order = pag.preorder(entry);
    let len = order.len();
    let seq: Map<VertexId, usize> = order.iter().enumerate().map(|(i, &v)| (v, i)).collect();
    let id = |rank: usize, i: usize| 1 + rank * len + i;

    let mut mpag = MultiProgramAbstractionGraph::new(count, 1);
    for rank in 0..count {
        for (i, &v) in order.iter().enumerate() {
            let nv = copy_into(&mut mpag, pag, v, rank as ProcId, None)?;
            debug_assert_eq!(nv, id(rank, i));
        }
    }
    for rank in 0..count {
        mpag.add_edge_lazy(0, id(rank, 0));
        for (i, &v) in order.iter().enumerate() {
            for c in pag.children(v) {
                if let Some(&ci) = seq.get(&c) {
                    mpag.add_edge_lazy(id(rank, i), id(rank, ci));
                }
            }
        }
    }

    let opts = ctx.opts;
    let place = |proc: ProcId, path: &[Address]| -> Option<VertexId> {
        if proc < 0 || proc as usize >= count {
            return None;
        }
        let v = resolver::resolve_path(pag, entry, path, &opts)?;
        seq.get(&v).map(|&i| id(proc as usize, i))
    };
    let mut placed = Vec::new();
    for comm in ctx.index.comms() {
        match (place(comm.src_proc, &comm.src_path), place(comm.dest_proc, &comm.dest_path)) {
            (Some(src), Some(dest)) => placed.push((src, dest, comm.value)),
            _ => {
                tracing::debug!(
                    "Unmapped communication edge {} -> {}",
                    comm.src_proc,
                    comm.dest_proc
                );
                ctx.stats.unmapped_comm_edges += 1;
            }
        }
    }
    for (src, dest, time) in placed {
        let e = mpag.add_edge(src, dest);
        mpag.set_edge_attr(e, ATTR_TIME, time)?;
    }

    Ok(ctx.finish(mpag))
}
