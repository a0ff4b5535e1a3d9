//! pag-profile inter-procedural linker module.
//!
//! Splices the abstraction graphs of callees below their call sites, starting
//! from the entry function, to build the whole-program abstraction graph.
//! Each function is linked once per pass; a call back into a function still
//! being linked gets one level of its unlinked graph and is tagged recursive.

use crate::config::{Map, Set};
use crate::error::{Error, Result};
use crate::graph::VertexKind;
use crate::model::{FunctionGraphs, ProgramAbstractionGraph, ProgramCallGraph};
use crate::{Address, VertexId};
use serde::Serialize;

#[cfg(test)]
mod tests;

/// Outcome counts of one linking pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LinkStats {
    /// Functions linked.
    pub functions: usize,
    /// Callee graphs spliced.
    pub spliced: usize,
    /// Call sites re-tagged as recursive.
    pub recursive: usize,
    /// Call sites with no call graph target or no callee graph.
    pub unresolved: usize,
}

/// State of one linking pass over a set of function graphs.
///
/// Input graphs are never modified: linked copies are cached per function,
/// and the set of functions being linked guards against recursion.
pub struct LinkingContext<'a> {
    pcg: &'a ProgramCallGraph,
    graphs: &'a FunctionGraphs,
    scanned: Set<Address>,
    linked: Map<Address, ProgramAbstractionGraph>,
    stats: LinkStats,
}

impl<'a> LinkingContext<'a> {
    /// Creates a context over the call graph and the per-function graphs.
    pub fn new(pcg: &'a ProgramCallGraph, graphs: &'a FunctionGraphs) -> Self {
        LinkingContext {
            pcg,
            graphs,
            scanned: Set::new(),
            linked: Map::new(),
            stats: LinkStats::default(),
        }
    }

    /// Returns the counts of the pass.
    pub fn stats(&self) -> LinkStats {
        self.stats
    }

    /// Drops the per-pass bookkeeping so the graphs can be linked again.
    pub fn clear(&mut self) {
        self.scanned.clear();
        self.linked.clear();
        self.stats = LinkStats::default();
    }

    /// Links the function named `name` into a whole-program graph.
    pub fn link_program(&mut self, name: &str) -> Result<ProgramAbstractionGraph> {
        let entry = self
            .graphs
            .entry_of(name)
            .ok_or_else(|| Error::MissingEntry(name.into()))?;
        self.link(entry)
    }

    /// Links the function entered at `entry` and returns a copy of the result.
    pub fn link(&mut self, entry: Address) -> Result<ProgramAbstractionGraph> {
        self.link_function(entry)?;
        self.linked
            .get(&entry)
            .cloned()
            .ok_or_else(|| Error::MissingEntry(format!("0x{:x}", entry)))
    }

    fn link_function(&mut self, entry: Address) -> Result<()> {
        if self.linked.contains_key(&entry) {
            return Ok(());
        }
        let graphs = self.graphs;
        let base = match graphs.get(entry) {
            Some(base) => base,
            None => return Ok(()),
        };
        tracing::debug!("LinkingContext.link_function {}", base.function_name());
        self.scanned.insert(entry);

        let mut pag = base.clone();
        let calls: Vec<VertexId> = base
            .vertex_ids()
            .filter(|&v| base.vertex(v).kind().is_call())
            .collect();
        for call in calls {
            let targets = self.pcg.callees(base.vertex(call).entry_addr());
            let mut spliced = 0;
            for target in targets {
                let callee = match graphs.get(target) {
                    Some(callee) => callee,
                    None => continue,
                };
                let image = if self.linked.contains_key(&target) {
                    pag.splice(&self.linked[&target])?
                } else if self.scanned.contains(&target) {
                    pag.set_vertex_kind(call, VertexKind::CallRecursive);
                    self.stats.recursive += 1;
                    pag.splice(callee)?
                } else {
                    self.link_function(target)?;
                    pag.splice(&self.linked[&target])?
                };
                if let Some(image) = image {
                    pag.add_edge_lazy(call, image);
                    spliced += 1;
                }
            }
            if spliced == 0 {
                self.stats.unresolved += 1;
            }
            self.stats.spliced += spliced;
        }

        pag.prepare();
        self.stats.functions += 1;
        self.linked.insert(entry, pag);
        Ok(())
    }
}

/// Links the entry function with a fresh context.
pub fn link_program(
    pcg: &ProgramCallGraph,
    graphs: &FunctionGraphs,
    entry_function: &str,
) -> Result<(ProgramAbstractionGraph, LinkStats)> {
    let mut ctx = LinkingContext::new(pcg, graphs);
    let pag = ctx.link_program(entry_function)?;
    let stats = ctx.stats();
    tracing::debug!("link_program {:?}", stats);
    Ok((pag, stats))
}
