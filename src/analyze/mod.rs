//! pag-profile analyze command implementation.
//!
//! Loads the structural graphs and traces, links the whole-program graph,
//! embeds the samples, runs the selected expansion and writes the results.
//! Missing inputs degrade the run instead of failing it; every such loss is
//! counted in the [`Diagnostics`] returned with the result.

use crate::config::{Config, CALL_SITE_WINDOW};
use crate::error::{Error, Result};
use crate::expand::{self, ExpandStats, Expansion, ExpansionContext, SpawnIndex};
use crate::graph::Graph;
use crate::link::{self, LinkStats};
use crate::model::{FunctionGraphs, MultiProgramAbstractionGraph, ProgramAbstractionGraph, ProgramCallGraph};
use crate::perf::{self, EmbedStats, PerfTrace, ReduceOp, ThreadAncestry};
use crate::somap::SharedObjectMap;
use crate::{filebuf, global};
use serde::Serialize;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};


/// Input files of a run.
#[derive(Debug, Clone, Default)]
pub struct Inputs {
    /// Directory of per-function graphs with their index file.
    pub graphs: PathBuf,
    /// Program call graph file.
    pub pcg: PathBuf,
    /// PerfData trace.
    pub perf: Option<PathBuf>,
    /// Comm-dependency edge file.
    pub comm: Option<PathBuf>,
    /// Shared object map.
    pub somap: Option<PathBuf>,
    /// Indirect call trace.
    pub indirect: Option<PathBuf>,
}

/// Output files of a run.
#[derive(Debug, Clone, Default)]
pub struct Outputs {
    /// Dump of the resulting graph.
    pub graph: Option<PathBuf>,
    /// JSON dump of the resulting performance data.
    pub perf: Option<PathBuf>,
    /// JSON dump of the diagnostics.
    pub diagnostics: Option<PathBuf>,
}

/// Expansion parameters of a run.
#[derive(Debug, Clone, Copy)]
pub struct Options {
    /// Expansion to run.
    pub expansion: Expansion,
    /// Number of processes, derived from the data when absent.
    pub processes: Option<usize>,
    /// Number of workers per parallel region, derived from the data when absent.
    pub threads: Option<usize>,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            expansion: Expansion::None,
            processes: None,
            threads: None,
        }
    }
}

/// Data quality summary of a run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Diagnostics {
    /// Inputs read.
    pub loaded: Vec<String>,
    /// Inputs given but not found.
    pub missing: Vec<String>,
    /// Entry function not found among the function graphs.
    pub missing_entry: Option<String>,
    /// Functions of the call graph.
    pub functions: usize,
    /// Per-function graphs loaded.
    pub function_graphs: usize,
    /// Call-path frames rebased into the analyzed binary.
    pub rebased_frames: usize,
    /// Dynamic call edges from the indirect call trace.
    pub indirect_calls: usize,
    /// Dynamic call edges from thread creation records.
    pub spawn_calls: usize,
    /// Linking counts.
    pub link: LinkStats,
    /// Sample embedding counts.
    pub embed: EmbedStats,
    /// Edge records fitting no role.
    pub dropped_edge_records: usize,
    /// Expansion counts, when an expansion ran.
    pub expand: Option<ExpandStats>,
    /// Metric the samples were embedded under.
    pub metric: String,
    /// Grand total of the metric.
    pub total: f64,
}

impl Diagnostics {
    /// Writes the diagnostics as JSON.
    pub fn write_json(&self, mut output: impl Write) -> Result<()> {
        serde_json::to_writer_pretty(&mut output, self)?;
        writeln!(output)?;
        output.flush()?;
        Ok(())
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Loaded inputs: {}", list(&self.loaded))?;
        writeln!(f, "Missing inputs: {}", list(&self.missing))?;
        if let Some(entry) = &self.missing_entry {
            writeln!(f, "Missing entry function: {}, nothing linked", entry)?;
        }
        writeln!(
            f,
            "Functions: {} in call graph, {} with graphs",
            self.functions, self.function_graphs
        )?;
        writeln!(
            f,
            "Dynamic calls: {} indirect, {} from thread creation",
            self.indirect_calls, self.spawn_calls
        )?;
        writeln!(
            f,
            "Linking: {} functions, {} callees spliced, {} recursive, {} unresolved calls",
            self.link.functions, self.link.spliced, self.link.recursive, self.link.unresolved
        )?;
        writeln!(
            f,
            "Samples: {} read, {} resolved, {} approximate, {} unresolved, {} of unknown threads",
            self.embed.samples,
            self.embed.resolved,
            self.embed.approximate,
            self.embed.unresolved,
            self.embed.unknown_threads
        )?;
        writeln!(
            f,
            "Edge records: {} dropped, {} frames rebased",
            self.dropped_edge_records, self.rebased_frames
        )?;
        if let Some(expand) = &self.expand {
            writeln!(
                f,
                "Expansion: {} vertices, {} edges, {} regions",
                expand.vertices, expand.edges, expand.regions
            )?;
            writeln!(
                f,
                "Unmatched: {} creates, {} create sites, {} joins, {} syncs, {} comm edges",
                expand.unmatched_creates,
                expand.unspawned_create_sites,
                expand.unmatched_joins,
                expand.unmatched_syncs,
                expand.unmapped_comm_edges
            )?;
        }
        write!(f, "Total {}: {}", self.metric, self.total)
    }
}

fn list(names: &[String]) -> String {
    if names.is_empty() {
        "-".into()
    } else {
        names.join(", ")
    }
}

/// Result of a run.
#[derive(Debug)]
pub struct Analysis {
    /// Whole-program graph with embedded samples.
    pub pag: ProgramAbstractionGraph,
    /// Expanded graph, when an expansion ran.
    pub mpag: Option<MultiProgramAbstractionGraph>,
    /// Data quality summary.
    pub diagnostics: Diagnostics,
}

/// Runs the whole analysis.
pub fn run(config: &Config, inputs: &Inputs, options: &Options, outputs: &Outputs) -> Result<Analysis> {
    let mut diagnostics = Diagnostics {
        metric: config.metric.clone(),
        ..Diagnostics::default()
    };

    global::stage("Loading inputs");
    let graphs = load(&mut diagnostics, "graphs", Some(inputs.graphs.as_path()), |p| {
        FunctionGraphs::read_dir(p)
    })?
    .unwrap_or_default();
    let mut pcg = load(&mut diagnostics, "pcg", Some(inputs.pcg.as_path()), |p| {
        ProgramCallGraph::read_file(p)
    })?
    .unwrap_or_default();
    let mut trace = load(&mut diagnostics, "perf", inputs.perf.as_deref(), |p| {
        PerfTrace::read_file(p)
    })?
    .unwrap_or_default();
    if let Some(comm) = load(&mut diagnostics, "comm", inputs.comm.as_deref(), |p| {
        PerfTrace::read_file(p)
    })? {
        trace.edges.extend(comm.edges);
    }
    let somap = load(&mut diagnostics, "somap", inputs.somap.as_deref(), |p| {
        SharedObjectMap::read_file(p)
    })?;
    diagnostics.functions = pcg.function_count();
    diagnostics.function_graphs = graphs.len();

    if let (Some(somap), Some(binary)) = (&somap, &config.binary) {
        global::stage("Rebasing call paths");
        diagnostics.rebased_frames = rebase(&mut trace, somap, binary);
    }

    global::stage("Adding dynamic calls");
    if let Some(indirect) = &inputs.indirect {
        match pcg.read_indirect_calls_file(indirect) {
            Ok(added) => {
                diagnostics.loaded.push("indirect".into());
                diagnostics.indirect_calls = added;
            }
            Err(err) if filebuf::is_missing(&err) => {
                tracing::warn!("{}, skipping indirect calls", err);
                diagnostics.missing.push("indirect".into());
            }
            Err(err) => return Err(err),
        }
    }
    let index = SpawnIndex::new(&trace.edges);
    diagnostics.spawn_calls = index.add_dynamic_calls(&mut pcg, CALL_SITE_WINDOW);
    diagnostics.dropped_edge_records = index.dropped();

    global::stage("Linking");
    let (mut pag, mut mpag) = match link::link_program(&pcg, &graphs, &config.entry_function) {
        Ok((pag, link_stats)) => {
            diagnostics.link = link_stats;
            embed_and_expand(config, options, pag, &trace, &index, &mut diagnostics)?
        }
        Err(Error::MissingEntry(name)) => {
            tracing::warn!("Entry function '{}' not found, skipping embedding and expansion", name);
            diagnostics.missing_entry = Some(name);
            diagnostics.embed.samples = trace.samples.len();
            diagnostics.embed.unresolved = trace.samples.len();
            (ProgramAbstractionGraph::new(&config.entry_function, 0, 0), None)
        }
        Err(err) => return Err(err),
    };

    global::stage("Writing outputs");
    let result: &mut Graph = match &mut mpag {
        Some(mpag) => &mut **mpag,
        None => &mut *pag,
    };
    if let Some(path) = &outputs.graph {
        result.write_file(path)?;
    }
    if let Some(path) = &outputs.perf {
        result.perf_data().write_json(filebuf::open_w(path)?)?;
    }
    if let Some(path) = &outputs.diagnostics {
        diagnostics.write_json(filebuf::open_w(path)?)?;
    }

    Ok(Analysis {
        pag,
        mpag,
        diagnostics,
    })
}

/// Embeds the samples into the linked graph and runs the selected expansion.
fn embed_and_expand(
    config: &Config,
    options: &Options,
    mut pag: ProgramAbstractionGraph,
    trace: &PerfTrace,
    index: &SpawnIndex,
    diagnostics: &mut Diagnostics,
) -> Result<(ProgramAbstractionGraph, Option<MultiProgramAbstractionGraph>)> {
    global::stage("Embedding samples");
    let ancestry = ThreadAncestry::from_spawns(index);
    let opts = config.resolve_options();
    let root = pag.root();
    diagnostics.embed = perf::embed(&mut pag, root, &trace.samples, &ancestry, &config.metric, &opts);
    diagnostics.total = summarize(&mut pag, &config.metric)?;

    global::stage("Expanding");
    let mut ctx = ExpansionContext::new(config, index)
        .with_processes(options.processes)
        .with_threads(options.threads);
    let mut mpag = expand::expand(&pag, options.expansion, &mut ctx)?;
    if let Some(mpag) = &mut mpag {
        diagnostics.expand = Some(ctx.stats());
        summarize(mpag, &config.metric)?;
    }
    Ok((pag, mpag))
}

/// Reads an optional input; a missing file is logged and counted.
fn load<T>(
    diagnostics: &mut Diagnostics,
    name: &str,
    path: Option<&Path>,
    read: impl FnOnce(&Path) -> Result<T>,
) -> Result<Option<T>> {
    let path = match path {
        Some(path) => path,
        None => return Ok(None),
    };
    match read(path) {
        Ok(value) => {
            diagnostics.loaded.push(name.into());
            Ok(Some(value))
        }
        Err(err) if filebuf::is_missing(&err) => {
            tracing::warn!("{}, continuing without {}", err, name);
            diagnostics.missing.push(name.into());
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

/// Rewrites the binary's frames of every sample and edge record.
fn rebase(trace: &mut PerfTrace, somap: &SharedObjectMap, binary: &str) -> usize {
    let mut rebased = 0;
    for sample in &mut trace.samples {
        rebased += somap.rebase(&mut sample.call_path, binary);
    }
    for edge in &mut trace.edges {
        rebased += somap.rebase(&mut edge.src_path, binary);
        rebased += somap.rebase(&mut edge.dest_path, binary);
    }
    rebased
}

/// Reduces the metric and derives its share of the total.
fn summarize(graph: &mut Graph, metric: &str) -> Result<f64> {
    let total = graph.reduce_perf_data(metric, ReduceOp::Sum)?;
    let reduced = ReduceOp::Sum.derived_name(metric);
    graph.to_percent(&reduced, total, &format!("{}_PCT", metric))?;
    Ok(total)
}
