//! pag-profile communication dependency module.
//!
//! Pairs point-to-point operations recorded per process into timing edges.
//! Every completion (receive or wait) looks up the first send still present
//! in the log of the process its request names as source; a matched send is
//! consumed, so one physical send satisfies at most one completion.

use crate::config::Set;
use crate::error::Result;
use crate::perf::sample::write_edges;
use crate::perf::PerfEdgeSample;
use crate::{filebuf, global, CallPath, ProcId};
use serde::Serialize;
use std::fmt;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

mod mpi;

#[cfg(test)]
mod tests;

pub use mpi::{read_log, read_logs, read_order, read_order_file, rank_of};

/// Kind of a recorded communication operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CommOpKind {
    /// Collective operation, never matched.
    Collective,
    /// Blocking send.
    Send,
    /// Non-blocking send.
    Isend,
    /// Blocking receive.
    Recv,
    /// Non-blocking receive, completed by a wait.
    Irecv,
    /// Completion of non-blocking requests.
    Wait,
}

impl CommOpKind {
    /// Parses the operation character of an MPI-info trace line.
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'c' => Some(Self::Collective),
            's' => Some(Self::Send),
            'S' => Some(Self::Isend),
            'r' => Some(Self::Recv),
            'R' => Some(Self::Irecv),
            'w' => Some(Self::Wait),
            _ => None,
        }
    }

    /// Returns the operation character of an MPI-info trace line.
    pub fn as_char(&self) -> char {
        match self {
            Self::Collective => 'c',
            Self::Send => 's',
            Self::Isend => 'S',
            Self::Recv => 'r',
            Self::Irecv => 'R',
            Self::Wait => 'w',
        }
    }

    /// Checks if the operation sends data.
    pub fn is_send(&self) -> bool {
        matches!(self, Self::Send | Self::Isend)
    }

    /// Checks if the operation completes a receive.
    pub fn is_completion(&self) -> bool {
        matches!(self, Self::Recv | Self::Wait)
    }
}

/// One point-to-point request: source rank, destination rank and tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CommTriple {
    /// Sending rank.
    pub src: ProcId,
    /// Receiving rank.
    pub dest: ProcId,
    /// Message tag.
    pub tag: i32,
}

impl CommTriple {
    /// Checks if the request names a remote party.
    pub fn is_remote(&self) -> bool {
        self.src >= 0 && self.dest >= 0 && self.tag >= 0 && self.src != self.dest
    }
}

/// One line of an MPI-info trace.
#[derive(Debug, Clone, PartialEq)]
pub struct CommRecord {
    /// Operation kind.
    pub kind: CommOpKind,
    /// Call path of the operation, innermost first.
    pub call_path: CallPath,
    /// Requests carried by the operation.
    pub triples: Vec<CommTriple>,
    /// Element count.
    pub count: u64,
    /// Elapsed time of the operation.
    pub time: f64,
}

/// Operation log of one process, in file order.
///
/// Consumed sends leave an empty slot, so record indices stay valid for the
/// interleaving order of the sequential matcher.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommLog {
    proc: ProcId,
    records: Vec<Option<CommRecord>>,
}

impl CommLog {
    /// Creates a log of the process from its records.
    pub fn new(proc: ProcId, records: Vec<CommRecord>) -> Self {
        CommLog {
            proc,
            records: records.into_iter().map(Some).collect(),
        }
    }

    /// Returns the rank of the process.
    pub fn proc(&self) -> ProcId {
        self.proc
    }

    /// Returns the number of record slots, consumed ones included.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Checks if the log has no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Returns the record at `index` unless it was consumed.
    pub fn get(&self, index: usize) -> Option<&CommRecord> {
        self.records.get(index)?.as_ref()
    }

    /// Returns the records not consumed yet.
    pub fn records(&self) -> impl Iterator<Item = &CommRecord> + '_ {
        self.records.iter().flatten()
    }

    /// Returns the sends not consumed yet.
    pub fn sends(&self) -> impl Iterator<Item = &CommRecord> + '_ {
        self.records().filter(|r| r.kind.is_send())
    }

    /// Returns the index of the first present send carrying `triple`
    /// among the first `visible` records.
    fn find_send(&self, triple: &CommTriple, visible: usize) -> Option<usize> {
        self.records
            .iter()
            .take(visible)
            .position(|r| matches!(r, Some(r) if r.kind.is_send() && r.triples.contains(triple)))
    }

    fn take(&mut self, index: usize) -> Option<CommRecord> {
        self.records.get_mut(index)?.take()
    }
}

/// Timing edge `dest <- src` between two matched operations.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommDependencyEdge {
    /// Process of the source operation.
    pub src_proc: ProcId,
    /// Process of the destination operation.
    pub dest_proc: ProcId,
    /// Kind of the source operation.
    pub src_kind: CommOpKind,
    /// Kind of the destination operation.
    pub dest_kind: CommOpKind,
    /// Call path of the source operation.
    pub src_path: CallPath,
    /// Call path of the destination operation.
    pub dest_path: CallPath,
    /// Elapsed time attributed to the edge.
    pub time: f64,
}

type EdgeKey = (CommOpKind, CommOpKind, CallPath, CallPath, ProcId, ProcId);

impl CommDependencyEdge {
    fn key(&self) -> EdgeKey {
        (
            self.dest_kind,
            self.src_kind,
            self.dest_path.clone(),
            self.src_path.clone(),
            self.dest_proc,
            self.src_proc,
        )
    }

    /// Converts the edge into a PerfData edge record of the root threads.
    pub fn to_edge_sample(&self) -> PerfEdgeSample {
        PerfEdgeSample {
            src_path: self.src_path.clone(),
            dest_path: self.dest_path.clone(),
            value: self.time,
            src_proc: self.src_proc,
            dest_proc: self.dest_proc,
            src_thread: 0,
            dest_thread: 0,
        }
    }
}

/// Outcome counts of one matching pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MatchStats {
    /// Completion records examined.
    pub completions: usize,
    /// Requests skipped for naming no remote party.
    pub skipped: usize,
    /// Requests matched to a send.
    pub matched: usize,
    /// Matches discarded as duplicates of a recorded edge.
    pub duplicates: usize,
    /// Requests with no send left to match.
    pub unmatched: usize,
    /// Reverse edges added for blocking sends.
    pub reverse: usize,
}

impl fmt::Display for MatchStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Completions: {}, matched: {}, duplicates: {}, unmatched: {}, skipped: {}, reverse edges: {}",
            self.completions,
            self.matched,
            self.duplicates,
            self.unmatched,
            self.skipped,
            self.reverse
        )
    }
}

/// Matching state: the edges found so far and their keys.
#[derive(Default)]
struct Matcher {
    edges: Vec<CommDependencyEdge>,
    keys: Set<EdgeKey>,
    stats: MatchStats,
}

impl Matcher {
    /// Matches every request of the completion record against the logs,
    /// looking only at the first `visible(log)` records of each source log.
    fn complete(
        &mut self,
        logs: &mut [CommLog],
        proc: ProcId,
        completion: &CommRecord,
        visible: impl Fn(&CommLog) -> usize,
    ) {
        self.stats.completions += 1;
        for triple in &completion.triples {
            if !triple.is_remote() || triple.dest != proc {
                self.stats.skipped += 1;
                continue;
            }
            let source = match logs.iter_mut().find(|l| l.proc == triple.src) {
                Some(source) => source,
                None => {
                    self.stats.unmatched += 1;
                    continue;
                }
            };
            let send = source
                .find_send(triple, visible(source))
                .and_then(|i| source.take(i));
            let send = match send {
                Some(send) => send,
                None => {
                    self.stats.unmatched += 1;
                    continue;
                }
            };
            self.stats.matched += 1;

            let edge = CommDependencyEdge {
                src_proc: triple.src,
                dest_proc: proc,
                src_kind: send.kind,
                dest_kind: completion.kind,
                src_path: send.call_path.clone(),
                dest_path: completion.call_path.clone(),
                time: completion.time,
            };
            if !self.keys.insert(edge.key()) {
                tracing::debug!("Duplicate communication edge {} -> {}", triple.src, proc);
                self.stats.duplicates += 1;
                continue;
            }
            self.edges.push(edge);

            if send.kind == CommOpKind::Send {
                let reverse = CommDependencyEdge {
                    src_proc: proc,
                    dest_proc: triple.src,
                    src_kind: completion.kind,
                    dest_kind: send.kind,
                    src_path: completion.call_path.clone(),
                    dest_path: send.call_path,
                    time: send.time,
                };
                if self.keys.insert(reverse.key()) {
                    self.edges.push(reverse);
                    self.stats.reverse += 1;
                }
            }
        }
    }

    fn finish(self) -> (Vec<CommDependencyEdge>, MatchStats) {
        tracing::debug!("Matched {} communication edges, {:?}", self.edges.len(), self.stats);
        (self.edges, self.stats)
    }
}

/// Matches completions against sends, process by process in file order.
/// Matched sends are removed from `logs`.
pub fn match_logs(logs: &mut [CommLog]) -> (Vec<CommDependencyEdge>, MatchStats) {
    let mut matcher = Matcher::default();
    for l in 0..logs.len() {
        let proc = logs[l].proc;
        for i in 0..logs[l].len() {
            let completion = match logs[l].get(i) {
                Some(r) if r.kind.is_completion() => r.clone(),
                _ => continue,
            };
            matcher.complete(logs, proc, &completion, CommLog::len);
        }
    }
    matcher.finish()
}

/// Matches completions in the interleaving `order` of `(rank, record index)`
/// pairs. A completion only sees the sends of its source process that come
/// before it in the order. Matched sends are removed from `logs`.
pub fn match_sequential(
    logs: &mut [CommLog],
    order: &[(ProcId, usize)],
) -> (Vec<CommDependencyEdge>, MatchStats) {
    let mut matcher = Matcher::default();
    let mut seen: Vec<usize> = vec![0; logs.len()];
    for &(proc, index) in order {
        let l = match logs.iter().position(|l| l.proc == proc) {
            Some(l) => l,
            None => {
                tracing::warn!("Interleaving names unknown process {}", proc);
                continue;
            }
        };
        if index >= logs[l].len() {
            tracing::warn!("Interleaving names record {} past the log of process {}", index, proc);
            continue;
        }
        seen[l] = seen[l].max(index + 1);
        let completion = match logs[l].get(index) {
            Some(r) if r.kind.is_completion() => r.clone(),
            _ => continue,
        };
        let procs: Vec<ProcId> = logs.iter().map(|l| l.proc).collect();
        matcher.complete(logs, proc, &completion, |log| {
            procs
                .iter()
                .position(|&p| p == log.proc)
                .map_or(0, |i| seen[i])
        });
    }
    matcher.finish()
}

/// Writes edges in the comm-dependency format: an empty vertex section,
/// then the edge count and one `src|dest|time|src proc|dest proc|0|0` line
/// per edge. The file reads back as a PerfData trace.
pub fn write_edges_to(mut output: impl Write, edges: &[CommDependencyEdge]) -> Result<()> {
    writeln!(output, "0")?;
    let samples: Vec<PerfEdgeSample> = edges.iter().map(|e| e.to_edge_sample()).collect();
    write_edges(&mut output, &samples)?;
    output.flush()?;
    Ok(())
}

/// Writes the comm-dependency edge file.
pub fn write_edges_file(filepath: &Path, edges: &[CommDependencyEdge]) -> Result<()> {
    tracing::debug!("write_edges_file {:?}, {} edges", filepath, edges.len());
    write_edges_to(filebuf::open_w(filepath)?, edges)
}

/// Matches the MPI-info traces of all processes and writes the edges.
pub fn run(
    log_paths: &[PathBuf],
    order_path: Option<&Path>,
    output_path: Option<&Path>,
) -> Result<MatchStats> {
    global::stage("Reading MPI traces");
    let mut logs = read_logs(log_paths)?;

    global::stage("Matching communication");
    let (edges, stats) = match order_path {
        Some(order_path) => {
            let order = read_order_file(order_path)?;
            match_sequential(&mut logs, &order)
        }
        None => match_logs(&mut logs),
    };

    match output_path {
        None => write_edges_to(io::stdout(), &edges)?,
        Some(output_path) => write_edges_file(output_path, &edges)?,
    }
    Ok(stats)
}
