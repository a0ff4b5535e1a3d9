//! pag-profile performance samples and the PerfData trace format.
//!
//! ```text
//! <count of vertex records>
//! <hex addr>... | value | procs_id | thread_id
//! <count of edge records>
//! <hex addr>... | <hex addr>... | value | procs_id | out_procs_id | thread_id | out_thread_id
//! ```

use crate::config::FORK_MARK;
use crate::error::{Error, Result};
use crate::{filebuf, Address, CallPath, ProcId, ThreadId};
use std::io::{BufRead, Write};
use std::path::Path;

/// Raw sample of one counter at one call path.
#[derive(Debug, Clone, PartialEq)]
pub struct PerfSample {
    /// Return addresses, innermost first.
    pub call_path: CallPath,
    /// Process the sample was taken in.
    pub proc: ProcId,
    /// Thread the sample was taken in.
    pub thread: ThreadId,
    /// Sampled value.
    pub value: f64,
}

/// Raw relation between two call paths, possibly in different threads or processes.
#[derive(Debug, Clone, PartialEq)]
pub struct PerfEdgeSample {
    /// Call path at the source side.
    pub src_path: CallPath,
    /// Call path at the destination side.
    pub dest_path: CallPath,
    /// Elapsed time, or [`FORK_MARK`] for thread create/join records.
    pub value: f64,
    /// Source process.
    pub src_proc: ProcId,
    /// Destination process.
    pub dest_proc: ProcId,
    /// Source thread.
    pub src_thread: ThreadId,
    /// Destination thread.
    pub dest_thread: ThreadId,
}

impl PerfEdgeSample {
    /// Checks if the record marks a thread create or join.
    pub fn is_fork(&self) -> bool {
        self.value == FORK_MARK
    }
}

/// Contents of a PerfData trace file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PerfTrace {
    /// Vertex records.
    pub samples: Vec<PerfSample>,
    /// Edge records.
    pub edges: Vec<PerfEdgeSample>,
}

/// Section of the trace the parser expects next.
#[derive(Clone, Copy)]
enum Expect {
    SampleCount,
    Samples(usize),
    EdgeCount,
    Edges(usize),
    Done,
}

impl PerfTrace {
    /// Reads a PerfData trace file.
    pub fn read_file(filepath: &Path) -> Result<Self> {
        tracing::debug!("PerfTrace.read_file {:?}", filepath);
        PerfTrace::read(filebuf::open(filepath)?)
    }

    /// Parses a PerfData trace.
    pub fn read(reader: impl BufRead) -> Result<Self> {
        let mut trace = PerfTrace::default();
        let mut expect = Expect::SampleCount;

        filebuf::for_each_line(reader, |line, lc| {
            let err = || Error::PerfDataParsing(line.into(), lc);
            expect = match expect {
                Expect::SampleCount => {
                    let n = line.trim().parse::<usize>().map_err(|_| err())?;
                    trace.samples.reserve(n);
                    if n == 0 {
                        Expect::EdgeCount
                    } else {
                        Expect::Samples(n)
                    }
                }
                Expect::Samples(left) => {
                    trace.samples.push(parse_sample(line).ok_or_else(err)?);
                    if left == 1 {
                        Expect::EdgeCount
                    } else {
                        Expect::Samples(left - 1)
                    }
                }
                Expect::EdgeCount => {
                    let n = line.trim().parse::<usize>().map_err(|_| err())?;
                    trace.edges.reserve(n);
                    if n == 0 {
                        Expect::Done
                    } else {
                        Expect::Edges(n)
                    }
                }
                Expect::Edges(left) => {
                    trace.edges.push(parse_edge(line).ok_or_else(err)?);
                    if left == 1 {
                        Expect::Done
                    } else {
                        Expect::Edges(left - 1)
                    }
                }
                Expect::Done => {
                    tracing::warn!("Ignoring trailing PerfData line {}: '{}'", lc, line);
                    Expect::Done
                }
            };
            Ok(())
        })?;

        match expect {
            Expect::Samples(left) => Err(Error::PerfDataTruncated(
                trace.samples.len() + left,
                trace.samples.len(),
            )),
            Expect::Edges(left) => Err(Error::PerfDataTruncated(
                trace.edges.len() + left,
                trace.edges.len(),
            )),
            _ => Ok(trace),
        }
    }

    /// Writes the trace into a file.
    pub fn write_file(&self, filepath: &Path) -> Result<()> {
        self.write(filebuf::open_w(filepath)?)
    }

    /// Writes the trace in the PerfData format.
    pub fn write(&self, mut output: impl Write) -> Result<()> {
        writeln!(output, "{}", self.samples.len())?;
        for s in &self.samples {
            writeln!(
                output,
                "{}|{}|{}|{}",
                format_call_path(&s.call_path),
                s.value,
                s.proc,
                s.thread
            )?;
        }
        write_edges(&mut output, &self.edges)?;
        output.flush()?;
        Ok(())
    }
}

/// Writes the edge section: count line, then one line per edge.
pub fn write_edges(mut output: impl Write, edges: &[PerfEdgeSample]) -> Result<()> {
    writeln!(output, "{}", edges.len())?;
    for e in edges {
        writeln!(
            output,
            "{}|{}|{}|{}|{}|{}|{}",
            format_call_path(&e.src_path),
            format_call_path(&e.dest_path),
            e.value,
            e.src_proc,
            e.dest_proc,
            e.src_thread,
            e.dest_thread
        )?;
    }
    Ok(())
}

/// Parses space separated hex addresses, with or without `0x`.
pub fn parse_call_path(s: &str) -> Option<CallPath> {
    s.split_whitespace()
        .map(|a| Address::from_str_radix(a.trim_start_matches("0x"), 16).ok())
        .collect()
}

/// Formats a call path as space separated hex addresses.
pub fn format_call_path(path: &[Address]) -> String {
    path.iter()
        .map(|a| format!("{:x}", a))
        .collect::<Vec<_>>()
        .join(" ")
}

fn parse_sample(line: &str) -> Option<PerfSample> {
    let mut fields = line.split('|').map(str::trim);
    let sample = PerfSample {
        call_path: parse_call_path(fields.next()?)?,
        value: fields.next()?.parse().ok()?,
        proc: fields.next()?.parse().ok()?,
        thread: fields.next()?.parse().ok()?,
    };
    Some(sample)
}

fn parse_edge(line: &str) -> Option<PerfEdgeSample> {
    let mut fields = line.split('|').map(str::trim);
    let edge = PerfEdgeSample {
        src_path: parse_call_path(fields.next()?)?,
        dest_path: parse_call_path(fields.next()?)?,
        value: fields.next()?.parse().ok()?,
        src_proc: fields.next()?.parse().ok()?,
        dest_proc: fields.next()?.parse().ok()?,
        src_thread: fields.next()?.parse().ok()?,
        dest_thread: fields.next()?.parse().ok()?,
    };
    Some(edge)
}
