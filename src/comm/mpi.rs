//! pag-profile MPI-info trace parser.
//!
//! ```text
//! <op char> <hex addr>... | <src> <dest> <tag>[, <src> <dest> <tag>]... | <count> | <elapsed time>
//! ```
//!
//! Collectives carry `-` instead of requests. One file per rank; the rank is
//! the trailing number of the file name.

use super::{CommLog, CommOpKind, CommRecord, CommTriple};
use crate::error::{Error, Result};
use crate::perf::sample::parse_call_path;
use crate::{filebuf, ProcId};
use lazy_static::lazy_static;
use regex::Regex;
use std::io::BufRead;
use std::path::{Path, PathBuf};

/// Parses the trace of one process.
pub fn read_log(proc: ProcId, reader: impl BufRead) -> Result<CommLog> {
    lazy_static! {
        static ref RECORD: Regex =
            Regex::new(r"^\s*([csSrRw])\s+([^|]*)\|([^|]*)\|([^|]*)\|([^|]*)$")
                .expect("Invalid regex");
    }

    let mut records = Vec::new();
    filebuf::for_each_line(reader, |line, lc| {
        let err = || Error::MpiParsing(line.into(), lc);
        let caps = RECORD.captures(line).ok_or_else(err)?;
        let kind = caps[1]
            .chars()
            .next()
            .and_then(CommOpKind::from_char)
            .ok_or_else(err)?;
        let triples = match kind {
            CommOpKind::Collective => Vec::new(),
            _ => parse_triples(&caps[3]).ok_or_else(err)?,
        };
        records.push(CommRecord {
            kind,
            call_path: parse_call_path(&caps[2]).ok_or_else(err)?,
            triples,
            count: caps[4].trim().parse().map_err(|_| err())?,
            time: caps[5].trim().parse().map_err(|_| err())?,
        });
        Ok(())
    })?;

    tracing::debug!("Process {}: {} communication records", proc, records.len());
    Ok(CommLog::new(proc, records))
}

/// Reads the traces of all processes.
///
/// The rank of each file is the trailing number of its name, or its position
/// in `filepaths` without one. A missing file gives an empty log.
pub fn read_logs(filepaths: &[PathBuf]) -> Result<Vec<CommLog>> {
    let mut logs = Vec::with_capacity(filepaths.len());
    for (i, filepath) in filepaths.iter().enumerate() {
        let proc = rank_of(filepath).unwrap_or(i as ProcId);
        let log = match filebuf::open(filepath) {
            Ok(reader) => read_log(proc, reader)?,
            Err(err) if filebuf::is_missing(&err) => {
                tracing::warn!("{}, process {} has no records", err, proc);
                CommLog::new(proc, Vec::new())
            }
            Err(err) => return Err(err),
        };
        logs.push(log);
    }
    Ok(logs)
}

/// Returns the trailing number of the file name, extension excluded.
pub fn rank_of(filepath: &Path) -> Option<ProcId> {
    lazy_static! {
        static ref RANK: Regex = Regex::new(r"(\d+)$").expect("Invalid regex");
    }

    let stem = filepath.file_stem()?.to_str()?;
    RANK.captures(stem)?[1].parse().ok()
}

/// Parses `<rank> <record index>` lines of an interleaving trace.
pub fn read_order(reader: impl BufRead) -> Result<Vec<(ProcId, usize)>> {
    let mut order = Vec::new();
    filebuf::for_each_line(reader, |line, lc| {
        let err = || Error::MpiParsing(line.into(), lc);
        let mut fields = line.split_whitespace();
        let proc = fields.next().and_then(|f| f.parse().ok()).ok_or_else(err)?;
        let index = fields.next().and_then(|f| f.parse().ok()).ok_or_else(err)?;
        order.push((proc, index));
        Ok(())
    })?;
    Ok(order)
}

/// Reads an interleaving trace file.
pub fn read_order_file(filepath: &Path) -> Result<Vec<(ProcId, usize)>> {
    read_order(filebuf::open(filepath)?)
}

fn parse_triples(info: &str) -> Option<Vec<CommTriple>> {
    let info = info.trim();
    if info.is_empty() || info == "-" {
        return Some(Vec::new());
    }
    info.split(',')
        .map(|t| {
            let mut fields = t.split_whitespace().map(str::parse::<i32>);
            let triple = CommTriple {
                src: fields.next()?.ok()?,
                dest: fields.next()?.ok()?,
                tag: fields.next()?.ok()?,
            };
            fields.next().is_none().then(|| triple)
        })
        .collect()
}
