//! pag-profile config module.

use crate::error::{Error, Result};
use crate::filebuf;
use crate::resolver::ResolveOptions;
use crate::Address;
use lazy_static::lazy_static;
use regex::Regex;
use std::io::BufRead;
use std::path::Path;

pub const FAILURE: i32 = 1;

pub const DEFAULT_CONFIG: &str = "pag-profile.conf";
pub const DEFAULT_METRIC: &str = "TOT_CYC";
pub const DEFAULT_ENTRY: &str = "main";

pub const EXPANSIONS: &[&str] = &["none", "threads", "openmp", "processes"];
pub const DEFAULT_EXPANSION: &str = "none";

/// Index file listing per-function graphs inside a graph directory.
pub const GRAPH_INDEX: &str = "index.txt";
/// Extension of per-function graph files.
pub const GRAPH_EXTENSION: &str = "pag";

/// Number of vertex slots a graph grows by when it runs out of room.
pub const VERTEX_CHUNK: usize = 1024;

/// Default tolerance between a return address and its call site.
pub const DEFAULT_SLACK: Address = 4;

/// Largest distance between a call instruction and its return address.
pub const CALL_SITE_WINDOW: Address = 8;

/// Edge sample value marking a thread create/join record.
pub const FORK_MARK: f64 = -1.0;

/// Name of vertices synthesized where a thread is created.
pub const THREAD_CREATE_VERTEX: &str = "thread_create";
/// Name of vertices synthesized where a thread is joined.
pub const THREAD_JOIN_VERTEX: &str = "thread_join";
/// Name of vertices synthesized where parallel workers rejoin.
pub const PARALLEL_END_VERTEX: &str = "parallel_end";

/// Attribute holding the original vertex id of a copied vertex.
pub const ATTR_ID: &str = "id";
/// Attribute holding the target vertex of a synchronization edge.
pub const ATTR_WAIT: &str = "wait";
/// Attribute holding the time of a synchronization edge.
pub const ATTR_WAIT_TIME: &str = "wait_time";
/// Attribute holding the thread a copied vertex belongs to.
pub const ATTR_THREAD: &str = "thread";
/// Attribute holding the process a copied vertex belongs to.
pub const ATTR_PROCESS: &str = "process";
/// Edge attribute holding an elapsed time.
pub const ATTR_TIME: &str = "time";

#[cfg(not(test))]
pub type Set<T> = std::collections::HashSet<T>;
#[cfg(not(test))]
pub type Map<K, V> = std::collections::HashMap<K, V>;

// Use less performant BTree in tests for deterministic sequences
#[cfg(test)]
pub type Set<T> = std::collections::BTreeSet<T>;
#[cfg(test)]
pub type Map<K, V> = std::collections::BTreeMap<K, V>;

/// Tunable parameters of one analysis run.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Address tolerance used by call-path resolution.
    pub slack: Address,
    /// Return the deepest match instead of failing on an unresolved address.
    pub best_ancestor: bool,
    /// Name of the function the whole-program graph is rooted at.
    pub entry_function: String,
    /// Names of thread creation calls.
    pub thread_create: Vec<String>,
    /// Names of thread join calls.
    pub thread_join: Vec<String>,
    /// Names of parallel region fork calls.
    pub omp_fork: Vec<String>,
    /// Names of parallel region join calls.
    pub omp_join: Vec<String>,
    /// Metric samples are embedded under.
    pub metric: String,
    /// Module name of the analyzed binary in the shared object map.
    pub binary: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            slack: DEFAULT_SLACK,
            best_ancestor: true,
            entry_function: DEFAULT_ENTRY.into(),
            thread_create: vec!["pthread_create".into()],
            thread_join: vec!["pthread_join".into()],
            omp_fork: vec!["GOMP_parallel".into(), "__kmpc_fork_call".into()],
            omp_join: vec!["GOMP_parallel_end".into(), "__kmpc_join".into()],
            metric: DEFAULT_METRIC.into(),
            binary: None,
        }
    }
}

impl Config {
    /// Reads the config file if it exists, returns defaults otherwise.
    pub fn read(filepath: &Path) -> Result<Self> {
        if !filepath.exists() {
            tracing::debug!("No config file {:?}, using defaults", filepath);
            return Ok(Config::default());
        }
        Config::parse(filebuf::open(filepath)?)
    }

    /// Parses `key = value` lines on top of the defaults.
    pub fn parse(reader: impl BufRead) -> Result<Self> {
        lazy_static! {
            static ref ENTRY: Regex =
                Regex::new(r"^\s*([a-z_]+)\s*=\s*(.*?)\s*$").expect("Invalid regex");
        }

        let mut config = Config::default();
        filebuf::for_each_line(reader, |line, lc| {
            let err = || Error::ConfigParsing(line.into(), lc);
            let caps = ENTRY.captures(line).ok_or_else(err)?;
            let value = &caps[2];
            match &caps[1] {
                "slack" => config.slack = value.parse().map_err(|_| err())?,
                "best_ancestor" => config.best_ancestor = value.parse().map_err(|_| err())?,
                "entry_function" => config.entry_function = value.into(),
                "thread_create" => config.thread_create = split_names(value),
                "thread_join" => config.thread_join = split_names(value),
                "omp_fork" => config.omp_fork = split_names(value),
                "omp_join" => config.omp_join = split_names(value),
                "metric" => config.metric = value.into(),
                "binary" => config.binary = Some(value.into()),
                _ => return Err(err()),
            }
            Ok(())
        })?;
        Ok(config)
    }

    /// Returns call-path resolution options.
    pub fn resolve_options(&self) -> ResolveOptions {
        ResolveOptions {
            slack: self.slack,
            best_ancestor: self.best_ancestor,
        }
    }
}

fn split_names(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
