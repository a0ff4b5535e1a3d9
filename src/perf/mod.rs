//! pag-profile performance data module.
//!
//! Every graph owns a [`PerfDataStore`]: a nested map
//! vertex → metric → process → thread → value. Repeated samples for one key
//! are merged by addition. Reductions collapse the thread and process levels
//! into one derived numeric vertex attribute.

use crate::config::Map;
use crate::error::Result;
use crate::graph::Graph;
use crate::{ProcId, ThreadId, VertexId};
use serde::Serialize;
use std::io::Write;

pub mod embed;
pub mod sample;


pub use embed::{embed, EmbedStats, ThreadAncestry};
pub use sample::{PerfEdgeSample, PerfSample, PerfTrace};

type ThreadValues = Map<ThreadId, f64>;
type ProcValues = Map<ProcId, ThreadValues>;
type MetricValues = Map<String, ProcValues>;

/// Reduction applied to thread values of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
    /// Sum of values.
    Sum,
    /// Arithmetic mean of values.
    Avg,
}

impl ReduceOp {
    /// Returns the suffix of the derived attribute.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sum => "SUM",
            Self::Avg => "AVG",
        }
    }

    /// Reduces the values; an empty input reduces to zero.
    pub fn apply(&self, values: impl Iterator<Item = f64>) -> f64 {
        let (count, sum) = values.fold((0_usize, 0.0), |(n, s), x| (n + 1, s + x));
        match self {
            Self::Sum => sum,
            Self::Avg if count == 0 => 0.0,
            Self::Avg => sum / count as f64,
        }
    }

    /// Returns the name of the attribute derived from `metric`.
    pub fn derived_name(&self, metric: &str) -> String {
        format!("{}_{}", metric, self.as_str())
    }
}

/// Accumulated performance values keyed by (vertex, metric, process, thread).
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct PerfDataStore {
    data: Map<VertexId, MetricValues>,
}

impl PerfDataStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        PerfDataStore::default()
    }

    /// Checks if the store holds no values.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Overwrites the value of a key.
    pub fn set(&mut self, v: VertexId, metric: &str, proc: ProcId, thread: ThreadId, value: f64) {
        *self.slot(v, metric, proc, thread) = value;
    }

    /// Adds to the value of a key; absent keys start at zero.
    pub fn accumulate(
        &mut self,
        v: VertexId,
        metric: &str,
        proc: ProcId,
        thread: ThreadId,
        value: f64,
    ) {
        *self.slot(v, metric, proc, thread) += value;
    }

    /// Returns the value of a key.
    pub fn get(&self, v: VertexId, metric: &str, proc: ProcId, thread: ThreadId) -> Option<f64> {
        self.data
            .get(&v)?
            .get(metric)?
            .get(&proc)?
            .get(&thread)
            .copied()
    }

    /// Returns the vertices holding data.
    pub fn vertices(&self) -> impl Iterator<Item = VertexId> + '_ {
        self.data.keys().copied()
    }

    /// Returns the metrics recorded for a vertex.
    pub fn metrics(&self, v: VertexId) -> impl Iterator<Item = &str> + '_ {
        self.data
            .get(&v)
            .into_iter()
            .flat_map(|metrics| metrics.keys().map(String::as_str))
    }

    /// Returns the processes recorded for a vertex and metric.
    pub fn procs(&self, v: VertexId, metric: &str) -> Vec<ProcId> {
        self.data
            .get(&v)
            .and_then(|metrics| metrics.get(metric))
            .map(|procs| procs.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Returns `(thread, value)` pairs of one process, ordered by thread.
    pub fn thread_values(&self, v: VertexId, metric: &str, proc: ProcId) -> Vec<(ThreadId, f64)> {
        let mut values: Vec<(ThreadId, f64)> = self
            .data
            .get(&v)
            .and_then(|metrics| metrics.get(metric))
            .and_then(|procs| procs.get(&proc))
            .map(|threads| threads.iter().map(|(t, x)| (*t, *x)).collect())
            .unwrap_or_default();
        values.sort_by_key(|(t, _)| *t);
        values
    }

    /// Returns every `(metric, proc, thread, value)` of a vertex.
    pub fn entries(&self, v: VertexId) -> Vec<(String, ProcId, ThreadId, f64)> {
        let mut entries = Vec::new();
        if let Some(metrics) = self.data.get(&v) {
            for (metric, procs) in metrics {
                for (proc, threads) in procs {
                    for (thread, value) in threads {
                        entries.push((metric.clone(), *proc, *thread, *value));
                    }
                }
            }
        }
        entries
    }

    /// Copies the values of `v` for process `proc` into `dst` under vertex `nv`;
    /// with `thread` set, only that thread's values are copied.
    /// Returns the number of values copied.
    pub fn copy_slice(
        &self,
        v: VertexId,
        proc: ProcId,
        thread: Option<ThreadId>,
        dst: &mut PerfDataStore,
        nv: VertexId,
    ) -> usize {
        let mut copied = 0;
        let metrics = match self.data.get(&v) {
            Some(metrics) => metrics,
            None => return 0,
        };
        for (metric, procs) in metrics {
            let threads = match procs.get(&proc) {
                Some(threads) => threads,
                None => continue,
            };
            for (&t, &value) in threads {
                if thread.map_or(true, |thread| thread == t) {
                    dst.accumulate(nv, metric, proc, t, value);
                    copied += 1;
                }
            }
        }
        copied
    }

    /// Returns the distinct threads holding data for `v` in process `proc`.
    pub fn threads(&self, v: VertexId, proc: ProcId) -> Vec<ThreadId> {
        let mut threads: Vec<ThreadId> = self
            .data
            .get(&v)
            .into_iter()
            .flat_map(|metrics| metrics.values())
            .filter_map(|procs| procs.get(&proc))
            .flat_map(|threads| threads.keys().copied())
            .collect();
        threads.sort_unstable();
        threads.dedup();
        threads
    }

    /// Returns the distinct processes holding data, in ascending order.
    pub fn all_procs(&self) -> Vec<ProcId> {
        let mut procs: Vec<ProcId> = self
            .data
            .values()
            .flat_map(|metrics| metrics.values())
            .flat_map(|procs| procs.keys().copied())
            .collect();
        procs.sort_unstable();
        procs.dedup();
        procs
    }

    /// Drops all values of a vertex.
    pub fn remove_vertex(&mut self, v: VertexId) {
        self.data.remove(&v);
    }

    /// Reduces threads then processes of every vertex holding `metric`.
    ///
    /// Threads of a process are reduced by `op`; the per-process results are
    /// added up. Returns `(vertex, value)` pairs in vertex order.
    pub fn reduce(&self, metric: &str, op: ReduceOp) -> Vec<(VertexId, f64)> {
        let mut reduced: Vec<(VertexId, f64)> = self
            .data
            .iter()
            .filter_map(|(v, metrics)| {
                let procs = metrics.get(metric)?;
                let value = procs
                    .values()
                    .map(|threads| op.apply(threads.values().copied()))
                    .sum::<f64>();
                Some((*v, value))
            })
            .collect();
        reduced.sort_by_key(|(v, _)| *v);
        reduced
    }

    /// Writes the store as JSON.
    pub fn write_json(&self, mut output: impl Write) -> Result<()> {
        serde_json::to_writer_pretty(&mut output, self)?;
        writeln!(output)?;
        output.flush()?;
        Ok(())
    }

    fn slot(&mut self, v: VertexId, metric: &str, proc: ProcId, thread: ThreadId) -> &mut f64 {
        self.data
            .entry(v)
            .or_default()
            .entry(metric.to_string())
            .or_default()
            .entry(proc)
            .or_default()
            .entry(thread)
            .or_insert(0.0)
    }
}

impl Graph {
    /// Reduces `metric` into the `<metric>_<OP>` attribute of every vertex
    /// holding it; returns the grand total over all vertices.
    pub fn reduce_perf_data(&mut self, metric: &str, op: ReduceOp) -> Result<f64> {
        let name = op.derived_name(metric);
        let mut total = 0.0;
        for (v, value) in self.perf_data().reduce(metric, op) {
            if !self.is_vertex(v) {
                continue;
            }
            self.set_vertex_attr(v, &name, value)?;
            total += value;
        }
        tracing::debug!("Graph.reduce_perf_data {} total {}", name, total);
        Ok(total)
    }

    /// Stores `metric / total` as `new_metric` on every vertex holding `metric`.
    pub fn to_percent(&mut self, metric: &str, total: f64, new_metric: &str) -> Result<()> {
        let values: Vec<(VertexId, f64)> = self
            .vertex_ids()
            .filter_map(|v| self.vertex_num(v, metric).map(|x| (v, x)))
            .collect();
        for (v, value) in values {
            let share = if total == 0.0 { 0.0 } else { value / total };
            self.set_vertex_attr(v, new_metric, share)?;
        }
        Ok(())
    }
}
