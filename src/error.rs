//! pag-profile error module.

use std::io;
use std::path::PathBuf;

/// Represents errors of the analyzer.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Cannot open file '{1}': {0}")]
    OpenFile(#[source] io::Error, PathBuf),
    #[error("Cannot read line '{1}': {0}")]
    ReadLine(#[source] io::Error, String),
    #[error("Input/output error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported format of graph file: should start with the standard header")]
    GraphHeader,
    #[error("Cannot parse graph line '{0}' at line {1}")]
    GraphParsing(String, usize),
    #[error("Graph references unknown vertex {0} at line {1}")]
    GraphDanglingVertex(usize, usize),
    #[error("Unknown vertex kind '{0}'")]
    VertexKind(String),
    #[error("Unknown edge kind '{0}'")]
    EdgeKind(String),
    #[error("Attribute '{name}' is {expected}, cannot store {found}")]
    AttributeType {
        name: String,
        expected: &'static str,
        found: &'static str,
    },
    #[error("Abstraction graph root must be a function vertex, found '{0}'")]
    GraphRoot(String),

    #[error("Cannot parse performance data line '{0}' at line {1}")]
    PerfDataParsing(String, usize),
    #[error("Performance data ended early: expected {0} records, got {1}")]
    PerfDataTruncated(usize, usize),
    #[error("Cannot parse MPI trace line '{0}' at line {1}")]
    MpiParsing(String, usize),
    #[error("Cannot parse shared object map line '{0}' at line {1}")]
    SoMapParsing(String, usize),
    #[error("Cannot parse index line '{0}' at line {1}")]
    IndexParsing(String, usize),
    #[error("Cannot parse indirect call line '{0}' at line {1}")]
    IndirectParsing(String, usize),
    #[error("Cannot parse config line '{0}' at line {1}")]
    ConfigParsing(String, usize),
    #[error("Unknown expansion '{0}'")]
    Expansion(String),

    #[error("Entry function '{0}' not found")]
    MissingEntry(String),
}

/// Represents results.
pub type Result<T> = std::result::Result<T, Error>;
