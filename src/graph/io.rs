//! pag-profile graph file format.
//!
//! ```text
//! pag-graph	<vertex count>	<edge count>
//! a	<key>=<t>:<value>
//! v	<id>	<kind>	<entry hex>	<exit hex>	<name>	[<key>=<t>:<value>]...
//! e	<id>	<src>	<dest>	<kind>	[<key>=<t>:<value>]...
//! ```
//!
//! The same format is used for the static analyzer's output and for dumps,
//! so graphs round-trip. Ids are renumbered densely on write.

use super::attr::{decode, encode, escape, unescape};
use super::{EdgeKind, Graph, VertexKind};
use crate::config::Map;
use crate::error::{Error, Result};
use crate::{filebuf, Address, VertexId};
use std::io::{BufRead, Write};
use std::path::Path;

const HEADER: &str = "pag-graph";

impl Graph {
    /// Reads a graph file.
    pub fn read_file(filepath: &Path) -> Result<Self> {
        tracing::debug!("Graph.read_file {:?}", filepath);
        Graph::read(filebuf::open(filepath)?)
    }

    /// Parses a graph from the reader.
    pub fn read(reader: impl BufRead) -> Result<Self> {
        let mut graph = Graph::new();
        let mut was_header = false;
        let mut ids: Map<usize, VertexId> = Map::new();

        filebuf::for_each_line(reader, |line, lc| {
            let err = || Error::GraphParsing(line.into(), lc);
            let mut fields = line.split('\t');
            let tag = fields.next().ok_or_else(err)?;

            if !was_header {
                if tag != HEADER {
                    return Err(Error::GraphHeader);
                }
                was_header = true;
                return Ok(());
            }

            match tag {
                "a" => {
                    for token in fields {
                        let (name, value) = decode(token).ok_or_else(err)?;
                        graph.set_graph_attr(&name, value)?;
                    }
                }
                "v" => {
                    let id = parse_field::<usize>(fields.next(), 10).ok_or_else(err)?;
                    let kind: VertexKind = fields.next().ok_or_else(err)?.parse()?;
                    let entry = parse_field::<Address>(fields.next(), 16).ok_or_else(err)?;
                    let exit = parse_field::<Address>(fields.next(), 16).ok_or_else(err)?;
                    let name = unescape(fields.next().ok_or_else(err)?);
                    let v = graph.add_vertex_of(kind, &name, entry, exit);
                    for token in fields {
                        let (name, value) = decode(token).ok_or_else(err)?;
                        graph.set_vertex_attr(v, &name, value)?;
                    }
                    ids.insert(id, v);
                }
                "e" => {
                    let _ = parse_field::<usize>(fields.next(), 10).ok_or_else(err)?;
                    let src = parse_field::<usize>(fields.next(), 10).ok_or_else(err)?;
                    let dest = parse_field::<usize>(fields.next(), 10).ok_or_else(err)?;
                    let kind: EdgeKind = fields.next().ok_or_else(err)?.parse()?;
                    let src = *ids.get(&src).ok_or(Error::GraphDanglingVertex(src, lc))?;
                    let dest = *ids.get(&dest).ok_or(Error::GraphDanglingVertex(dest, lc))?;
                    let attrs = fields
                        .map(|token| decode(token).ok_or_else(err))
                        .collect::<Result<Vec<_>>>()?;
                    if attrs.is_empty() {
                        graph.add_edge_lazy_of(src, dest, kind);
                    } else {
                        let e = graph.add_edge_of(src, dest, kind);
                        for (name, value) in attrs {
                            graph.set_edge_attr(e, &name, value)?;
                        }
                    }
                }
                _ => return Err(err()),
            }
            Ok(())
        })?;

        if !was_header {
            return Err(Error::GraphHeader);
        }
        graph.prepare();
        Ok(graph)
    }

    /// Writes the graph into a file.
    pub fn write_file(&mut self, filepath: &Path) -> Result<()> {
        tracing::debug!("Graph.write_file {:?}", filepath);
        self.write(filebuf::open_w(filepath)?)
    }

    /// Writes the graph in the text format.
    pub fn write(&mut self, mut output: impl Write) -> Result<()> {
        self.prepare();

        let mut dense = vec![usize::MAX; self.used];
        for (i, v) in self.vertex_ids().enumerate() {
            dense[v] = i;
        }

        writeln!(
            output,
            "{}\t{}\t{}",
            HEADER,
            self.vertex_count(),
            self.edge_count()
        )?;
        if !self.attrs.is_empty() {
            write!(output, "a")?;
            for (name, value) in &self.attrs {
                write!(output, "\t{}", encode(name, value))?;
            }
            writeln!(output)?;
        }
        for v in self.vertex_ids() {
            let vertex = &self.vertices[v];
            write!(
                output,
                "v\t{}\t{}\t{:x}\t{:x}\t{}",
                dense[v],
                vertex.kind,
                vertex.entry_addr,
                vertex.exit_addr,
                escape(&vertex.name)
            )?;
            for (name, value) in &vertex.attrs {
                write!(output, "\t{}", encode(name, value))?;
            }
            writeln!(output)?;
        }
        for (i, e) in self.edge_ids().enumerate() {
            let edge = &self.edges[e];
            write!(
                output,
                "e\t{}\t{}\t{}\t{}",
                i, dense[edge.src], dense[edge.dest], edge.kind
            )?;
            for (name, value) in &edge.attrs {
                write!(output, "\t{}", encode(name, value))?;
            }
            writeln!(output)?;
        }

        output.flush()?;
        Ok(())
    }
}

/// Parses an optional field with the given radix.
fn parse_field<T: FromRadix>(field: Option<&str>, radix: u32) -> Option<T> {
    let field = field?;
    let digits = if radix == 16 {
        field.trim_start_matches("0x")
    } else {
        field
    };
    T::from_radix(digits, radix)
}

trait FromRadix: Sized {
    fn from_radix(s: &str, radix: u32) -> Option<Self>;
}

impl FromRadix for usize {
    fn from_radix(s: &str, radix: u32) -> Option<Self> {
        usize::from_str_radix(s, radix).ok()
    }
}

impl FromRadix for u64 {
    fn from_radix(s: &str, radix: u32) -> Option<Self> {
        u64::from_str_radix(s, radix).ok()
    }
}
