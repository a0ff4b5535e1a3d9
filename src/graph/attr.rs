//! pag-profile graph attributes.

use super::Graph;
use crate::config::Map;
use crate::error::{Error, Result};
use crate::{EdgeId, VertexId};
use std::collections::BTreeMap;

/// Typed attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    /// String value.
    Str(String),
    /// Numeric value.
    Num(f64),
    /// Boolean flag.
    Flag(bool),
}

impl AttrValue {
    /// Returns the name of the value's type.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Str(_) => "string",
            Self::Num(_) => "number",
            Self::Flag(_) => "flag",
        }
    }

    /// Returns the string value, if the attribute is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the numeric value, if the attribute is a number.
    pub fn as_num(&self) -> Option<f64> {
        match self {
            Self::Num(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the flag value, if the attribute is a flag.
    pub fn as_flag(&self) -> Option<bool> {
        match self {
            Self::Flag(f) => Some(*f),
            _ => None,
        }
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        Self::Str(s.into())
    }
}

impl From<String> for AttrValue {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<f64> for AttrValue {
    fn from(n: f64) -> Self {
        Self::Num(n)
    }
}

impl From<usize> for AttrValue {
    fn from(n: usize) -> Self {
        Self::Num(n as f64)
    }
}

impl From<i32> for AttrValue {
    fn from(n: i32) -> Self {
        Self::Num(f64::from(n))
    }
}

impl From<bool> for AttrValue {
    fn from(f: bool) -> Self {
        Self::Flag(f)
    }
}

/// Attribute bag, ordered by name so dumps are stable.
pub type Attributes = BTreeMap<String, AttrValue>;

/// Remembers the type first stored under each attribute name of one scope.
#[derive(Debug, Clone, Default)]
pub(super) struct AttrSchema {
    types: Map<String, &'static str>,
}

impl AttrSchema {
    /// Records the type of a new name, rejects a different type for a known one.
    pub(super) fn check(&mut self, name: &str, value: &AttrValue) -> Result<()> {
        let found = value.type_name();
        match self.types.get(name) {
            Some(&expected) if expected != found => Err(Error::AttributeType {
                name: name.into(),
                expected,
                found,
            }),
            Some(_) => Ok(()),
            None => {
                self.types.insert(name.into(), found);
                Ok(())
            }
        }
    }
}

impl Graph {
    /// Sets a graph-scope attribute.
    pub fn set_graph_attr(&mut self, name: &str, value: impl Into<AttrValue>) -> Result<()> {
        let value = value.into();
        self.graph_schema.check(name, &value)?;
        self.attrs.insert(name.into(), value);
        Ok(())
    }

    /// Returns a graph-scope attribute.
    pub fn graph_attr(&self, name: &str) -> Option<&AttrValue> {
        self.attrs.get(name)
    }

    /// Returns all graph-scope attributes.
    pub fn graph_attrs(&self) -> &Attributes {
        &self.attrs
    }

    /// Removes a graph-scope attribute.
    pub fn remove_graph_attr(&mut self, name: &str) -> Option<AttrValue> {
        self.attrs.remove(name)
    }

    /// Sets a vertex attribute.
    pub fn set_vertex_attr(
        &mut self,
        v: VertexId,
        name: &str,
        value: impl Into<AttrValue>,
    ) -> Result<()> {
        let v = self.check(v);
        let value = value.into();
        self.vertex_schema.check(name, &value)?;
        self.vertices[v].attrs.insert(name.into(), value);
        Ok(())
    }

    /// Returns a vertex attribute.
    pub fn vertex_attr(&self, v: VertexId, name: &str) -> Option<&AttrValue> {
        self.vertex(v).attrs.get(name)
    }

    /// Returns a numeric vertex attribute.
    pub fn vertex_num(&self, v: VertexId, name: &str) -> Option<f64> {
        self.vertex_attr(v, name).and_then(AttrValue::as_num)
    }

    /// Returns a string vertex attribute.
    pub fn vertex_str(&self, v: VertexId, name: &str) -> Option<&str> {
        self.vertex_attr(v, name).and_then(AttrValue::as_str)
    }

    /// Returns a flag vertex attribute; absent flags are false.
    pub fn vertex_flag(&self, v: VertexId, name: &str) -> bool {
        self.vertex_attr(v, name)
            .and_then(AttrValue::as_flag)
            .unwrap_or(false)
    }

    /// Checks if a vertex carries the attribute.
    pub fn has_vertex_attr(&self, v: VertexId, name: &str) -> bool {
        self.vertex(v).attrs.contains_key(name)
    }

    /// Removes a vertex attribute.
    pub fn remove_vertex_attr(&mut self, v: VertexId, name: &str) -> Option<AttrValue> {
        let v = self.check(v);
        self.vertices[v].attrs.remove(name)
    }

    /// Sets an edge attribute; queued edges are flushed first.
    pub fn set_edge_attr(
        &mut self,
        e: EdgeId,
        name: &str,
        value: impl Into<AttrValue>,
    ) -> Result<()> {
        self.flush();
        let value = value.into();
        self.edge_schema.check(name, &value)?;
        self.edges[e].attrs.insert(name.into(), value);
        Ok(())
    }

    /// Returns an edge attribute of a materialized edge.
    pub fn edge_attr(&self, e: EdgeId, name: &str) -> Option<&AttrValue> {
        self.edges[e].attrs.get(name)
    }

    /// Returns a numeric edge attribute of a materialized edge.
    pub fn edge_num(&self, e: EdgeId, name: &str) -> Option<f64> {
        self.edge_attr(e, name).and_then(AttrValue::as_num)
    }

    /// Checks if a materialized edge carries the attribute.
    pub fn has_edge_attr(&self, e: EdgeId, name: &str) -> bool {
        self.edges[e].attrs.contains_key(name)
    }

    /// Removes an edge attribute.
    pub fn remove_edge_attr(&mut self, e: EdgeId, name: &str) -> Option<AttrValue> {
        self.flush();
        self.edges[e].attrs.remove(name)
    }
}

/// Escapes separators so a value fits into one tab-separated field.
pub(super) fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            _ => out.push(c),
        }
    }
    out
}

/// Reverses [`escape`].
pub(super) fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

/// Encodes an attribute as `name=t:value`.
pub(super) fn encode(name: &str, value: &AttrValue) -> String {
    match value {
        AttrValue::Str(s) => format!("{}=s:{}", escape(name), escape(s)),
        AttrValue::Num(n) => format!("{}=n:{}", escape(name), n),
        AttrValue::Flag(f) => format!("{}=f:{}", escape(name), u8::from(*f)),
    }
}

/// Decodes an attribute written by [`encode`].
pub(super) fn decode(token: &str) -> Option<(String, AttrValue)> {
    let (name, typed) = token.split_once('=')?;
    let (ty, raw) = typed.split_once(':')?;
    let value = match ty {
        "s" => AttrValue::Str(unescape(raw)),
        "n" => AttrValue::Num(raw.parse().ok()?),
        "f" => AttrValue::Flag(match raw {
            "1" => true,
            "0" => false,
            _ => return None,
        }),
        _ => return None,
    };
    Some((unescape(name), value))
}
