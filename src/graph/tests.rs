//! pag-profile graph store tests module.

use super::*;
use crate::config::VERTEX_CHUNK;
use std::io::Cursor;

/// main -> {loop -> call, call}
fn sample_graph() -> Graph {
    let mut g = Graph::new();
    let main = g.add_vertex_of(VertexKind::Function, "main", 0x100, 0x1ff);
    let lp = g.add_vertex_of(VertexKind::Loop, "loop_1", 0x120, 0x160);
    let c1 = g.add_vertex_of(VertexKind::Call, "foo", 0x130, 0x134);
    let c2 = g.add_vertex_of(VertexKind::Call, "bar", 0x180, 0x184);
    g.add_edge(main, lp);
    g.add_edge(lp, c1);
    g.add_edge(main, c2);
    g
}

#[derive(Default)]
struct Recorder {
    events: Vec<String>,
}

impl Visitor for Recorder {
    fn enter(&mut self, graph: &Graph, v: VertexId) {
        self.events.push(format!("+{}", graph.vertex(v).name()));
    }

    fn leave(&mut self, graph: &Graph, v: VertexId) {
        self.events.push(format!("-{}", graph.vertex(v).name()));
    }
}

#[test]
fn vertices_grow_by_chunks_and_trim() {
    let mut g = Graph::new();
    g.add_vertex();
    assert_eq!(g.vertices.len(), VERTEX_CHUNK);
    assert_eq!(g.vertex_count(), 1);
    g.trim();
    assert_eq!(g.vertices.len(), 1);
    let v = g.add_vertex();
    assert_eq!(v, 1);
    assert_eq!(g.vertices.len(), 1 + VERTEX_CHUNK);
}

#[test]
fn lazy_edges_get_ids_in_order() {
    let mut g = Graph::new();
    let a = g.add_vertex();
    let b = g.add_vertex();
    let c = g.add_vertex();
    let e0 = g.add_edge(a, b);
    let e1 = g.add_edge_lazy(b, c);
    let e2 = g.add_edge_lazy(a, c);
    assert_eq!((e0, e1, e2), (0, 1, 2));
    assert_eq!(g.edge_count(), 3);
    assert_eq!(g.pending_edges(), 2);
    assert_eq!(g.children(a).collect::<Vec<_>>(), vec![b, c]);

    g.flush();
    assert_eq!(g.pending_edges(), 0);
    assert_eq!(g.edge(e1).src(), b);
    assert_eq!(g.edge(e2).dest(), c);
}

#[test]
fn traversal_flushes_pending_edges() {
    let mut g = Graph::new();
    let a = g.add_vertex_of(VertexKind::Function, "a", 0, 0);
    let b = g.add_vertex_of(VertexKind::Call, "b", 0, 0);
    g.add_edge_lazy(a, b);
    let mut rec = Recorder::default();
    g.dfs(a, &mut rec);
    assert_eq!(rec.events, vec!["+a", "+b", "-b", "-a"]);
    assert_eq!(g.pending_edges(), 0);
    assert_eq!(g.vertices.len(), 2);
}

#[test]
fn dfs_enters_and_leaves_in_preorder() {
    let mut g = sample_graph();
    let mut rec = Recorder::default();
    g.dfs(0, &mut rec);
    assert_eq!(
        rec.events,
        vec!["+main", "+loop_1", "+foo", "-foo", "-loop_1", "+bar", "-bar", "-main"]
    );
    assert_eq!(g.preorder(0), vec![0, 1, 2, 3]);
}

#[test]
fn bfs_visits_by_levels() {
    let mut g = sample_graph();
    let mut order = Vec::new();
    g.bfs(0, |_, v| order.push(v));
    assert_eq!(order, vec![0, 1, 3, 2]);

    let mut all = Vec::new();
    g.for_each_vertex(|_, v| all.push(v));
    assert_eq!(all, vec![0, 1, 2, 3]);
}

#[test]
fn splice_adds_all_vertices_and_edges() {
    let mut g1 = sample_graph();
    let mut g2 = sample_graph();
    g2.add_vertex();
    g2.trim();
    let (v1, e1) = (g1.vertex_count(), g1.edge_count());
    let (v2, e2) = (g2.vertex_count(), g2.edge_count());

    let root = g1.splice(&g2).unwrap();
    assert_eq!(root, Some(v1));
    assert_eq!(g1.vertex_count(), v1 + v2);
    assert_eq!(g1.edge_count(), e1 + e2);
    assert_eq!(g1.vertex(v1).name(), "main");
    assert_eq!(g1.children(v1).collect::<Vec<_>>(), vec![v1 + 1, v1 + 3]);
}

#[test]
fn splice_skips_deleted_vertices() {
    let mut g1 = Graph::new();
    let mut g2 = sample_graph();
    g2.delete_vertex(2);
    assert_eq!(g2.vertex_count(), 3);
    assert_eq!(g2.edge_count(), 2);

    g1.splice(&g2).unwrap();
    assert_eq!(g1.vertex_count(), 3);
    assert_eq!(g1.edge_count(), 2);
}

#[test]
fn attribute_type_conflict_is_rejected() {
    let mut g = sample_graph();
    g.set_vertex_attr(0, "wait", 3_usize).unwrap();
    let r = g.set_vertex_attr(1, "wait", "three");
    assert!(matches!(r, Err(Error::AttributeType { .. })));
    assert_eq!(g.vertex_num(0, "wait"), Some(3.0));
    assert!(!g.has_vertex_attr(1, "wait"));

    g.set_graph_attr("name", "main").unwrap();
    assert!(g.set_graph_attr("name", true).is_err());
    assert_eq!(g.remove_graph_attr("name"), Some(AttrValue::from("main")));
}

#[test]
fn copy_vertex_skips_id_attribute() {
    let mut src = sample_graph();
    src.set_vertex_attr(1, ATTR_ID, 1_usize).unwrap();
    src.set_vertex_attr(1, "preserve", true).unwrap();

    let mut dst = Graph::new();
    let a = dst.add_vertex();
    let b = dst.add_vertex();
    copy_vertex(&mut dst, a, &src, 1).unwrap();
    deep_copy_vertex(&mut dst, b, &src, 1).unwrap();

    assert_eq!(dst.vertex(a).kind(), VertexKind::Loop);
    assert_eq!(dst.vertex(a).entry_addr(), 0x120);
    assert!(dst.vertex_flag(a, "preserve"));
    assert!(!dst.has_vertex_attr(a, ATTR_ID));
    assert_eq!(dst.vertex_num(b, ATTR_ID), Some(1.0));
}

#[test]
fn delete_vertex_removes_incident_edges() {
    let mut g = sample_graph();
    g.delete_vertex(1);
    assert_eq!(g.vertex_count(), 3);
    assert_eq!(g.edge_count(), 1);
    assert!(!g.is_vertex(1));
    assert_eq!(g.children(0).collect::<Vec<_>>(), vec![3]);
    assert_eq!(g.preorder(0), vec![0, 3]);
}

#[test]
fn write_read_round_trip() {
    let mut g = sample_graph();
    g.set_graph_attr("name", "main\tfile").unwrap();
    g.set_vertex_attr(2, "scanned", true).unwrap();
    let e = g.add_edge(3, 2);
    g.set_edge_attr(e, "time", 2.5).unwrap();

    let mut output = Vec::new();
    g.write(&mut output).unwrap();
    let mut back = Graph::read(Cursor::new(&output)).unwrap();

    assert_eq!(back.vertex_count(), 4);
    assert_eq!(back.edge_count(), 4);
    assert_eq!(back.vertex(1).kind(), VertexKind::Loop);
    assert_eq!(back.vertex(1).exit_addr(), 0x160);
    assert!(back.vertex_flag(2, "scanned"));
    assert_eq!(back.edge_num(3, "time"), Some(2.5));
    assert_eq!(
        back.graph_attr("name").and_then(AttrValue::as_str),
        Some("main\tfile")
    );

    let mut again = Vec::new();
    back.write(&mut again).unwrap();
    assert_eq!(output, again);
}

#[test]
fn read_rejects_missing_header() {
    let r = Graph::read(Cursor::new("v\t0\tfunction\t0\t0\tmain\n"));
    assert!(matches!(r, Err(Error::GraphHeader)));
}

#[test]
fn read_rejects_dangling_edge() {
    let text = "pag-graph\t1\t1\nv\t0\tfunction\t0\t0\tmain\ne\t0\t0\t5\tnone\n";
    let r = Graph::read(Cursor::new(text));
    assert!(matches!(r, Err(Error::GraphDanglingVertex(5, 3))));
}

#[test]
fn covers_uses_slack() {
    let g = sample_graph();
    let call = g.vertex(2);
    assert!(call.covers(0x136, 4));
    assert!(!call.covers(0x139, 4));
    assert!(call.covers(0x12c, 4));
}
