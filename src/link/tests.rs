//! pag-profile linker tests module.

use super::*;
use crate::resolver::{resolve_path, ResolveOptions};
use crate::tests::mock;

fn names(pag: &ProgramAbstractionGraph) -> Vec<String> {
    let mut names: Vec<String> = pag
        .vertex_ids()
        .map(|v| pag.vertex(v).name().to_string())
        .collect();
    names.sort();
    names
}

#[test]
fn links_main_like_the_hand_built_graph() {
    let pcg = mock::pcg();
    let graphs = mock::function_graphs();
    let (pag, stats) = link_program(&pcg, &graphs, "main").unwrap();

    let expected = mock::linked_pag();
    assert_eq!(pag.vertex_count(), 14);
    assert_eq!(pag.edge_count(), 13);
    assert_eq!(names(&pag), names(&expected));
    assert_eq!(pag.function_name(), "main");
    // main, compute, worker
    assert_eq!(stats.functions, 3);
    assert_eq!(stats.spliced, 3);
    // MPI_Send, MPI_Recv, pthread_join
    assert_eq!(stats.unresolved, 3);
    assert_eq!(stats.recursive, 0);
}

#[test]
fn linked_graph_resolves_like_the_hand_built_graph() {
    let pcg = mock::pcg();
    let graphs = mock::function_graphs();
    let (pag, _) = link_program(&pcg, &graphs, "main").unwrap();
    let expected = mock::linked_pag();
    let opts = ResolveOptions::default();

    for path in [
        vec![0x1150],
        vec![0x2044, 0x1124, 0x7f00_0020],
        vec![0x2064, 0x3024, 0x1194],
    ] {
        let v = resolve_path(&pag, 0, &path, &opts).unwrap();
        let w = resolve_path(&expected, 0, &path, &opts).unwrap();
        assert_eq!(pag.vertex(v).name(), expected.vertex(w).name());
        assert_eq!(pag.vertex(v).entry_addr(), expected.vertex(w).entry_addr());
    }
}

#[test]
fn linking_twice_gives_same_graph() {
    let pcg = mock::pcg();
    let graphs = mock::function_graphs();

    let mut ctx = LinkingContext::new(&pcg, &graphs);
    let first = ctx.link_program("main").unwrap();
    let stats = ctx.stats();
    ctx.clear();
    let second = ctx.link_program("main").unwrap();
    assert_eq!(ctx.stats(), stats);

    assert_eq!(first.vertex_count(), second.vertex_count());
    assert_eq!(first.edge_count(), second.edge_count());
    assert_eq!(names(&first), names(&second));

    // Inputs stay unlinked
    assert_eq!(graphs.get(mock::MAIN).unwrap().vertex_count(), 5);
}

#[test]
fn recursion_is_inlined_once() {
    let pcg = mock::pcg();
    let graphs = mock::function_graphs();
    let mut ctx = LinkingContext::new(&pcg, &graphs);
    let pag = ctx.link(mock::FACT).unwrap();

    assert_eq!(pag.vertex_count(), 4);
    assert_eq!(pag.edge_count(), 3);
    assert_eq!(ctx.stats().recursive, 1);
    assert_eq!(pag.vertex(1).kind(), VertexKind::CallRecursive);
    // The inlined level keeps a plain call without a callee
    let inner: Vec<_> = pag
        .vertex_ids()
        .filter(|&v| pag.vertex(v).kind() == VertexKind::Call)
        .collect();
    assert_eq!(inner.len(), 1);
    assert_eq!(pag.children(inner[0]).count(), 0);
}

#[test]
fn missing_entry_is_an_error() {
    let pcg = mock::pcg();
    let graphs = mock::function_graphs();
    let r = link_program(&pcg, &graphs, "start");
    assert!(matches!(r, Err(Error::MissingEntry(_))));
}

#[test]
fn splice_counts_are_additive() {
    let mut main = mock::main_graph();
    let compute = mock::compute_graph();
    let (vc, ec) = (main.vertex_count(), main.edge_count());
    let image = main.splice(&compute).unwrap().unwrap();
    assert_eq!(main.vertex_count(), vc + compute.vertex_count());
    assert_eq!(main.edge_count(), ec + compute.edge_count());
    assert_eq!(main.vertex(image).name(), "compute");
}
