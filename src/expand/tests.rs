//! pag-profile expansion tests module.

use super::*;
use crate::config::{
    ATTR_WAIT, CALL_SITE_WINDOW, PARALLEL_END_VERTEX, THREAD_CREATE_VERTEX, THREAD_JOIN_VERTEX,
};
use crate::graph::VertexKind::{Call, Function, Loop};
use crate::tests::mock;

type End = (ProcId, ThreadId, Vec<Address>);

fn edge(src: End, dest: End, value: f64) -> PerfEdgeSample {
    PerfEdgeSample {
        src_path: src.2,
        dest_path: dest.2,
        value,
        src_proc: src.0,
        dest_proc: dest.0,
        src_thread: src.1,
        dest_thread: dest.1,
    }
}

fn named(graph: &Graph, name: &str) -> Vec<VertexId> {
    graph
        .vertex_ids()
        .filter(|&v| graph.vertex(v).name() == name)
        .collect()
}

fn origin(graph: &Graph, v: VertexId) -> (Option<f64>, Option<f64>) {
    (
        graph.vertex_num(v, ATTR_ID),
        graph.vertex_num(v, ATTR_THREAD),
    )
}

#[test]
fn spawn_index_sorts_records_by_role() {
    let mut edges = mock::spawn_edges();
    // Sync between threads, message between processes, stray fork record
    edges.push(edge((0, 1, vec![0x2044]), (0, 0, vec![0x2064]), 2.5));
    edges.push(edge((0, 0, vec![0x2044]), (1, 0, vec![0x2064]), 8.0));
    edges.push(edge((0, 3, vec![0x10]), (0, 0, vec![0x20]), config::FORK_MARK));

    let index = SpawnIndex::new(&edges);
    assert_eq!(index.spawns().len(), 1);
    assert_eq!(index.joins().len(), 1);
    assert_eq!(index.syncs().len(), 1);
    assert_eq!(index.comms().len(), 1);
    assert_eq!(index.dropped(), 1);

    let spawn = index.spawn_of(0, 1).unwrap();
    assert_eq!(spawn.parent_thread, 0);
    assert_eq!(spawn.parent_path, mock::create_path());
    assert_eq!(index.join_of(spawn).unwrap().joiner_thread, 0);
    assert_eq!(index.procs(), vec![0, 1]);
}

#[test]
fn spawn_records_add_dynamic_call_edges() {
    let mut pcg = ProgramCallGraph::new();
    pcg.add_function("main", 0x1000, 0x11ff);
    pcg.add_function("worker", 0x3000, 0x30ff);
    pcg.add_call_site(0x1190);

    let index = SpawnIndex::new(&mock::spawn_edges());
    assert_eq!(index.add_dynamic_calls(&mut pcg, CALL_SITE_WINDOW), 1);
    assert_eq!(pcg.callees(0x1190), vec![mock::WORKER]);
    // Idempotent
    assert_eq!(index.add_dynamic_calls(&mut pcg, CALL_SITE_WINDOW), 1);
    assert_eq!(pcg.edge_count(), 2);
}

#[test]
fn expansion_names_parse() {
    assert_eq!("threads".parse::<Expansion>().unwrap(), Expansion::Threads);
    assert_eq!("none".parse::<Expansion>().unwrap(), Expansion::None);
    assert!(matches!(
        "fibers".parse::<Expansion>(),
        Err(Error::Expansion(_))
    ));
}

#[test]
fn threads_hang_from_create_and_wait_on_join() {
    let mut pag = mock::linked_pag();
    pag.perf_data_mut().set(11, "M", 0, 1, 5.0);
    pag.perf_data_mut().set(4, "M", 0, 0, 2.0);
    let config = Config::default();
    let index = SpawnIndex::new(&mock::spawn_edges());
    let mut ctx = ExpansionContext::new(&config, &index);

    let mpag = expand_threads(&pag, &mut ctx).unwrap();
    assert_eq!(mpag.vertex_count(), 17);
    assert_eq!(mpag.edge_count(), 17);
    assert_eq!(mpag.threads(), 2);
    let stats = ctx.stats();
    assert_eq!(stats.unmatched_creates, 0);
    assert_eq!(stats.unmatched_joins, 0);

    let create = named(&mpag, THREAD_CREATE_VERTEX);
    assert_eq!(create.len(), 1);
    let heads: Vec<_> = mpag.children(create[0]).map(|c| origin(&mpag, c)).collect();
    assert!(heads.contains(&(Some(7.0), Some(1.0))));
    assert!(heads.contains(&(Some(13.0), Some(0.0))));

    let join = named(&mpag, THREAD_JOIN_VERTEX);
    assert_eq!(join.len(), 1);
    let waiting: Vec<_> = mpag.parents(join[0]).map(|p| origin(&mpag, p)).collect();
    assert!(waiting.contains(&(Some(12.0), Some(1.0))));

    // Thread 1 data follows the worker's copy only
    let send = mpag
        .vertex_ids()
        .find(|&v| origin(&mpag, v) == (Some(11.0), Some(1.0)))
        .unwrap();
    assert_eq!(mpag.perf_data().get(send, "M", 0, 1), Some(5.0));
    let send = mpag
        .vertex_ids()
        .find(|&v| origin(&mpag, v) == (Some(4.0), Some(0.0)))
        .unwrap();
    assert_eq!(mpag.perf_data().get(send, "M", 0, 0), Some(2.0));
    assert_eq!(mpag.perf_data().get(send, "M", 0, 1), None);
}

#[test]
fn sync_records_become_timed_edges() {
    let pag = mock::linked_pag();
    let mut edges = mock::spawn_edges();
    edges.push(edge(
        (0, 1, mock::worker_send_path()),
        (0, 0, vec![0x2064, 0x1124, 0x7f00_0020]),
        2.5,
    ));
    let config = Config::default();
    let index = SpawnIndex::new(&edges);
    let mut ctx = ExpansionContext::new(&config, &index);

    let mpag = expand_threads(&pag, &mut ctx).unwrap();
    assert_eq!(ctx.stats().unmatched_syncs, 0);
    assert_eq!(mpag.edge_count(), 18);

    let src = mpag
        .vertex_ids()
        .find(|&v| origin(&mpag, v) == (Some(11.0), Some(1.0)))
        .unwrap();
    let e = mpag
        .out_edges(src)
        .iter()
        .copied()
        .find(|&e| origin(&mpag, mpag.edge(e).dest()) == (Some(5.0), Some(0.0)))
        .unwrap();
    assert_eq!(mpag.edge_num(e, config::ATTR_TIME), Some(2.5));
    assert!(mpag.has_vertex_attr(src, ATTR_WAIT));
}

#[test]
fn unplaced_create_is_counted() {
    let pag = mock::main_graph();
    let config = Config::default();
    let mut edges = mock::spawn_edges();
    // Creation call path outside any create vertex
    edges[0].src_path = vec![0x1150];
    let index = SpawnIndex::new(&edges);
    let mut ctx = ExpansionContext::new(&config, &index);

    let mpag = expand_threads(&pag, &mut ctx).unwrap();
    assert_eq!(ctx.stats().unmatched_creates, 1);
    assert_eq!(ctx.stats().unmatched_joins, 1);
    assert!(named(&mpag, THREAD_CREATE_VERTEX).is_empty());
}

#[test]
fn routine_without_creation_record_stays_in_creator() {
    let pag = mock::linked_pag();
    let config = Config::default();
    let index = SpawnIndex::new(&[]);
    let mut ctx = ExpansionContext::new(&config, &index);

    let mpag = expand_threads(&pag, &mut ctx).unwrap();
    // Synthesized root plus one copy of every linked vertex
    assert_eq!(mpag.vertex_count(), 1 + pag.vertex_count());
    assert_eq!(mpag.threads(), 1);
    assert!(named(&mpag, THREAD_CREATE_VERTEX).is_empty());
    assert_eq!(ctx.stats().unspawned_create_sites, 1);
    assert_eq!(ctx.stats().unmatched_creates, 0);

    // The worker routine is copied for the creating thread
    let worker = named(&mpag, "worker");
    assert_eq!(worker.len(), 1);
    assert_eq!(origin(&mpag, worker[0]), (Some(7.0), Some(0.0)));
}

#[test]
fn missing_entry_gives_empty_graph() {
    let pag = mock::linked_pag();
    let config = Config {
        entry_function: "start".into(),
        ..Config::default()
    };
    let index = SpawnIndex::default();
    let mut ctx = ExpansionContext::new(&config, &index);

    for expansion in [Expansion::Threads, Expansion::OpenMp, Expansion::Processes] {
        let mpag = expand(&pag, expansion, &mut ctx).unwrap().unwrap();
        assert!(mpag.is_empty());
        assert_eq!(mpag.root(), None);
    }
    assert!(expand(&pag, Expansion::None, &mut ctx).unwrap().is_none());
}

fn parallel_pag() -> ProgramAbstractionGraph {
    let mut pag = mock::tree(
        &[
            (Function, "main", 0x1000, 0x10ff),
            (Call, "GOMP_parallel", 0x1010, 0x1014),
            (Function, "main._omp_fn.0", 0x1200, 0x12ff),
            (Loop, "loop_1", 0x1210, 0x1280),
            (Call, "finish", 0x1050, 0x1054),
        ],
        &[(0, 1), (1, 2), (2, 3), (0, 4)],
    );
    for thread in 0..3 {
        pag.perf_data_mut()
            .set(3, "M", 0, thread, f64::from(thread + 1));
    }
    pag
}

#[test]
fn region_is_replicated_per_recorded_thread() {
    let pag = parallel_pag();
    let config = Config::default();
    let index = SpawnIndex::default();
    let mut ctx = ExpansionContext::new(&config, &index);

    let mpag = expand_openmp(&pag, &mut ctx).unwrap();
    assert_eq!(mpag.vertex_count(), 11);
    assert_eq!(mpag.edge_count(), 12);
    assert_eq!(mpag.threads(), 3);
    assert_eq!(ctx.stats().regions, 1);

    let end = named(&mpag, PARALLEL_END_VERTEX);
    assert_eq!(end.len(), 1);
    assert_eq!(mpag.parents(end[0]).count(), 3);
    let after: Vec<_> = mpag.children(end[0]).collect();
    assert_eq!(after.len(), 1);
    assert_eq!(mpag.vertex(after[0]).name(), "finish");

    // One thread's data per loop replica
    let mut values: Vec<(ThreadId, f64)> = named(&mpag, "loop_1")
        .into_iter()
        .flat_map(|v| mpag.perf_data().thread_values(v, "M", 0))
        .collect();
    values.sort_by_key(|(t, _)| *t);
    assert_eq!(values, vec![(0, 1.0), (1, 2.0), (2, 3.0)]);
    for v in named(&mpag, "loop_1") {
        assert_eq!(mpag.perf_data().thread_values(v, "M", 0).len(), 1);
    }
}

#[test]
fn explicit_worker_count_folds_threads_round_robin() {
    let pag = parallel_pag();
    let config = Config::default();
    let index = SpawnIndex::default();
    let mut ctx = ExpansionContext::new(&config, &index).with_threads(Some(2));

    let mpag = expand_openmp(&pag, &mut ctx).unwrap();
    assert_eq!(mpag.threads(), 2);
    let loops = named(&mpag, "loop_1");
    assert_eq!(loops.len(), 2);
    let first = mpag
        .vertex_ids()
        .find(|&v| mpag.vertex(v).name() == "loop_1" && mpag.vertex_num(v, ATTR_THREAD) == Some(0.0))
        .unwrap();
    assert_eq!(
        mpag.perf_data().thread_values(first, "M", 0),
        vec![(0, 1.0), (2, 3.0)]
    );
}

#[test]
fn region_extends_to_join_sibling() {
    let pag = mock::tree(
        &[
            (Function, "main", 0x1000, 0x10ff),
            (Call, "GOMP_parallel_start", 0x1010, 0x1014),
            (Function, "main._omp_fn.0", 0x1200, 0x12ff),
            (Call, "work", 0x1020, 0x1024),
            (Call, "GOMP_parallel_end", 0x1030, 0x1034),
        ],
        &[(0, 1), (1, 2), (0, 3), (0, 4)],
    );
    let config = Config {
        omp_fork: vec!["GOMP_parallel_start".into()],
        omp_join: vec!["GOMP_parallel_end".into()],
        ..Config::default()
    };
    let index = SpawnIndex::default();
    let mut ctx = ExpansionContext::new(&config, &index).with_threads(Some(2));

    let mpag = expand_openmp(&pag, &mut ctx).unwrap();
    assert_eq!(mpag.vertex_count(), 9);
    assert_eq!(named(&mpag, "work").len(), 2);
    let end = named(&mpag, PARALLEL_END_VERTEX)[0];
    let after: Vec<_> = mpag.children(end).collect();
    assert_eq!(mpag.vertex(after[0]).name(), "GOMP_parallel_end");
}

#[test]
fn processes_use_rank_arithmetic() {
    let mut pag = mock::linked_pag();
    pag.perf_data_mut().set(4, "M", 1, 0, 3.0);
    let edges = vec![
        edge(
            (0, 0, vec![0x2044, 0x1124]),
            (1, 0, vec![0x2064, 0x1124]),
            8.0,
        ),
        edge((0, 0, vec![0x2044, 0x1124]), (5, 0, vec![0x2064, 0x1124]), 1.0),
    ];
    let config = Config::default();
    let index = SpawnIndex::new(&edges);
    let mut ctx = ExpansionContext::new(&config, &index).with_processes(Some(2));

    let mpag = expand_processes(&pag, &mut ctx).unwrap();
    let len = 14;
    assert_eq!(mpag.vertex_count(), 1 + 2 * len);
    assert_eq!(mpag.edge_count(), 2 * len + 1);
    assert_eq!(ctx.stats().unmapped_comm_edges, 1);

    let rank1_main = 1 + len;
    assert_eq!(mpag.vertex(rank1_main).name(), "main");
    assert_eq!(mpag.vertex_num(rank1_main, ATTR_PROCESS), Some(1.0));
    assert!(mpag.children(0).any(|c| c == rank1_main));

    let (send, recv) = (1 + 4, 1 + len + 5);
    let e = mpag
        .out_edges(send)
        .iter()
        .copied()
        .find(|&e| mpag.edge(e).dest() == recv)
        .unwrap();
    assert_eq!(mpag.edge_num(e, config::ATTR_TIME), Some(8.0));

    assert_eq!(mpag.perf_data().get(1 + len + 4, "M", 1, 0), Some(3.0));
    assert_eq!(mpag.perf_data().get(send, "M", 1, 0), None);
}
