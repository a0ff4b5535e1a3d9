//! pag-profile communication tests module.

use super::*;
use crate::error::Error;
use crate::perf::PerfTrace;
use crate::tests::mock;
use std::io::Cursor;
use std::path::PathBuf;

fn op(kind: CommOpKind, path: &[u64], triples: &[(ProcId, ProcId, i32)], time: f64) -> CommRecord {
    CommRecord {
        kind,
        call_path: path.to_vec(),
        triples: triples
            .iter()
            .map(|&(src, dest, tag)| CommTriple { src, dest, tag })
            .collect(),
        count: 1,
        time,
    }
}

fn mock_logs() -> Vec<CommLog> {
    vec![
        read_log(0, Cursor::new(mock::MPI_RANK0)).unwrap(),
        read_log(1, Cursor::new(mock::MPI_RANK1)).unwrap(),
    ]
}

#[test]
fn parse_mpi_info() {
    let logs = mock_logs();
    let send = logs[0].get(0).unwrap();
    assert_eq!(send.kind, CommOpKind::Send);
    assert_eq!(send.call_path, vec![0x2044, 0x1124]);
    assert_eq!(send.triples, vec![CommTriple { src: 0, dest: 1, tag: 7 }]);
    assert_eq!(send.time, 5.0);
    let barrier = logs[0].get(1).unwrap();
    assert_eq!(barrier.kind, CommOpKind::Collective);
    assert!(barrier.triples.is_empty());
}

#[test]
fn parse_several_requests() {
    let log = read_log(2, Cursor::new("w 10 20|0 2 1, 1 2 1|2|0.5\n")).unwrap();
    assert_eq!(log.proc(), 2);
    assert_eq!(log.get(0).unwrap().triples.len(), 2);
}

#[test]
fn parse_rejects_bad_lines() {
    let r = read_log(0, Cursor::new("x 10|-|1|1.0\n"));
    assert!(matches!(r, Err(Error::MpiParsing(_, 1))));
    let r = read_log(0, Cursor::new("c 10|-|1|1.0\ns 10|0 1|1|1.0\n"));
    assert!(matches!(r, Err(Error::MpiParsing(_, 2))));
}

#[test]
fn rank_from_file_name() {
    assert_eq!(rank_of(Path::new("/tmp/mpi_info.3")), None);
    assert_eq!(rank_of(Path::new("/tmp/mpi_info_12.txt")), Some(12));
    assert_eq!(rank_of(Path::new("rank7")), Some(7));
}

#[test]
fn missing_log_is_empty() {
    let paths = vec![PathBuf::from("/tmp/pag-profile-no-such-mpi-5.txt")];
    let logs = read_logs(&paths).unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].proc(), 5);
    assert!(logs[0].is_empty());
}

#[test]
fn send_matches_receive() {
    let mut logs = mock_logs();
    let (edges, stats) = match_logs(&mut logs);

    let forward: Vec<_> = edges.iter().filter(|e| e.dest_proc == 1).collect();
    assert_eq!(forward.len(), 1);
    assert_eq!(forward[0].src_proc, 0);
    assert_eq!(forward[0].time, 8.0);
    assert_eq!(forward[0].src_path, vec![0x2044, 0x1124]);
    assert_eq!(forward[0].dest_path, vec![0x2064, 0x1124]);
    assert_eq!(logs[0].sends().count(), 0);
    assert_eq!(stats.matched, 1);
}

#[test]
fn blocking_send_gets_reverse_edge() {
    let mut logs = mock_logs();
    let (edges, stats) = match_logs(&mut logs);
    assert_eq!(edges.len(), 2);
    assert_eq!(stats.reverse, 1);
    let reverse = &edges[1];
    assert_eq!((reverse.src_proc, reverse.dest_proc), (1, 0));
    assert_eq!(reverse.dest_kind, CommOpKind::Send);
    assert_eq!(reverse.time, 5.0);
}

#[test]
fn nonblocking_send_has_no_reverse_edge() {
    let mut logs = vec![
        CommLog::new(0, vec![op(CommOpKind::Isend, &[0x10], &[(0, 1, 7)], 1.0)]),
        CommLog::new(1, vec![op(CommOpKind::Recv, &[0x20], &[(0, 1, 7)], 2.0)]),
    ];
    let (edges, stats) = match_logs(&mut logs);
    assert_eq!(edges.len(), 1);
    assert_eq!(stats.reverse, 0);
}

#[test]
fn send_is_consumed_once() {
    let send = op(CommOpKind::Isend, &[0x10], &[(0, 1, 7)], 1.0);
    let recv = |time| op(CommOpKind::Recv, &[0x20], &[(0, 1, 7)], time);
    let mut logs = vec![
        CommLog::new(0, vec![send]),
        CommLog::new(1, vec![recv(2.0), recv(3.0)]),
    ];
    let (edges, stats) = match_logs(&mut logs);
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].time, 2.0);
    assert_eq!(stats.matched, 1);
    assert_eq!(stats.unmatched, 1);
}

#[test]
fn first_send_in_log_order_wins() {
    let mut logs = vec![
        CommLog::new(
            0,
            vec![
                op(CommOpKind::Isend, &[0x10], &[(0, 1, 7)], 1.0),
                op(CommOpKind::Isend, &[0x30], &[(0, 1, 7)], 1.0),
            ],
        ),
        CommLog::new(1, vec![op(CommOpKind::Recv, &[0x20], &[(0, 1, 7)], 2.0)]),
    ];
    let (edges, _) = match_logs(&mut logs);
    assert_eq!(edges[0].src_path, vec![0x10]);
    let left: Vec<_> = logs[0].sends().map(|s| s.call_path.clone()).collect();
    assert_eq!(left, vec![vec![0x30]]);
}

#[test]
fn duplicate_edges_are_dropped() {
    let send = || op(CommOpKind::Isend, &[0x10], &[(0, 1, 7)], 1.0);
    let recv = || op(CommOpKind::Recv, &[0x20], &[(0, 1, 7)], 2.0);
    let mut logs = vec![
        CommLog::new(0, vec![send(), send()]),
        CommLog::new(1, vec![recv(), recv()]),
    ];
    let (edges, stats) = match_logs(&mut logs);
    assert_eq!(edges.len(), 1);
    assert_eq!(stats.matched, 2);
    assert_eq!(stats.duplicates, 1);
    // The duplicate still consumed its send
    assert_eq!(logs[0].sends().count(), 0);
}

#[test]
fn requests_without_remote_party_are_skipped() {
    let mut logs = vec![
        CommLog::new(0, vec![op(CommOpKind::Isend, &[0x10], &[(0, 0, 7)], 1.0)]),
        CommLog::new(
            1,
            vec![op(
                CommOpKind::Wait,
                &[0x20],
                &[(-1, 1, 7), (0, 1, -1), (1, 1, 7)],
                2.0,
            )],
        ),
    ];
    let (edges, stats) = match_logs(&mut logs);
    assert!(edges.is_empty());
    assert_eq!(stats.skipped, 3);
    assert_eq!(stats.completions, 1);
}

#[test]
fn matched_edges_do_not_exceed_sends_or_receives() {
    let mut logs = vec![
        CommLog::new(
            0,
            vec![
                op(CommOpKind::Isend, &[0x10], &[(0, 1, 1)], 1.0),
                op(CommOpKind::Isend, &[0x11], &[(0, 1, 2)], 1.0),
                op(CommOpKind::Isend, &[0x12], &[(0, 2, 1)], 1.0),
            ],
        ),
        CommLog::new(1, vec![op(CommOpKind::Wait, &[0x20], &[(0, 1, 1), (0, 1, 2), (0, 1, 3)], 2.0)]),
        CommLog::new(2, vec![op(CommOpKind::Irecv, &[0x30], &[(0, 2, 1)], 0.1)]),
    ];
    let (edges, stats) = match_logs(&mut logs);
    assert_eq!(stats.matched, 2);
    assert_eq!(stats.unmatched, 1);
    assert!(edges.len() <= 3);
    // The irecv never completed, so the third send stays
    assert_eq!(logs[0].sends().count(), 1);
}

#[test]
fn sequential_matching_sees_only_earlier_sends() {
    let logs = || {
        vec![
            CommLog::new(0, vec![op(CommOpKind::Isend, &[0x10], &[(0, 1, 7)], 1.0)]),
            CommLog::new(1, vec![op(CommOpKind::Recv, &[0x20], &[(0, 1, 7)], 2.0)]),
        ]
    };

    let mut early = logs();
    let (edges, stats) = match_sequential(&mut early, &[(1, 0), (0, 0)]);
    assert!(edges.is_empty());
    assert_eq!(stats.unmatched, 1);

    let mut late = logs();
    let (edges, _) = match_sequential(&mut late, &[(0, 0), (1, 0)]);
    assert_eq!(edges.len(), 1);
}

#[test]
fn interleaving_trace() {
    let order = read_order(Cursor::new("0 0\n1 0\n0 1\n")).unwrap();
    assert_eq!(order, vec![(0, 0), (1, 0), (0, 1)]);
    let r = read_order(Cursor::new("0\n"));
    assert!(matches!(r, Err(Error::MpiParsing(_, 1))));
}

#[test]
fn edge_file_reads_back_as_perf_data() {
    let mut logs = mock_logs();
    let (edges, _) = match_logs(&mut logs);
    let mut output = Vec::<u8>::new();
    write_edges_to(&mut output, &edges).unwrap();

    let text = String::from_utf8(output.clone()).unwrap();
    assert!(text.starts_with("0\n2\n2044 1124|2064 1124|8|0|1|0|0\n"));

    let trace = PerfTrace::read(Cursor::new(output)).unwrap();
    assert!(trace.samples.is_empty());
    assert_eq!(trace.edges.len(), 2);
    assert_eq!(trace.edges[0], edges[0].to_edge_sample());
}
