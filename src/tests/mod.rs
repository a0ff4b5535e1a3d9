//! pag-profile tests module.


use crate::perf::{embed, PerfSample, ThreadAncestry};
use crate::resolver::{resolve_path, ResolveOptions};

#[test]
fn resolution_is_deterministic() {
    let pag = mock::linked_pag();
    let opts = ResolveOptions::default();
    let path = mock::worker_send_path();
    let first = resolve_path(&pag, 6, &path, &opts);
    assert_eq!(first, Some(11));
    assert_eq!(resolve_path(&pag, 6, &path, &opts), first);
}

#[test]
fn grandchild_thread_resolves_through_its_creators() {
    let mut ancestry = ThreadAncestry::new();
    ancestry.insert(0, 1, mock::create_path(), 0);
    // Thread 1 creates thread 2 from inside compute
    ancestry.insert(0, 2, vec![0x3024, 0x7f00_2000], 1);
    let sample = PerfSample {
        call_path: vec![0x2064],
        proc: 0,
        thread: 2,
        value: 1.0,
    };
    let opts = ResolveOptions::default();

    let mut pag = mock::linked_pag();
    embed(&mut pag, 0, &[sample.clone()], &ancestry, "M", &opts);
    assert_eq!(pag.perf_data().get(12, "M", 0, 2), Some(1.0));

    let mut pag = mock::linked_pag();
    embed(&mut pag, 0, &[sample], &ThreadAncestry::new(), "M", &opts);
    assert_eq!(pag.perf_data().get(12, "M", 0, 2), None);
    assert_eq!(pag.perf_data().get(0, "M", 0, 2), Some(1.0));
}
