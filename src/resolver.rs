//! pag-profile call-path resolver module.
//!
//! Maps a raw backtrace onto the structural vertex it was sampled in. Call
//! paths are stored innermost frame first, so used as a stack the top is the
//! outermost frame: descent starts at the root and consumes frames outwards in.

use crate::config::DEFAULT_SLACK;
use crate::graph::Graph;
use crate::{Address, VertexId};

/// Approximation knobs of call-path resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolveOptions {
    /// Tolerance between a return address and the call site range.
    pub slack: Address,
    /// Return the deepest match when an address cannot be placed,
    /// instead of reporting the path as unresolved.
    pub best_ancestor: bool,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        ResolveOptions {
            slack: DEFAULT_SLACK,
            best_ancestor: true,
        }
    }
}

/// Descends from `root` following `call_path`, consuming frames at call vertices.
///
/// Containers (functions, loops, basic blocks) are entered without consuming
/// the top address; call-like vertices consume it and resolution continues
/// below them with the rest of the path. Returns `None` only when
/// `best_ancestor` is off and the stopping vertex does not cover the
/// remaining top address.
pub fn resolve(
    graph: &Graph,
    root: VertexId,
    call_path: &mut Vec<Address>,
    opts: &ResolveOptions,
) -> Option<VertexId> {
    let mut current = root;

    while let Some(&top) = call_path.last() {
        let child = match matching_child(graph, current, top, opts.slack) {
            Some(child) => child,
            None => {
                tracing::debug!("resolve: 0x{:x} stops at vertex {}", top, current);
                if opts.best_ancestor || graph.vertex(current).covers(top, opts.slack) {
                    return Some(current);
                }
                return None;
            }
        };
        current = child;
        if !graph.vertex(child).kind().is_container() {
            call_path.pop();
        }
    }

    Some(current)
}

/// Resolves after dropping outer frames that belong neither to `root` nor to
/// any of its children (process start-up or thread trampolines).
pub fn resolve_trimmed(
    graph: &Graph,
    root: VertexId,
    call_path: &mut Vec<Address>,
    opts: &ResolveOptions,
) -> Option<VertexId> {
    while let Some(&top) = call_path.last() {
        if graph.vertex(root).covers(top, opts.slack)
            || matching_child(graph, root, top, opts.slack).is_some()
        {
            break;
        }
        call_path.pop();
    }
    resolve(graph, root, call_path, opts)
}

/// Resolves a borrowed path, leaving the caller's copy intact.
pub fn resolve_path(
    graph: &Graph,
    root: VertexId,
    call_path: &[Address],
    opts: &ResolveOptions,
) -> Option<VertexId> {
    let mut stack = call_path.to_vec();
    resolve_trimmed(graph, root, &mut stack, opts)
}

/// Returns the first child whose range covers the address.
fn matching_child(graph: &Graph, v: VertexId, address: Address, slack: Address) -> Option<VertexId> {
    graph
        .children(v)
        .find(|&c| graph.vertex(c).covers(address, slack))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::mock;

    #[test]
    fn empty_path_returns_root() {
        let pag = mock::linked_pag();
        let opts = ResolveOptions::default();
        assert_eq!(resolve(&pag, 0, &mut vec![], &opts), Some(0));
    }

    #[test]
    fn container_does_not_consume_frame() {
        let pag = mock::linked_pag();
        let opts = ResolveOptions::default();
        // Sampled inside main's loop, outside any call
        let mut path = vec![0x1150];
        let v = resolve(&pag, 0, &mut path, &opts).unwrap();
        assert_eq!(pag.vertex(v).name(), "loop_1");
        assert_eq!(path, vec![0x1150]);
    }

    #[test]
    fn call_consumes_frame_and_descends_into_callee() {
        let pag = mock::linked_pag();
        let opts = ResolveOptions::default();
        // main calls compute at 0x1120, compute is sampled at its send call
        let mut path = vec![0x2040, 0x1124];
        let v = resolve(&pag, 0, &mut path, &opts).unwrap();
        assert_eq!(pag.vertex(v).name(), "MPI_Send");
        assert!(path.is_empty());
    }

    #[test]
    fn resolution_is_deterministic() {
        let pag = mock::linked_pag();
        let opts = ResolveOptions::default();
        let path = vec![0x2010, 0x1124];
        let a = resolve(&pag, 0, &mut path.clone(), &opts);
        let b = resolve(&pag, 0, &mut path.clone(), &opts);
        assert_eq!(a, b);
        assert!(a.is_some());
    }

    #[test]
    fn miss_policy_is_configurable() {
        let pag = mock::linked_pag();
        let lenient = ResolveOptions::default();
        let strict = ResolveOptions {
            best_ancestor: false,
            ..lenient
        };
        // Return address inside compute's call site, inner frame nowhere
        let path = vec![0xdead_0000, 0x1124];
        let v = resolve(&pag, 0, &mut path.clone(), &lenient).unwrap();
        assert_eq!(pag.vertex(v).name(), "compute");
        assert_eq!(resolve(&pag, 0, &mut path.clone(), &strict), None);
    }

    #[test]
    fn trimmed_resolution_skips_startup_frames() {
        let pag = mock::linked_pag();
        let opts = ResolveOptions::default();
        let path = vec![0x1150, 0x7f00_0010, 0x7f00_0020];
        let v = resolve_path(&pag, 0, &path, &opts).unwrap();
        assert_eq!(pag.vertex(v).name(), "loop_1");
    }
}
