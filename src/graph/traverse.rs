//! pag-profile graph traversals.

use super::Graph;
use crate::VertexId;
use std::collections::VecDeque;

/// Receives vertices of a depth-first traversal.
pub trait Visitor {
    /// Called when the traversal first reaches a vertex.
    fn enter(&mut self, _graph: &Graph, _v: VertexId) {}

    /// Called once all descendants of a vertex have been left.
    fn leave(&mut self, _graph: &Graph, _v: VertexId) {}
}

impl Graph {
    /// Pre-order depth-first traversal from `root`; each vertex is visited once.
    pub fn dfs(&mut self, root: VertexId, visitor: &mut impl Visitor) {
        self.prepare();
        self.walk_dfs(root, visitor);
    }

    /// Breadth-first traversal from `root`.
    pub fn bfs(&mut self, root: VertexId, mut f: impl FnMut(&Graph, VertexId)) {
        self.prepare();
        let mut visited = vec![false; self.used];
        let mut queue = VecDeque::new();
        visited[root] = true;
        queue.push_back(root);
        while let Some(v) = queue.pop_front() {
            f(self, v);
            for c in self.children(v) {
                if !visited[c] {
                    visited[c] = true;
                    queue.push_back(c);
                }
            }
        }
    }

    /// Visits every live vertex in id order.
    pub fn for_each_vertex(&mut self, mut f: impl FnMut(&Graph, VertexId)) {
        self.prepare();
        for v in self.vertex_ids() {
            f(self, v);
        }
    }

    /// Returns live vertices reachable from `root` in pre-order.
    pub fn preorder(&self, root: VertexId) -> Vec<VertexId> {
        struct Collect(Vec<VertexId>);

        impl Visitor for Collect {
            fn enter(&mut self, _: &Graph, v: VertexId) {
                self.0.push(v);
            }
        }

        let mut collect = Collect(Vec::new());
        self.walk_dfs(root, &mut collect);
        collect.0
    }

    fn walk_dfs(&self, root: VertexId, visitor: &mut impl Visitor) {
        if !self.is_vertex(root) {
            return;
        }
        let mut visited = vec![false; self.used];
        let mut stack: Vec<(VertexId, Vec<VertexId>, usize)> = Vec::new();

        visited[root] = true;
        visitor.enter(self, root);
        stack.push((root, self.children(root).collect(), 0));

        while let Some((v, children, next)) = stack.last_mut() {
            if let Some(&c) = children.get(*next) {
                *next += 1;
                if !visited[c] {
                    visited[c] = true;
                    visitor.enter(self, c);
                    let grandchildren = self.children(c).collect();
                    stack.push((c, grandchildren, 0));
                }
            } else {
                let v = *v;
                stack.pop();
                visitor.leave(self, v);
            }
        }
    }
}
