use petgraph::algo::{has_path_connecting, toposort};
use petgraph::graph::Graph;
use petgraph::visit::Bfs;
use petgraph::Directed;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub type NodeIndex = petgraph::graph::NodeIndex<u32>;

/// The edges of the graph
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Edge {
    /// A `.pro`/`.pri` file include()s another fragment
    Includes,
    /// A subdirs project references a child `.pro`
    Subdir,
}

/// The file-reference graph across the whole model: one node per
/// `.pro`/`.pri` path, rebuilt edge-wise as merges land.  Used to detect
/// reference loops that the per-evaluation include stack cannot see
/// (loops spanning several project files) and to order the scheduling of
/// newly created children.
pub struct IncludeGraph {
    graph: Graph<PathBuf, Edge, Directed, u32>,
    indices: HashMap<PathBuf, NodeIndex>,
}

impl IncludeGraph {
    pub fn ensure_node(&mut self, path: &Path) -> NodeIndex {
        match self.indices.get(path) {
            Some(idx) => *idx,
            None => {
                let idx = self.graph.add_node(path.to_owned());
                self.indices.insert(path.to_owned(), idx);
                idx
            }
        }
    }

    /// Replace all outgoing edges of `from` with the given references.
    /// Called once per merged result, so the graph always mirrors the
    /// latest evaluation of each file.
    pub fn set_edges(&mut self, from: &Path, refs: &[(PathBuf, Edge)]) {
        let from_idx = self.ensure_node(from);
        self.graph.retain_edges(|g, e| {
            g.edge_endpoints(e)
                .map(|(s, _)| s != from_idx)
                .unwrap_or(false)
        });
        for (to, kind) in refs {
            let to_idx = self.ensure_node(to);
            self.graph.add_edge(from_idx, to_idx, *kind);
        }
    }

    /// Whether adding an edge from `from` to `to` would close a cycle.
    pub fn would_loop(&mut self, from: &Path, to: &Path) -> bool {
        let from_idx = self.ensure_node(from);
        let to_idx = self.ensure_node(to);
        from_idx == to_idx
            || has_path_connecting(&self.graph, to_idx, from_idx, None)
    }

    /// Order a set of `.pro` paths so that every file comes after the
    /// files that reference it.  Falls back to the input order when the
    /// graph currently has a cycle.
    pub fn schedule_order(&self, paths: &[PathBuf]) -> Vec<PathBuf> {
        let sorted = match toposort(&self.graph, None) {
            Ok(s) => s,
            Err(_) => return paths.to_vec(),
        };
        let mut out: Vec<PathBuf> = sorted
            .into_iter()
            .map(|idx| self.graph[idx].clone())
            .filter(|p| paths.contains(p))
            .collect();
        //  paths not in the graph yet go last, in input order
        for p in paths {
            if !out.contains(p) {
                out.push(p.clone());
            }
        }
        out
    }

    /// Every file reachable from `start`, excluding `start` itself.
    pub fn dependencies(&mut self, start: &Path) -> Vec<PathBuf> {
        let start_idx = self.ensure_node(start);
        let mut bfs = Bfs::new(&self.graph, start_idx);
        let mut result = Vec::new();
        while let Some(node) = bfs.next(&self.graph) {
            if node != start_idx {
                result.push(self.graph[node].clone());
            }
        }
        result
    }
}

impl Default for IncludeGraph {
    fn default() -> Self {
        Self {
            graph: Graph::new(),
            indices: HashMap::new(),
        }
    }
}
