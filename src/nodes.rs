//! The live project tree.  Nodes live in an arena indexed by [`NodeId`]
//! so that merges can splice subtrees without chasing ownership; freed
//! slots are reused.  Every structural change happens on the model
//! thread.

use crate::evalresult::{
    InstallsItem, ProjectType, SourceFile, TargetInformation,
};
use crate::variables::{FileType, VariableStore};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use ustr::Ustr;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// State only `.pro` nodes carry.  `.pri` fragments contribute files but
/// have no project identity of their own.
#[derive(Clone, Debug, Default)]
pub struct ProState {
    pub project_type: Option<ProjectType>,
    /// Last good value; a failed or partial evaluation does not blank it.
    pub target: Option<TargetInformation>,
    pub installs: Vec<InstallsItem>,
    pub store: VariableStore,
    /// Values in `store` only the cumulative pass vouches for.
    pub cumulative_only: VariableStore,
    /// Declared generated-file producers (QMAKE_EXTRA_COMPILERS).
    pub extra_compilers: Vec<Ustr>,
    /// The last evaluation was fully exact.  False both when the file did
    /// not parse and when a conditional scope stayed undecided.
    pub valid_parse: bool,
    /// An evaluation has been scheduled and not yet merged.
    pub parse_in_progress: bool,
    /// The parent SUBDIRS entry was marked no_default_target.
    pub no_deploy: bool,
    pub errors: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct Node {
    pub path: PathBuf,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    /// Round stamp, used by merges to sweep children that were not
    /// re-confirmed by the latest result.
    pub generation: u64,
    pub files: BTreeMap<FileType, Vec<SourceFile>>,
    pub folders: BTreeMap<PathBuf, BTreeSet<FileType>>,
    pub recursive_files: BTreeMap<FileType, BTreeSet<PathBuf>>,
    /// Reached by the exact pass of the parent's evaluation.  Effective
    /// exactness also requires every ancestor's flag, see
    /// [`NodeArena::effectively_exact`].
    pub in_exact: bool,
    /// Some for `.pro` nodes, None for `.pri` fragments.
    pub pro: Option<ProState>,
}

impl Node {
    pub fn new_pro(path: &Path, parent: Option<NodeId>) -> Self {
        Self {
            pro: Some(ProState::default()),
            ..Self::new_pri(path, parent)
        }
    }

    pub fn new_pri(path: &Path, parent: Option<NodeId>) -> Self {
        Self {
            path: path.to_owned(),
            parent,
            children: vec![],
            generation: 0,
            files: BTreeMap::new(),
            folders: BTreeMap::new(),
            recursive_files: BTreeMap::new(),
            in_exact: true,
            pro: None,
        }
    }

    pub fn is_pro(&self) -> bool {
        self.pro.is_some()
    }
}

#[derive(Default)]
pub struct NodeArena {
    slots: Vec<Option<Node>>,
    free: Vec<NodeId>,
    generation: u64,
}

impl NodeArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, mut node: Node) -> NodeId {
        node.generation = self.generation;
        match self.free.pop() {
            Some(id) => {
                self.slots[id.index()] = Some(node);
                id
            }
            None => {
                self.slots.push(Some(node));
                NodeId(self.slots.len() as u32 - 1)
            }
        }
    }

    pub fn get(&self, id: NodeId) -> &Node {
        self.slots[id.index()].as_ref().unwrap_or_else(|| {
            panic!("node {} already freed", id);
        })
    }

    pub fn get_mut(&mut self, id: NodeId) -> &mut Node {
        self.slots[id.index()].as_mut().unwrap_or_else(|| {
            panic!("node {} already freed", id);
        })
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.slots
            .get(id.index())
            .map(Option::is_some)
            .unwrap_or(false)
    }

    /// Free a node and everything below it, returning the freed ids (so
    /// callers can release per-node registrations).  The caller detaches
    /// the id from its parent's children list.
    pub fn free_subtree(&mut self, id: NodeId) -> Vec<NodeId> {
        let children = match self.slots[id.index()].take() {
            Some(node) => node.children,
            None => return vec![],
        };
        self.free.push(id);
        let mut freed = vec![id];
        for child in children {
            freed.extend(self.free_subtree(child));
        }
        freed
    }

    /// Start a merge round.  Children re-confirmed by the incoming result
    /// get stamped via [`NodeArena::touch`]; [`NodeArena::sweep_children`]
    /// then frees the rest.
    pub fn begin_round(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    pub fn touch(&mut self, id: NodeId) {
        let generation = self.generation;
        self.get_mut(id).generation = generation;
    }

    /// Free the children of `parent` that were not touched this round.
    /// Returns the freed subtree roots' paths and all freed ids.
    pub fn sweep_children(
        &mut self,
        parent: NodeId,
    ) -> (Vec<PathBuf>, Vec<NodeId>) {
        let generation = self.generation;
        let (kept, stale): (Vec<NodeId>, Vec<NodeId>) = self
            .get(parent)
            .children
            .iter()
            .copied()
            .partition(|c| self.get(*c).generation == generation);
        self.get_mut(parent).children = kept;
        let mut paths = vec![];
        let mut ids = vec![];
        for id in stale {
            paths.push(self.get(id).path.clone());
            ids.extend(self.free_subtree(id));
        }
        (paths, ids)
    }

    /// Whether `path` already names this node or one of its ancestors.
    /// Guards against SUBDIRS/include loops through the live tree.
    pub fn is_ancestor_path(&self, from: NodeId, path: &Path) -> bool {
        let mut cursor = Some(from);
        while let Some(id) = cursor {
            let node = self.get(id);
            if node.path == path {
                return true;
            }
            cursor = node.parent;
        }
        false
    }

    /// A node is part of the exact model only when it and all its
    /// ancestors were reached by exact passes.
    pub fn effectively_exact(&self, id: NodeId) -> bool {
        let mut cursor = Some(id);
        while let Some(n) = cursor {
            let node = self.get(n);
            if !node.in_exact {
                return false;
            }
            cursor = node.parent;
        }
        true
    }

    pub fn find_pro(&self, path: &Path) -> Option<NodeId> {
        self.iter()
            .find(|(_, n)| n.is_pro() && n.path == path)
            .map(|(id, _)| id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|n| (NodeId(i as u32), n)))
    }

    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> (NodeArena, NodeId, NodeId, NodeId) {
        let mut arena = NodeArena::new();
        let root = arena.alloc(Node::new_pro(Path::new("/p/root.pro"), None));
        let a = arena.alloc(Node::new_pro(Path::new("/p/a/a.pro"), Some(root)));
        let pri = arena.alloc(Node::new_pri(Path::new("/p/a/c.pri"), Some(a)));
        arena.get_mut(root).children.push(a);
        arena.get_mut(a).children.push(pri);
        (arena, root, a, pri)
    }

    #[test]
    fn test_free_subtree_reuses_slots() {
        let (mut arena, root, a, pri) = tree();
        assert_eq!(arena.len(), 3);
        arena.get_mut(root).children.clear();
        arena.free_subtree(a);
        assert_eq!(arena.len(), 1);
        assert!(!arena.contains(a));
        assert!(!arena.contains(pri));
        let again = arena.alloc(Node::new_pri(Path::new("/p/x.pri"), Some(root)));
        //  a freed slot is reused
        assert!(again == a || again == pri);
    }

    #[test]
    fn test_sweep_children() {
        let (mut arena, root, a, _) = tree();
        let b = arena.alloc(Node::new_pro(Path::new("/p/b/b.pro"), Some(root)));
        arena.get_mut(root).children.push(b);

        arena.begin_round();
        arena.touch(b);
        let (freed, freed_ids) = arena.sweep_children(root);
        assert_eq!(freed, vec![PathBuf::from("/p/a/a.pro")]);
        assert_eq!(freed_ids.len(), 2); //  a and its fragment
        assert_eq!(arena.get(root).children, vec![b]);
        assert!(!arena.contains(a));
    }

    #[test]
    fn test_ancestor_path_detection() {
        let (arena, _, a, pri) = tree();
        assert!(arena.is_ancestor_path(pri, Path::new("/p/root.pro")));
        assert!(arena.is_ancestor_path(pri, Path::new("/p/a/c.pri")));
        assert!(!arena.is_ancestor_path(a, Path::new("/p/a/c.pri")));
        assert!(!arena.is_ancestor_path(pri, Path::new("/q/other.pro")));
    }

    #[test]
    fn test_find_pro_ignores_fragments() {
        let (arena, _, a, _) = tree();
        assert_eq!(arena.find_pro(Path::new("/p/a/a.pro")), Some(a));
        assert_eq!(arena.find_pro(Path::new("/p/a/c.pri")), None);
    }
}
