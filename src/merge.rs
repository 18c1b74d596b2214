//! Merging an [`EvalResult`] into the live node tree.
//!
//! Runs on the model thread only.  Fragment (`.pri`) children are
//! rebuilt wholesale from the result; subdirectory (`.pro`) children are
//! diffed by path so their subtrees survive a re-evaluation of the
//! parent.  A reference that would point back at an ancestor is skipped
//! and recorded as an error instead of looping.

use crate::evalresult::{
    EvalResult, EvalState, IncludedFileTree, ProjectType, SubdirRef,
};
use crate::graph::{Edge, IncludeGraph};
use crate::nodes::{Node, NodeArena, NodeId};
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Default)]
pub struct MergeOutcome {
    /// Newly created `.pro` children, in scheduling order; the caller
    /// still has to evaluate them.
    pub created: Vec<NodeId>,
    /// Paths of removed subtree roots.
    pub removed: Vec<PathBuf>,
    /// Every freed node id, for releasing watch registrations.  Only
    /// valid until the next allocation reuses the slots.
    pub removed_nodes: Vec<NodeId>,
    /// Subdirectory references skipped because they pointed back into
    /// their own ancestry.
    pub skipped_loops: Vec<PathBuf>,
    /// The node's parse validity or project type changed.
    pub parse_state_changed: bool,
    /// Anything user-visible about the subtree changed.
    pub tree_changed: bool,
}

/// A comparable digest of everything user-visible about a node and its
/// fragment children.  Subdirectory children contribute their identity
/// and exactness only; their contents belong to their own merges.
type Snapshot = Vec<(
    PathBuf,
    std::collections::BTreeMap<crate::variables::FileType, Vec<crate::evalresult::SourceFile>>,
    std::collections::BTreeMap<PathBuf, std::collections::BTreeSet<crate::variables::FileType>>,
    std::collections::BTreeMap<crate::variables::FileType, std::collections::BTreeSet<PathBuf>>,
    bool,
)>;

fn snapshot(arena: &NodeArena, id: NodeId) -> Snapshot {
    let mut out = Snapshot::new();
    snapshot_into(arena, id, true, &mut out);
    out
}

fn snapshot_into(arena: &NodeArena, id: NodeId, descend: bool, out: &mut Snapshot) {
    let node = arena.get(id);
    out.push((
        node.path.clone(),
        node.files.clone(),
        node.folders.clone(),
        node.recursive_files.clone(),
        node.in_exact,
    ));
    if !descend {
        return;
    }
    for child in &node.children {
        snapshot_into(arena, *child, !arena.get(*child).is_pro(), out);
    }
}

pub fn apply_result(
    arena: &mut NodeArena,
    graph: &mut IncludeGraph,
    node: NodeId,
    result: &EvalResult,
) -> MergeOutcome {
    let mut outcome = MergeOutcome::default();
    let before = snapshot(arena, node);
    let node_path = arena.get(node).path.clone();

    let (was_valid, old_type) = {
        let n = arena.get_mut(node);
        let pro = n.pro.as_mut().expect("merge target must be a project node");
        pro.parse_in_progress = false;
        (pro.valid_parse, pro.project_type)
    };

    if result.state == EvalState::Fail {
        //  The file no longer parses.  Its last known contents stay in
        //  the tree so consumers do not see everything flash away, but
        //  the children are gone until it parses again.
        for child in arena.get(node).children.clone() {
            outcome.removed.push(arena.get(child).path.clone());
            outcome.removed_nodes.extend(arena.free_subtree(child));
        }
        let n = arena.get_mut(node);
        n.children.clear();
        let pro = n.pro.as_mut().unwrap();
        pro.valid_parse = false;
        pro.project_type = Some(ProjectType::Invalid);
        pro.errors = result.errors.clone();
        graph.set_edges(&node_path, &[]);
        outcome.parse_state_changed =
            was_valid || old_type != Some(ProjectType::Invalid);
        outcome.tree_changed = !outcome.removed.is_empty();
        return outcome;
    }

    let type_changed = old_type.is_some() && old_type != Some(result.project_type);

    arena.begin_round();

    //  Fragments: rebuild from scratch, the result is authoritative.
    let mut new_children: Vec<NodeId> = result
        .included
        .iter()
        .map(|tree| build_fragment(arena, node, tree))
        .collect();

    //  Subdirectories: diff by path, keeping surviving subtrees.  On a
    //  project-type change nothing is reused.
    let existing: HashMap<PathBuf, NodeId> = if type_changed {
        HashMap::new()
    } else {
        arena
            .get(node)
            .children
            .iter()
            .filter(|c| arena.get(**c).is_pro())
            .map(|c| (arena.get(*c).path.clone(), *c))
            .collect()
    };
    let mut loop_errors = vec![];
    for subdir in desired_subdirs(result) {
        if arena.is_ancestor_path(node, &subdir.pro_file)
            || graph.would_loop(&node_path, &subdir.pro_file)
        {
            loop_errors.push(format!(
                "skipped subdirectory {} to avoid a reference loop",
                subdir.pro_file.display()
            ));
            outcome.skipped_loops.push(subdir.pro_file.clone());
            continue;
        }
        let in_exact = result
            .subdirs
            .exact
            .iter()
            .any(|r| r.pro_file == subdir.pro_file);
        match existing.get(&subdir.pro_file) {
            Some(id) => {
                arena.touch(*id);
                let child = arena.get_mut(*id);
                child.in_exact = in_exact;
                if let Some(pro) = child.pro.as_mut() {
                    pro.no_deploy = subdir.no_deploy;
                }
                new_children.push(*id);
            }
            None => {
                let mut child = Node::new_pro(&subdir.pro_file, Some(node));
                child.in_exact = in_exact;
                child.pro.as_mut().unwrap().no_deploy = subdir.no_deploy;
                let id = arena.alloc(child);
                new_children.push(id);
                outcome.created.push(id);
            }
        }
    }

    let (freed, freed_ids) = arena.sweep_children(node);
    outcome.removed_nodes = freed_ids;
    //  A fragment rebuilt under the same path is an update, not a removal.
    let new_paths: std::collections::HashSet<PathBuf> = new_children
        .iter()
        .map(|c| arena.get(*c).path.clone())
        .collect();
    outcome.removed = freed
        .into_iter()
        .filter(|p| !new_paths.contains(p))
        .collect();
    arena.get_mut(node).children = new_children;

    let new_valid = result.state == EvalState::Ok;
    {
        let n = arena.get_mut(node);
        n.files = result.own.files.clone();
        n.folders = result.own.folders.clone();
        n.recursive_files = result.own.recursive_files.clone();
        let pro = n.pro.as_mut().unwrap();
        pro.valid_parse = new_valid;
        pro.project_type = Some(result.project_type);
        //  Target information only comes from a successful exact pass; a
        //  partial evaluation keeps the last good value.
        if result.target.is_some() {
            pro.target = result.target.clone();
        }
        pro.installs = result.installs.clone();
        pro.store = result.store.clone();
        pro.cumulative_only = result.cumulative_only.clone();
        pro.extra_compilers = result.extra_compilers.clone();
        pro.errors = result.errors.clone();
        pro.errors.extend(loop_errors);
    }

    record_edges(graph, &node_path, result, &outcome.skipped_loops);

    outcome.parse_state_changed =
        was_valid != new_valid || old_type != Some(result.project_type);
    outcome.tree_changed = !outcome.created.is_empty()
        || !outcome.removed.is_empty()
        || snapshot(arena, node) != before;
    outcome
}

/// The children a subdirs project should have: the cumulative view, plus
/// any exact-only stragglers (in practice exact is a subset).  One node
/// per distinct `.pro` file, however often SUBDIRS names it.
fn desired_subdirs(result: &EvalResult) -> Vec<&SubdirRef> {
    let mut out: Vec<&SubdirRef> = vec![];
    for r in result.subdirs.cumulative.iter().chain(&result.subdirs.exact) {
        if !out.iter().any(|o| o.pro_file == r.pro_file) {
            out.push(r);
        }
    }
    out
}

fn build_fragment(
    arena: &mut NodeArena,
    parent: NodeId,
    tree: &IncludedFileTree,
) -> NodeId {
    let mut node = Node::new_pri(&tree.path, Some(parent));
    node.files = tree.slice.files.clone();
    node.folders = tree.slice.folders.clone();
    node.recursive_files = tree.slice.recursive_files.clone();
    node.in_exact = tree.in_exact;
    let id = arena.alloc(node);
    for child in tree.children.values() {
        let c = build_fragment(arena, id, child);
        arena.get_mut(id).children.push(c);
    }
    id
}

/// Mirror the result's reference structure into the global graph, so
/// later merges can detect loops spanning several project files.
fn record_edges(
    graph: &mut IncludeGraph,
    node_path: &std::path::Path,
    result: &EvalResult,
    skipped: &[PathBuf],
) {
    let mut refs: Vec<(PathBuf, Edge)> = result
        .included
        .iter()
        .map(|t| (t.path.clone(), Edge::Includes))
        .collect();
    for subdir in desired_subdirs(result) {
        if !skipped.contains(&subdir.pro_file) {
            refs.push((subdir.pro_file.clone(), Edge::Subdir));
        }
    }
    graph.set_edges(node_path, &refs);
    for tree in &result.included {
        record_fragment_edges(graph, tree);
    }
}

fn record_fragment_edges(graph: &mut IncludeGraph, tree: &IncludedFileTree) {
    let refs: Vec<(PathBuf, Edge)> = tree
        .children
        .keys()
        .map(|p| (p.clone(), Edge::Includes))
        .collect();
    graph.set_edges(&tree.path, &refs);
    for child in tree.children.values() {
        record_fragment_edges(graph, child);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evalresult::{
        FileOrigin, ResultSlice, SourceFile, SubdirsResolution,
    };
    use crate::variables::{FileType, VariableStore};
    use std::path::Path;

    fn ok_result(path: &str) -> EvalResult {
        EvalResult {
            pro_file: PathBuf::from(path),
            state: EvalState::Ok,
            project_type: ProjectType::Application,
            target: None,
            installs: vec![],
            own: ResultSlice::default(),
            included: vec![],
            subdirs: SubdirsResolution::default(),
            store: VariableStore::default(),
            cumulative_only: VariableStore::default(),
            extra_compilers: vec![],
            errors: vec![],
            warnings: vec![],
        }
    }

    fn subdirs_result(path: &str, children: &[&str]) -> EvalResult {
        let refs: Vec<SubdirRef> = children
            .iter()
            .map(|c| SubdirRef {
                entry: ustr::Ustr::from(c),
                pro_file: PathBuf::from(c),
                no_deploy: false,
            })
            .collect();
        EvalResult {
            project_type: ProjectType::SubDirs,
            subdirs: SubdirsResolution {
                exact: refs.clone(),
                cumulative: refs,
                errors: vec![],
            },
            ..ok_result(path)
        }
    }

    fn source(path: &str) -> SourceFile {
        SourceFile {
            path: PathBuf::from(path),
            origin: FileOrigin::ExactParse,
        }
    }

    fn setup(path: &str) -> (NodeArena, IncludeGraph, NodeId) {
        let mut arena = NodeArena::new();
        let root = arena.alloc(Node::new_pro(Path::new(path), None));
        (arena, IncludeGraph::default(), root)
    }

    #[test]
    fn test_merge_is_idempotent() {
        let (mut arena, mut graph, root) = setup("/r/app.pro");
        let mut result = ok_result("/r/app.pro");
        result.own.push(FileType::Source, source("/r/main.cpp"));
        let mut frag = IncludedFileTree::new(Path::new("/r/common.pri"));
        frag.in_exact = true;
        frag.slice.push(FileType::Source, source("/r/extra.cpp"));
        result.included.push(frag);

        let first = apply_result(&mut arena, &mut graph, root, &result);
        assert!(first.tree_changed);
        assert!(first.parse_state_changed);
        assert_eq!(arena.get(root).children.len(), 1);

        //  applying the same result again changes nothing visible
        let second = apply_result(&mut arena, &mut graph, root, &result);
        assert!(!second.tree_changed);
        assert!(!second.parse_state_changed);
        assert!(second.created.is_empty());
        assert!(second.removed.is_empty());
        assert_eq!(arena.get(root).children.len(), 1);
    }

    #[test]
    fn test_subdir_children_survive_remerge() {
        let (mut arena, mut graph, root) = setup("/r/root.pro");
        let r1 = subdirs_result("/r/root.pro", &["/r/a/a.pro", "/r/b/b.pro"]);
        let o1 = apply_result(&mut arena, &mut graph, root, &r1);
        assert_eq!(o1.created.len(), 2);
        let a = o1.created[0];

        //  b dropped, a kept with the same id
        let r2 = subdirs_result("/r/root.pro", &["/r/a/a.pro"]);
        let o2 = apply_result(&mut arena, &mut graph, root, &r2);
        assert!(o2.created.is_empty());
        assert_eq!(o2.removed, vec![PathBuf::from("/r/b/b.pro")]);
        assert_eq!(arena.get(root).children, vec![a]);
    }

    #[test]
    fn test_duplicate_subdir_entries_collapse() {
        let (mut arena, mut graph, root) = setup("/r/root.pro");
        let r = subdirs_result("/r/root.pro", &["/r/a/a.pro", "/r/a/a.pro"]);
        let o = apply_result(&mut arena, &mut graph, root, &r);
        //  SUBDIRS named the same project twice: one node, one evaluation
        assert_eq!(o.created.len(), 1);
        assert_eq!(arena.get(root).children.len(), 1);
    }

    #[test]
    fn test_parse_failure_keeps_last_contents() {
        let (mut arena, mut graph, root) = setup("/r/app.pro");
        let mut ok = ok_result("/r/app.pro");
        ok.own.push(FileType::Source, source("/r/main.cpp"));
        ok.included
            .push(IncludedFileTree::new(Path::new("/r/c.pri")));
        apply_result(&mut arena, &mut graph, root, &ok);

        let fail =
            EvalResult::failed(Path::new("/r/app.pro"), "syntax error".into());
        let outcome = apply_result(&mut arena, &mut graph, root, &fail);
        assert!(outcome.parse_state_changed);
        assert_eq!(outcome.removed, vec![PathBuf::from("/r/c.pri")]);

        let node = arena.get(root);
        //  last known files stay visible
        assert_eq!(node.files[&FileType::Source], vec![source("/r/main.cpp")]);
        assert!(node.children.is_empty());
        let pro = node.pro.as_ref().unwrap();
        assert!(!pro.valid_parse);
        assert_eq!(pro.project_type, Some(ProjectType::Invalid));
        assert_eq!(pro.errors, vec!["syntax error".to_string()]);
    }

    #[test]
    fn test_partial_keeps_target_and_type() {
        let (mut arena, mut graph, root) = setup("/r/app.pro");
        let mut ok = ok_result("/r/app.pro");
        ok.target = Some(crate::evalresult::TargetInformation {
            valid: true,
            target: Some(ustr::Ustr::from("app")),
            ..Default::default()
        });
        apply_result(&mut arena, &mut graph, root, &ok);

        //  a later evaluation hits an undecidable condition
        let mut partial = ok_result("/r/app.pro");
        partial.state = EvalState::Partial;
        partial.target = None;
        let o = apply_result(&mut arena, &mut graph, root, &partial);
        assert!(o.parse_state_changed);

        let pro = arena.get(root).pro.as_ref().unwrap();
        assert!(!pro.valid_parse);
        //  type and target keep their last good values
        assert_eq!(pro.project_type, Some(ProjectType::Application));
        assert_eq!(
            pro.target.as_ref().and_then(|t| t.target),
            Some(ustr::Ustr::from("app"))
        );
    }

    #[test]
    fn test_ancestor_loop_is_skipped() {
        let (mut arena, mut graph, root) = setup("/r/root.pro");
        let r1 = subdirs_result("/r/root.pro", &["/r/a/a.pro"]);
        let o1 = apply_result(&mut arena, &mut graph, root, &r1);
        let a = o1.created[0];

        //  a's own result points back at the root
        let r2 = subdirs_result("/r/a/a.pro", &["/r/root.pro"]);
        let o2 = apply_result(&mut arena, &mut graph, a, &r2);
        assert!(o2.created.is_empty());
        assert_eq!(o2.skipped_loops, vec![PathBuf::from("/r/root.pro")]);
        let pro = arena.get(a).pro.as_ref().unwrap();
        assert!(pro.errors.iter().any(|e| e.contains("reference loop")));
    }

    #[test]
    fn test_graph_loop_is_skipped() {
        //  A loop not visible in the ancestor chain: two subdir projects
        //  referencing each other under a common root.
        let (mut arena, mut graph, root) = setup("/r/root.pro");
        let o = apply_result(
            &mut arena,
            &mut graph,
            root,
            &subdirs_result("/r/root.pro", &["/r/a/a.pro", "/r/b/b.pro"]),
        );
        let (a, b) = (o.created[0], o.created[1]);

        apply_result(
            &mut arena,
            &mut graph,
            a,
            &subdirs_result("/r/a/a.pro", &["/r/b/b.pro"]),
        );
        let ob = apply_result(
            &mut arena,
            &mut graph,
            b,
            &subdirs_result("/r/b/b.pro", &["/r/a/a.pro"]),
        );
        assert_eq!(ob.skipped_loops, vec![PathBuf::from("/r/a/a.pro")]);
    }

    #[test]
    fn test_type_change_discards_children() {
        let (mut arena, mut graph, root) = setup("/r/root.pro");
        let o1 = apply_result(
            &mut arena,
            &mut graph,
            root,
            &subdirs_result("/r/root.pro", &["/r/a/a.pro"]),
        );
        assert_eq!(o1.created.len(), 1);

        //  the project turned into a plain application
        let o2 = apply_result(&mut arena, &mut graph, root, &ok_result("/r/root.pro"));
        assert!(o2.parse_state_changed);
        assert_eq!(o2.removed, vec![PathBuf::from("/r/a/a.pro")]);
        assert!(arena.get(root).children.is_empty());
    }

    #[test]
    fn test_exactness_propagates_through_ancestors() {
        let (mut arena, mut graph, root) = setup("/r/root.pro");
        let mut r1 = subdirs_result("/r/root.pro", &["/r/a/a.pro"]);
        r1.subdirs.exact.clear(); //  child only found by cumulative pass
        let o1 = apply_result(&mut arena, &mut graph, root, &r1);
        let a = o1.created[0];

        let mut ra = ok_result("/r/a/a.pro");
        let mut frag = IncludedFileTree::new(Path::new("/r/a/c.pri"));
        frag.in_exact = true;
        ra.included.push(frag);
        let oa = apply_result(&mut arena, &mut graph, a, &ra);
        assert!(oa.tree_changed);

        let pri = arena.get(a).children[0];
        //  the fragment is exact locally, but its project is not
        assert!(arena.get(pri).in_exact);
        assert!(!arena.effectively_exact(pri));
        assert!(!arena.effectively_exact(a));
        assert!(arena.effectively_exact(root));
    }
}
