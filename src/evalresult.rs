//! The outcome of evaluating one `.pro` file: what kind of project it is,
//! which files it contributes (split by declaring fragment), its install
//! and target information, and the subdirectory projects it points at.
//! This is a plain value, produced on a worker thread and merged into the
//! live node tree on the model thread.

use crate::variables::{FileType, VariableStore};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use ustr::Ustr;

/// How far the evaluation got.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EvalState {
    /// Both the exact and the cumulative pass succeeded.
    Ok,
    /// The exact pass hit an undecidable condition; cumulative results
    /// are available.
    Partial,
    /// The file could not be parsed at all.
    Fail,
}

/// Which pass vouches for a file.  Exact entries are authoritative;
/// cumulative entries exist so the tree still shows files inside
/// unresolved conditional scopes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum FileOrigin {
    ExactParse,
    CumulativeParse,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct SourceFile {
    pub path: PathBuf,
    pub origin: FileOrigin,
}

/// One item of the INSTALLS variable, resolved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InstallsItem {
    pub name: Ustr,
    pub path: Option<PathBuf>,
    pub files: Vec<SourceFile>,
    /// False when `item.CONFIG` contained no_default_install: the rule
    /// exists but is not part of a default install.
    pub active: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProjectType {
    Application,
    StaticLibrary,
    SharedLibrary,
    Script,
    Aux,
    SubDirs,
    /// The file failed to parse; kept so the tree still shows the node.
    Invalid,
}

impl ProjectType {
    pub fn from_template(template: &str, config: &[Ustr]) -> ProjectType {
        let has = |a: &str| config.iter().any(|c| c.as_str() == a);
        match template {
            "app" => ProjectType::Application,
            "lib" => {
                if has("staticlib") {
                    ProjectType::StaticLibrary
                } else {
                    ProjectType::SharedLibrary
                }
            }
            "subdirs" => ProjectType::SubDirs,
            "aux" => ProjectType::Aux,
            "script" => ProjectType::Script,
            _ => ProjectType::Invalid,
        }
    }

    pub fn is_buildable(self) -> bool {
        matches!(
            self,
            ProjectType::Application
                | ProjectType::StaticLibrary
                | ProjectType::SharedLibrary
        )
    }
}

impl std::fmt::Display for ProjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProjectType::Application => "app",
            ProjectType::StaticLibrary => "staticlib",
            ProjectType::SharedLibrary => "sharedlib",
            ProjectType::Script => "script",
            ProjectType::Aux => "aux",
            ProjectType::SubDirs => "subdirs",
            ProjectType::Invalid => "invalid",
        };
        write!(f, "{}", s)
    }
}

/// Build products of a buildable project.  Only a successful exact pass
/// produces one (a cumulative union of TARGET values would be
/// meaningless); on failure the node keeps its last good value.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TargetInformation {
    pub valid: bool,
    pub target: Option<Ustr>,
    /// Directory the build runs in (the shadow-build directory when one
    /// is configured, the source directory otherwise).
    pub build_dir: Option<PathBuf>,
    pub dest_dir: Option<PathBuf>,
    /// Target file name including the platform extension, if declared.
    pub build_target: Option<Ustr>,
}

/// The file contribution of one project or fragment file.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResultSlice {
    /// Files referenced one by one, per type.
    pub files: BTreeMap<FileType, Vec<SourceFile>>,
    /// Directories referenced as a whole, with the file types collected
    /// from each (needed again when the directory content changes).
    pub folders: BTreeMap<PathBuf, BTreeSet<FileType>>,
    /// Files discovered by enumerating `folders`, per type.
    pub recursive_files: BTreeMap<FileType, BTreeSet<PathBuf>>,
}

impl ResultSlice {
    pub fn push(&mut self, kind: FileType, file: SourceFile) {
        self.files.entry(kind).or_default().push(file);
    }
}

/// One included fragment, with the fragments it includes in turn.  The
/// tree mirrors include() nesting; children keyed by path so two merges
/// of the same result visit them in the same order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IncludedFileTree {
    pub path: PathBuf,
    pub slice: ResultSlice,
    /// Whether the exact pass reached this fragment (false when only the
    /// cumulative pass did, or when the exact pass failed).
    pub in_exact: bool,
    pub children: BTreeMap<PathBuf, IncludedFileTree>,
}

impl IncludedFileTree {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_owned(),
            ..Default::default()
        }
    }
}

/// A subdirectory project reference, after alias resolution.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct SubdirRef {
    /// The raw SUBDIRS entry (possibly an alias).
    pub entry: Ustr,
    /// The `.pro` file the entry resolves to.
    pub pro_file: PathBuf,
    /// `entry.CONFIG` contained no_default_target
    pub no_deploy: bool,
}

/// The resolved SUBDIRS of a `subdirs` project, kept separately for the
/// two passes so the merge can tell which children are exact.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubdirsResolution {
    pub exact: Vec<SubdirRef>,
    pub cumulative: Vec<SubdirRef>,
    /// Entries that did not resolve to an existing `.pro` file.
    pub errors: Vec<String>,
}

/// Everything one evaluation produced.
#[derive(Clone, Debug, PartialEq)]
pub struct EvalResult {
    pub pro_file: PathBuf,
    pub state: EvalState,
    pub project_type: ProjectType,
    /// Only present when the exact pass succeeded on a buildable project.
    pub target: Option<TargetInformation>,
    pub installs: Vec<InstallsItem>,
    /// The `.pro` file's own contribution.
    pub own: ResultSlice,
    /// Contributions of included fragments.
    pub included: Vec<IncludedFileTree>,
    pub subdirs: SubdirsResolution,
    /// Published variable values (union of both passes).
    pub store: VariableStore,
    /// The subset of `store` only the cumulative pass vouches for: values
    /// the exact pass did not produce, or everything when it failed.
    pub cumulative_only: VariableStore,
    /// Names declared in QMAKE_EXTRA_COMPILERS (generated-file producers).
    pub extra_compilers: Vec<Ustr>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl EvalResult {
    /// A result representing a file that could not be parsed.  The node
    /// keeps its place in the tree but loses its children and contents.
    pub fn failed(pro_file: &Path, error: String) -> Self {
        Self {
            pro_file: pro_file.to_owned(),
            state: EvalState::Fail,
            project_type: ProjectType::Invalid,
            target: None,
            installs: vec![],
            own: ResultSlice::default(),
            included: vec![],
            subdirs: SubdirsResolution::default(),
            store: VariableStore::default(),
            cumulative_only: VariableStore::default(),
            extra_compilers: vec![],
            errors: vec![error],
            warnings: vec![],
        }
    }

    /// All folders referenced by the project or any fragment, for watch
    /// reconciliation.
    pub fn all_folders(&self) -> BTreeSet<PathBuf> {
        let mut out: BTreeSet<PathBuf> = self.own.folders.keys().cloned().collect();
        let mut stack: Vec<&IncludedFileTree> = self.included.iter().collect();
        while let Some(t) = stack.pop() {
            out.extend(t.slice.folders.keys().cloned());
            stack.extend(t.children.values());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_mapping() {
        let none: Vec<Ustr> = vec![];
        assert_eq!(
            ProjectType::from_template("app", &none),
            ProjectType::Application
        );
        assert_eq!(
            ProjectType::from_template("lib", &none),
            ProjectType::SharedLibrary
        );
        assert_eq!(
            ProjectType::from_template("lib", &[Ustr::from("staticlib")]),
            ProjectType::StaticLibrary
        );
        assert_eq!(
            ProjectType::from_template("subdirs", &none),
            ProjectType::SubDirs
        );
        assert_eq!(
            ProjectType::from_template("vcsubdirs", &none),
            ProjectType::Invalid
        );
    }

    #[test]
    fn test_all_folders_walks_fragments() {
        let mut r = EvalResult::failed(Path::new("/p/a.pro"), String::new());
        r.own.folders.insert(PathBuf::from("/p/own"), BTreeSet::new());
        let mut frag = IncludedFileTree::new(Path::new("/p/f.pri"));
        frag.slice.folders.insert(PathBuf::from("/p/frag"), BTreeSet::new());
        let mut nested = IncludedFileTree::new(Path::new("/p/n.pri"));
        nested
            .slice
            .folders
            .insert(PathBuf::from("/p/nested"), BTreeSet::new());
        frag.children.insert(nested.path.clone(), nested);
        r.included.push(frag);

        let folders = r.all_folders();
        assert_eq!(
            folders.into_iter().collect::<Vec<_>>(),
            vec![
                PathBuf::from("/p/frag"),
                PathBuf::from("/p/nested"),
                PathBuf::from("/p/own"),
            ],
        );
    }
}
