//! Evaluation of a single `.pro` file into an [`EvalResult`].
//!
//! This runs two passes over the same parsed statements: an exact pass
//! that fails on the first undecidable condition, and a cumulative pass
//! that unions every plausible branch.  File references are resolved
//! against the filesystem here (existence checks, folder enumeration,
//! wildcard matching), which is why this runs on worker threads; the
//! result itself is a plain value.

use crate::evalresult::{
    EvalResult, EvalState, FileOrigin, IncludedFileTree, InstallsItem,
    ProjectType, ResultSlice, SourceFile, SubdirRef, SubdirsResolution,
    TargetInformation,
};
use crate::files::File;
use crate::pro_scanner::ProScanner;
use crate::rawpro::ParsedPro;
use crate::reader::{resolve_path, EvalMode, ProId, ProReader, QMakeGlobals};
use crate::variables::{FileType, Variable, VariableStore};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use ustr::Ustr;
use walkdir::WalkDir;

/// Cooperative cancellation flag, shared between the scheduler and the
/// worker running [`evaluate`].  Checked at phase boundaries.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Everything needed to evaluate one `.pro` file.  Self-contained so the
/// work can run on any thread.
#[derive(Clone, Debug)]
pub struct EvalInput {
    pub pro_file: PathBuf,
    /// Shadow-build directory, when distinct from the source directory.
    pub build_dir: Option<PathBuf>,
    pub globals: Arc<QMakeGlobals>,
}

pub fn evaluate(input: &EvalInput, token: &CancellationToken) -> EvalResult {
    let _span = tracing::info_span!(
        "evaluate",
        pro = %input.pro_file.display()
    )
    .entered();

    let file = match File::new(&input.pro_file) {
        Ok(f) => f,
        Err(e) => {
            return EvalResult::failed(
                &input.pro_file,
                format!("could not read {}: {}", input.pro_file.display(), e),
            )
        }
    };
    let parsed = match ProScanner::parse(&file) {
        Ok(p) => p,
        Err(e) => return EvalResult::failed(&input.pro_file, e.to_string()),
    };
    if token.is_cancelled() {
        return EvalResult::failed(&input.pro_file, "cancelled".into());
    }

    //  First cumulative probe, to find BUILDS.  A project declaring build
    //  passes gets re-evaluated with the first pass active, which is what
    //  build tools resolve CONFIG(debug, debug|release) against.
    let probe = match run_pass(EvalMode::Cumulative, input, &parsed, &[]) {
        Ok(r) => r,
        Err(e) => return EvalResult::failed(&input.pro_file, e.to_string()),
    };
    let extras = builds_extras(&probe);

    let cumulative = if extras.is_empty() {
        probe
    } else {
        match run_pass(EvalMode::Cumulative, input, &parsed, &extras) {
            Ok(r) => r,
            Err(e) => return EvalResult::failed(&input.pro_file, e.to_string()),
        }
    };
    if token.is_cancelled() {
        return EvalResult::failed(&input.pro_file, "cancelled".into());
    }

    let mut errors = vec![];
    let exact = match run_pass(EvalMode::Exact, input, &parsed, &extras) {
        Ok(r) => Some(r),
        Err(e) => {
            errors.push(e.to_string());
            None
        }
    };
    if token.is_cancelled() {
        return EvalResult::failed(&input.pro_file, "cancelled".into());
    }

    assemble(input, exact.as_ref(), &cumulative, errors)
}

fn run_pass(
    mode: EvalMode,
    input: &EvalInput,
    parsed: &ParsedPro,
    extras: &[Ustr],
) -> crate::errors::Result<ProReader> {
    let mut reader =
        ProReader::with_extra_config(mode, input.globals.clone(), extras.to_vec());
    reader.accept(parsed)?;
    Ok(reader)
}

/// Config atoms for the first declared build pass: the pass name plus
/// whatever `<name>.CONFIG` lists (typically debug or release).
fn builds_extras(reader: &ProReader) -> Vec<Ustr> {
    let builds = reader.values("BUILDS");
    let first = match builds.first() {
        Some(b) => *b,
        None => return vec![],
    };
    let mut extras = vec![first, Ustr::from("build_pass")];
    extras.extend(reader.values(&format!("{}.CONFIG", first)));
    extras
}

fn assemble(
    input: &EvalInput,
    exact: Option<&ProReader>,
    cumulative: &ProReader,
    mut errors: Vec<String>,
) -> EvalResult {
    let dir = input
        .pro_file
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("/"));
    let state = if exact.is_some() {
        EvalState::Ok
    } else {
        EvalState::Partial
    };
    let typed = exact.unwrap_or(cumulative);

    let template = typed
        .values("TEMPLATE")
        .first()
        .map(|t| t.to_string())
        .unwrap_or_else(|| "app".to_string());
    let project_type =
        ProjectType::from_template(&template, &typed.values("CONFIG"));

    //  The published store is the union both passes agree the tree works
    //  from; values the exact pass did not produce are tracked separately
    //  so reports can mark them.
    let mut store = VariableStore::default();
    let mut cumulative_only = VariableStore::default();
    for var in Variable::ALL {
        let cum = cumulative.values(var.qmake_name());
        let extra = match exact {
            Some(r) => {
                let ex = r.values(var.qmake_name());
                cum.iter().filter(|v| !ex.contains(*v)).copied().collect()
            }
            None => cum.clone(),
        };
        store.set(var, cum);
        cumulative_only.set(var, extra);
    }

    //  A successful exact pass decides every condition, so the two passes
    //  resolve the same files and everything is exact-vouched.  When the
    //  exact pass failed, all entries are cumulative only.
    let origin = if exact.is_some() {
        FileOrigin::ExactParse
    } else {
        FileOrigin::CumulativeParse
    };

    let mut warnings = cumulative.warnings().to_vec();
    let vpaths = cumulative.absolute_path_values("VPATH", &dir);
    let mut slices = vec![ResultSlice::default(); cumulative.file_count()];
    collect_files(cumulative, &dir, &vpaths, origin, &mut slices, &mut warnings);
    prune_enumerated(&mut slices);

    let exact_paths: HashSet<PathBuf> = exact
        .map(|r| (0..r.file_count()).map(|i| r.file_path(i).to_owned()).collect())
        .unwrap_or_default();
    let included = build_included(cumulative, &mut slices, &exact_paths);
    let mut own = std::mem::take(&mut slices[0]);

    let target = match exact {
        Some(r) if project_type.is_buildable() => {
            Some(target_information(r, input, &dir))
        }
        _ => None,
    };

    let installs = collect_installs(cumulative, &dir, &vpaths, origin, &mut own);
    //  VPATH directories change which files future references resolve to,
    //  so they are watched like any content folder.
    for vpath in &vpaths {
        if vpath.is_dir() {
            own.folders.entry(vpath.clone()).or_default();
        }
    }

    let mut subdirs = SubdirsResolution::default();
    if project_type == ProjectType::SubDirs {
        let (cum_refs, cum_errors) = resolve_subdirs(cumulative, &dir);
        subdirs.cumulative = cum_refs;
        subdirs.errors = cum_errors;
        if let Some(r) = exact {
            let (refs, errs) = resolve_subdirs(r, &dir);
            subdirs.exact = refs;
            for e in errs {
                if !subdirs.errors.contains(&e) {
                    subdirs.errors.push(e);
                }
            }
        }
    }

    errors.extend(subdirs.errors.iter().cloned());

    EvalResult {
        pro_file: input.pro_file.clone(),
        state,
        project_type,
        target,
        installs,
        own,
        included,
        subdirs,
        store,
        cumulative_only,
        extra_compilers: cumulative.values("QMAKE_EXTRA_COMPILERS"),
        errors,
        warnings,
    }
}

fn target_information(
    reader: &ProReader,
    input: &EvalInput,
    dir: &Path,
) -> TargetInformation {
    let out_dir = input.build_dir.as_deref().unwrap_or(dir);
    let default_target = input
        .pro_file
        .file_stem()
        .and_then(std::ffi::OsStr::to_str)
        .map(Ustr::from);
    let target = reader.values("TARGET").first().copied().or(default_target);
    let build_target = match (target, reader.values("TARGET_EXT").first()) {
        (Some(t), Some(ext)) => Some(Ustr::from(&format!("{}{}", t, ext))),
        (t, None) => t,
        (None, Some(_)) => None,
    };
    TargetInformation {
        valid: true,
        target,
        build_dir: Some(out_dir.to_path_buf()),
        dest_dir: reader
            .values("DESTDIR")
            .first()
            .map(|d| resolve_path(out_dir, Path::new(d.as_str()))),
        build_target,
    }
}

/// Resolve every file-list variable against the filesystem, attributing
/// each entry to the fragment that declared it.  An entry naming a folder
/// stands for all matching files below it; a wildcard entry for the
/// matching files in its parent directory.  Both kinds register the
/// directory so it can be watched.
fn collect_files(
    reader: &ProReader,
    dir: &Path,
    vpaths: &[PathBuf],
    origin: FileOrigin,
    slices: &mut [ResultSlice],
    warnings: &mut Vec<String>,
) {
    for kind in FileType::ALL {
        if kind == FileType::Project {
            continue;
        }
        for var in type_variables(kind, reader) {
            for (path, id) in reader.absolute_file_values(&var, dir, vpaths) {
                resolve_entry(kind, &var, path, id, origin, slices, warnings);
            }
        }
    }
}

/// The variables declaring files of one type: the builtin list, plus the
/// input variables of any declared extra compiler (those consume sources).
fn type_variables(kind: FileType, reader: &ProReader) -> Vec<String> {
    let mut vars: Vec<String> =
        kind.variables().iter().map(|v| v.to_string()).collect();
    if kind == FileType::Source {
        for compiler in reader.values("QMAKE_EXTRA_COMPILERS") {
            for input in reader.values(&format!("{}.input", compiler)) {
                vars.push(input.to_string());
            }
        }
    }
    vars
}

fn resolve_entry(
    kind: FileType,
    var: &str,
    path: PathBuf,
    id: ProId,
    origin: FileOrigin,
    slices: &mut [ResultSlice],
    warnings: &mut Vec<String>,
) {
    let name = path
        .file_name()
        .and_then(std::ffi::OsStr::to_str)
        .unwrap_or("");
    if name.contains('*') || name.contains('?') {
        let parent = match path.parent() {
            Some(p) => p.to_path_buf(),
            None => return,
        };
        let pattern = name.to_string();
        slices[id]
            .folders
            .entry(parent.clone())
            .or_default()
            .insert(kind);
        let matches = slices[id].recursive_files.entry(kind).or_default();
        if let Ok(entries) = std::fs::read_dir(&parent) {
            for entry in entries.flatten() {
                let fname = entry.file_name();
                let fname = fname.to_string_lossy();
                if is_transient(&fname) || !wildcard_match(&pattern, &fname) {
                    continue;
                }
                let p = entry.path();
                if p.is_file() && kind.keeps(&p) {
                    matches.insert(p);
                }
            }
        }
    } else if path.is_dir() {
        slices[id]
            .folders
            .entry(path.clone())
            .or_default()
            .insert(kind);
        let matches = slices[id].recursive_files.entry(kind).or_default();
        matches.extend(enumerate_folder(&path, kind));
    } else if path.is_file() {
        slices[id].push(kind, SourceFile { path, origin });
    } else {
        warnings.push(format!(
            "{}: referenced file not found: {}",
            var,
            path.display()
        ));
    }
}

/// All files of one type below a folder.  Symlinks are not followed and
/// editor droppings are ignored.
pub fn enumerate_folder(
    folder: &Path,
    kind: FileType,
) -> impl Iterator<Item = PathBuf> + '_ {
    WalkDir::new(folder)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| !is_transient(&e.file_name().to_string_lossy()))
        .flatten()
        .filter(move |e| {
            e.file_type().is_file() && kind.keeps(e.path())
        })
        .map(|e| e.into_path())
}

fn is_transient(name: &str) -> bool {
    name.starts_with('.') || name.ends_with('~') || name.starts_with('#')
}

/// Drop enumerated entries that a file-list variable also names
/// explicitly, so a file under a referenced folder is counted once.
fn prune_enumerated(slices: &mut [ResultSlice]) {
    let mut explicit: std::collections::HashMap<FileType, HashSet<PathBuf>> =
        std::collections::HashMap::new();
    for slice in slices.iter() {
        for (kind, files) in &slice.files {
            explicit
                .entry(*kind)
                .or_default()
                .extend(files.iter().map(|f| f.path.clone()));
        }
    }
    for slice in slices.iter_mut() {
        for (kind, set) in slice.recursive_files.iter_mut() {
            if let Some(listed) = explicit.get(kind) {
                set.retain(|p| !listed.contains(p));
            }
        }
        slice.recursive_files.retain(|_, set| !set.is_empty());
    }
}

/// Glob match supporting `*` and `?`, over file names only.
fn wildcard_match(pattern: &str, name: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let n: Vec<char> = name.chars().collect();
    //  dp[j]: pattern[..i] matches name[..j]
    let mut dp = vec![false; n.len() + 1];
    dp[0] = true;
    for &pc in &p {
        if pc == '*' {
            for j in 1..=n.len() {
                dp[j] = dp[j] || dp[j - 1];
            }
        } else {
            for j in (1..=n.len()).rev() {
                dp[j] = dp[j - 1] && (pc == '?' || pc == n[j - 1]);
            }
            dp[0] = false;
        }
    }
    dp[n.len()]
}

/// Rebuild the include() nesting recorded by the reader as a tree, moving
/// each fragment's accumulated slice into its node.
fn build_included(
    reader: &ProReader,
    slices: &mut [ResultSlice],
    exact_paths: &HashSet<PathBuf>,
) -> Vec<IncludedFileTree> {
    let mut children: Vec<Vec<ProId>> = vec![vec![]; reader.file_count()];
    for (from, to) in reader.include_edges() {
        children[*from].push(*to);
    }
    fn build(
        id: ProId,
        reader: &ProReader,
        children: &[Vec<ProId>],
        slices: &mut [ResultSlice],
        exact_paths: &HashSet<PathBuf>,
    ) -> IncludedFileTree {
        let path = reader.file_path(id).to_owned();
        let mut tree = IncludedFileTree::new(&path);
        tree.in_exact = exact_paths.contains(&path);
        tree.slice = std::mem::take(&mut slices[id]);
        for child in &children[id] {
            let sub = build(*child, reader, children, slices, exact_paths);
            tree.children.insert(sub.path.clone(), sub);
        }
        tree
    }
    children[0]
        .clone()
        .into_iter()
        .map(|id| build(id, reader, &children, slices, exact_paths))
        .collect()
}

/// Resolve INSTALLS items.  A `files` entry naming a directory installs
/// its content: the directory joins the watch folders and its files are
/// enumerated like any folder reference.
fn collect_installs(
    reader: &ProReader,
    dir: &Path,
    vpaths: &[PathBuf],
    origin: FileOrigin,
    own: &mut ResultSlice,
) -> Vec<InstallsItem> {
    reader
        .values("INSTALLS")
        .into_iter()
        .map(|name| {
            let path = reader
                .values(&format!("{}.path", name))
                .first()
                .map(|p| resolve_path(dir, Path::new(p.as_str())));
            let mut files = vec![];
            for (p, _) in
                reader.absolute_file_values(&format!("{}.files", name), dir, vpaths)
            {
                if p.is_dir() {
                    own.folders.entry(p.clone()).or_default();
                    files.extend(
                        enumerate_folder(&p, FileType::Other)
                            .map(|path| SourceFile { path, origin }),
                    );
                } else {
                    files.push(SourceFile { path: p, origin });
                }
            }
            let active = !reader
                .values(&format!("{}.CONFIG", name))
                .iter()
                .any(|c| c.as_str() == "no_default_install");
            InstallsItem {
                name,
                path,
                files,
                active,
            }
        })
        .collect()
}

/// Resolve SUBDIRS entries to `.pro` files.  An entry may be a directory
/// (implying `<dir>/<basename>.pro`), a `.pro` path, or an alias refined
/// by `<alias>.file` / `<alias>.subdir`.
fn resolve_subdirs(
    reader: &ProReader,
    dir: &Path,
) -> (Vec<SubdirRef>, Vec<String>) {
    let mut refs = vec![];
    let mut errors = vec![];
    for entry in reader.values("SUBDIRS") {
        let explicit_file =
            reader.values(&format!("{}.file", entry)).first().copied();
        let explicit_subdir =
            reader.values(&format!("{}.subdir", entry)).first().copied();
        let target = if let Some(f) = explicit_file {
            resolve_path(dir, Path::new(f.as_str()))
        } else if let Some(sd) = explicit_subdir {
            resolve_path(dir, Path::new(sd.as_str()))
        } else {
            resolve_path(dir, Path::new(entry.as_str()))
        };

        let pro_file = if target.is_dir() {
            let base = target
                .file_name()
                .and_then(std::ffi::OsStr::to_str)
                .unwrap_or("");
            let candidate = target.join(format!("{}.pro", base));
            candidate.is_file().then_some(candidate)
        } else {
            (target.extension().and_then(std::ffi::OsStr::to_str)
                == Some("pro")
                && target.is_file())
            .then_some(target)
        };

        match pro_file {
            Some(pro_file) => {
                let no_deploy = reader
                    .values(&format!("{}.CONFIG", entry))
                    .iter()
                    .any(|c| c.as_str() == "no_default_target");
                refs.push(SubdirRef {
                    entry,
                    pro_file,
                    no_deploy,
                });
            }
            None => errors.push(format!(
                "could not find .pro file for subdirectory {}",
                entry
            )),
        }
    }
    (refs, errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Result;
    use std::fs;
    use std::io::Write;

    fn write(path: &Path, text: &str) -> Result<()> {
        if let Some(p) = path.parent() {
            fs::create_dir_all(p)?;
        }
        let mut f = fs::File::create(path)?;
        f.write_all(text.as_bytes())?;
        Ok(())
    }

    fn input(pro: &Path) -> EvalInput {
        let mut globals = QMakeGlobals::host_defaults();
        globals.config.insert(Ustr::from("unix"));
        EvalInput {
            pro_file: pro.to_owned(),
            build_dir: None,
            globals: Arc::new(globals),
        }
    }

    fn run(pro: &Path) -> EvalResult {
        evaluate(&input(pro), &CancellationToken::new())
    }

    #[test]
    fn test_simple_application() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let root = dir.path();
        write(&root.join("main.cpp"), "int main() {}\n")?;
        write(&root.join("util.cpp"), "\n")?;
        let pro = root.join("tool.pro");
        write(
            &pro,
            "TEMPLATE = app\nSOURCES += main.cpp util.cpp\nHEADERS += missing.h\n",
        )?;

        let r = run(&pro);
        assert_eq!(r.state, EvalState::Ok);
        assert_eq!(r.project_type, ProjectType::Application);
        let sources = &r.own.files[&FileType::Source];
        assert_eq!(
            sources.iter().map(|f| f.path.clone()).collect::<Vec<_>>(),
            vec![root.join("main.cpp"), root.join("util.cpp")],
        );
        assert!(sources.iter().all(|f| f.origin == FileOrigin::ExactParse));
        //  missing.h referenced but absent: dropped with a warning
        assert!(!r.own.files.contains_key(&FileType::Header));
        assert!(r.warnings.iter().any(|w| w.contains("missing.h")));
        //  default TARGET is the project file stem
        assert_eq!(
            r.target.as_ref().and_then(|t| t.target),
            Some(Ustr::from("tool"))
        );
        //  both passes agreed on everything
        assert!(r.cumulative_only.is_empty());
        Ok(())
    }

    #[test]
    fn test_folder_reference_enumerates() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let root = dir.path();
        write(&root.join("src/x.cpp"), "\n")?;
        write(&root.join("src/deep/y.cpp"), "\n")?;
        write(&root.join("src/notes.txt"), "\n")?;
        write(&root.join("src/.hidden.cpp"), "\n")?;
        let pro = root.join("p.pro");
        write(&pro, "SOURCES += src\n")?;

        let r = run(&pro);
        assert_eq!(r.state, EvalState::Ok);
        assert!(r.own.folders.contains_key(&root.join("src")));
        assert_eq!(
            r.own.recursive_files[&FileType::Source],
            [root.join("src/deep/y.cpp"), root.join("src/x.cpp")]
                .into_iter()
                .collect(),
        );
        Ok(())
    }

    #[test]
    fn test_wildcard_reference() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let root = dir.path();
        write(&root.join("src/a.cpp"), "\n")?;
        write(&root.join("src/b.cpp"), "\n")?;
        write(&root.join("src/deep/c.cpp"), "\n")?;
        write(&root.join("src/a.h"), "\n")?;
        let pro = root.join("p.pro");
        write(&pro, "SOURCES += src/*.cpp\n")?;

        let r = run(&pro);
        //  wildcards match one directory level, and the directory is
        //  registered for watching
        assert!(r.own.folders.contains_key(&root.join("src")));
        assert_eq!(
            r.own.recursive_files[&FileType::Source],
            [root.join("src/a.cpp"), root.join("src/b.cpp")]
                .into_iter()
                .collect(),
        );
        Ok(())
    }

    #[test]
    fn test_explicit_file_not_double_counted() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let root = dir.path();
        write(&root.join("src/x.cpp"), "\n")?;
        write(&root.join("src/y.cpp"), "\n")?;
        let pro = root.join("p.pro");
        write(&pro, "SOURCES += src src/x.cpp\n")?;

        let r = run(&pro);
        //  x.cpp is listed explicitly and also sits under the referenced
        //  folder; it must only appear in the explicit set
        assert_eq!(
            r.own.files[&FileType::Source]
                .iter()
                .map(|f| f.path.clone())
                .collect::<Vec<_>>(),
            vec![root.join("src/x.cpp")],
        );
        assert_eq!(
            r.own.recursive_files[&FileType::Source],
            [root.join("src/y.cpp")].into_iter().collect(),
        );
        Ok(())
    }

    #[test]
    fn test_install_and_vpath_folders_watched() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let root = dir.path();
        write(&root.join("extra/alt.cpp"), "\n")?;
        write(&root.join("assets/logo.png"), "\n")?;
        let pro = root.join("p.pro");
        write(
            &pro,
            "VPATH = extra\n\
             data.path = /usr/share/tool\n\
             data.files = assets\n\
             INSTALLS += data\n",
        )?;

        let r = run(&pro);
        //  a directory named by an install rule installs its content
        assert_eq!(
            r.installs[0]
                .files
                .iter()
                .map(|f| f.path.clone())
                .collect::<Vec<_>>(),
            vec![root.join("assets/logo.png")],
        );
        //  both the install source folder and the VPATH directory are
        //  registered for watching
        assert!(r.own.folders.contains_key(&root.join("assets")));
        assert!(r.own.folders.contains_key(&root.join("extra")));
        Ok(())
    }

    #[test]
    fn test_partial_on_undecidable() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let root = dir.path();
        write(&root.join("a.cpp"), "\n")?;
        write(&root.join("d.cpp"), "\n")?;
        let pro = root.join("p.pro");
        write(
            &pro,
            "SOURCES = a.cpp\ncontains(EXTERNAL_TOOL_VAR, yes):SOURCES += d.cpp\n",
        )?;

        let r = run(&pro);
        assert_eq!(r.state, EvalState::Partial);
        assert!(!r.errors.is_empty());
        //  cumulative still saw both files, marked as such
        let sources = &r.own.files[&FileType::Source];
        assert_eq!(
            sources.iter().map(|f| f.path.clone()).collect::<Vec<_>>(),
            vec![root.join("a.cpp"), root.join("d.cpp")],
        );
        assert!(sources
            .iter()
            .all(|f| f.origin == FileOrigin::CumulativeParse));
        //  but no target information without an exact pass
        assert!(r.target.is_none());
        //  every published value is cumulative-vouched only
        assert_eq!(
            r.cumulative_only.get(Variable::Source),
            r.store.get(Variable::Source)
        );
        Ok(())
    }

    #[test]
    fn test_parse_failure() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let pro = dir.path().join("broken.pro");
        write(&pro, "win32 {\nSOURCES += a.cpp\n")?;

        let r = run(&pro);
        assert_eq!(r.state, EvalState::Fail);
        assert_eq!(r.project_type, ProjectType::Invalid);
        assert!(!r.errors.is_empty());
        Ok(())
    }

    #[test]
    fn test_included_fragment_attribution() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let root = dir.path();
        write(&root.join("main.cpp"), "\n")?;
        write(&root.join("extra.cpp"), "\n")?;
        write(&root.join("deep.cpp"), "\n")?;
        write(
            &root.join("common.pri"),
            "SOURCES += extra.cpp\ninclude(deep.pri)\n",
        )?;
        write(&root.join("deep.pri"), "SOURCES += deep.cpp\n")?;
        let pro = root.join("p.pro");
        write(&pro, "SOURCES += main.cpp\ninclude(common.pri)\n")?;

        let r = run(&pro);
        assert_eq!(r.state, EvalState::Ok);
        assert_eq!(
            r.own.files[&FileType::Source][0].path,
            root.join("main.cpp")
        );
        assert_eq!(r.included.len(), 1);
        let common = &r.included[0];
        assert_eq!(common.path, root.join("common.pri"));
        assert!(common.in_exact);
        assert_eq!(
            common.slice.files[&FileType::Source][0].path,
            root.join("extra.cpp")
        );
        let deep = &common.children[&root.join("deep.pri")];
        assert_eq!(
            deep.slice.files[&FileType::Source][0].path,
            root.join("deep.cpp")
        );
        Ok(())
    }

    #[test]
    fn test_fragment_only_in_cumulative() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let root = dir.path();
        write(&root.join("opt.pri"), "SOURCES += opt.cpp\n")?;
        write(&root.join("opt.cpp"), "\n")?;
        let pro = root.join("p.pro");
        write(
            &pro,
            "contains(MAYBE_SET_ELSEWHERE, yes):include(opt.pri)\n",
        )?;

        let r = run(&pro);
        assert_eq!(r.state, EvalState::Partial);
        assert_eq!(r.included.len(), 1);
        assert!(!r.included[0].in_exact);
        Ok(())
    }

    #[test]
    fn test_subdirs_resolution() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let root = dir.path();
        write(&root.join("app/app.pro"), "TEMPLATE = app\n")?;
        write(&root.join("libfoo/libfoo.pro"), "TEMPLATE = lib\n")?;
        let pro = root.join("root.pro");
        write(
            &pro,
            "TEMPLATE = subdirs\n\
             SUBDIRS = app mylib missing\n\
             mylib.subdir = libfoo\n\
             mylib.CONFIG = no_default_target\n",
        )?;

        let r = run(&pro);
        assert_eq!(r.state, EvalState::Ok);
        assert_eq!(r.project_type, ProjectType::SubDirs);
        assert_eq!(r.subdirs.exact.len(), 2);
        assert_eq!(r.subdirs.exact[0].pro_file, root.join("app/app.pro"));
        assert!(!r.subdirs.exact[0].no_deploy);
        assert_eq!(
            r.subdirs.exact[1].pro_file,
            root.join("libfoo/libfoo.pro")
        );
        assert!(r.subdirs.exact[1].no_deploy);
        assert_eq!(
            r.subdirs.errors,
            vec!["could not find .pro file for subdirectory missing".to_string()],
        );
        Ok(())
    }

    #[test]
    fn test_installs() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let root = dir.path();
        write(&root.join("conf/a.conf"), "\n")?;
        let pro = root.join("p.pro");
        write(
            &pro,
            "target.path = /usr/bin\n\
             conf.path = /etc/tool\n\
             conf.files = conf/a.conf\n\
             conf.CONFIG = no_default_install\n\
             INSTALLS += target conf\n",
        )?;

        let r = run(&pro);
        assert_eq!(r.installs.len(), 2);
        assert_eq!(r.installs[0].name, Ustr::from("target"));
        assert_eq!(r.installs[0].path, Some(PathBuf::from("/usr/bin")));
        assert!(r.installs[0].active);
        assert_eq!(
            r.installs[1]
                .files
                .iter()
                .map(|f| f.path.clone())
                .collect::<Vec<_>>(),
            vec![root.join("conf/a.conf")],
        );
        assert!(!r.installs[1].active);
        Ok(())
    }

    #[test]
    fn test_builds_first_pass() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let pro = dir.path().join("p.pro");
        write(
            &pro,
            "BUILDS = dbg rel\n\
             dbg.CONFIG = debug\n\
             rel.CONFIG = release\n\
             CONFIG(debug, debug|release):TARGET = toold\n\
             CONFIG(release, debug|release):TARGET = tool\n",
        )?;

        let r = run(&pro);
        //  the first declared build pass is the one resolved against
        assert_eq!(r.state, EvalState::Ok);
        assert_eq!(
            r.target.as_ref().and_then(|t| t.target),
            Some(Ustr::from("toold"))
        );
        Ok(())
    }

    #[test]
    fn test_extra_compiler_inputs_collected() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let root = dir.path();
        write(&root.join("gen.cpp"), "\n")?;
        let pro = root.join("p.pro");
        write(
            &pro,
            "QMAKE_EXTRA_COMPILERS += mygen\n\
             mygen.input = GEN_SOURCES\n\
             GEN_SOURCES = gen.cpp\n",
        )?;

        let r = run(&pro);
        assert_eq!(r.extra_compilers, vec![Ustr::from("mygen")]);
        assert_eq!(
            r.own.files[&FileType::Source][0].path,
            root.join("gen.cpp")
        );
        Ok(())
    }

    #[test]
    fn test_cancellation() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let pro = dir.path().join("p.pro");
        write(&pro, "SOURCES += a.cpp\n")?;
        let token = CancellationToken::new();
        token.cancel();
        let r = evaluate(&input(&pro), &token);
        assert_eq!(r.state, EvalState::Fail);
        Ok(())
    }

    #[test]
    fn test_wildcard_match() {
        assert!(wildcard_match("*.cpp", "main.cpp"));
        assert!(!wildcard_match("*.cpp", "main.h"));
        assert!(wildcard_match("a?.cpp", "ab.cpp"));
        assert!(!wildcard_match("a?.cpp", "abc.cpp"));
        assert!(wildcard_match("*", "anything"));
        assert!(wildcard_match("a*b*c", "aXbYc"));
        assert!(!wildcard_match("a*b*c", "aXcYb"));
    }
}
