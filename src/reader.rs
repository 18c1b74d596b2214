use crate::errors::{Error, Result};
use crate::files::File;
use crate::pro_scanner::ProScanner;
use crate::rawpro::{AssignOp, Condition, ParsedPro, Statement};
use itertools::Itertools;
use path_clean::PathClean;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use ustr::{Ustr, UstrMap};

/// Identity of one parsed project/fragment file within a reader.  The
/// root file of a pass always gets id 0; included `.pri` files get the
/// ids following, in inclusion order.
pub type ProId = usize;

/// The two evaluation passes.  Exact requires every condition to be
/// decidable; Cumulative unions the plausible branches instead, so it
/// still sees files inside scopes the exact pass gave up on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EvalMode {
    Exact,
    Cumulative,
}

/// Process-wide qmake context, built once per project open and treated as
/// immutable during a parse round.
#[derive(Clone, Debug, Default)]
pub struct QMakeGlobals {
    /// Active platform/spec config atoms (unix, linux, debug, ...)
    pub config: BTreeSet<Ustr>,
    /// Variables seeded before evaluation (command line, spec defaults)
    pub predefined: UstrMap<Vec<Ustr>>,
    pub sysroot: Option<PathBuf>,
}

impl QMakeGlobals {
    /// Globals matching the host platform.
    pub fn host_defaults() -> Self {
        let mut config = BTreeSet::new();
        if cfg!(windows) {
            config.insert(Ustr::from("win32"));
        } else {
            config.insert(Ustr::from("unix"));
            if cfg!(target_os = "macos") {
                config.insert(Ustr::from("macx"));
            } else if cfg!(target_os = "linux") {
                config.insert(Ustr::from("linux"));
            }
        }
        Self {
            config,
            predefined: UstrMap::default(),
            sysroot: None,
        }
    }
}

/// Tri-state outcome of a condition.  Undecided carries the variable the
/// decision would have needed.
enum Tri {
    True,
    False,
    Undecided(Ustr),
}

/// Evaluates parsed project blocks into variable values.
///
/// A reader accumulates state across `include()`d fragments: all of them
/// share one variable space, but every assignment remembers which file
/// made it, so callers can attribute values back to the declaring
/// `.pri`/`.pro` (see [`ProReader::absolute_file_values`]).
pub struct ProReader {
    mode: EvalMode,
    globals: Arc<QMakeGlobals>,
    /// Extra config atoms, e.g. the synthesized build pass (debug/release)
    extra_config: Vec<Ustr>,
    values: UstrMap<Vec<(Ustr, ProId)>>,
    files: Vec<PathBuf>,
    include_edges: Vec<(ProId, ProId)>,
    include_stack: Vec<PathBuf>,
    warnings: Vec<String>,
}

impl ProReader {
    pub fn new(mode: EvalMode, globals: Arc<QMakeGlobals>) -> Self {
        Self::with_extra_config(mode, globals, vec![])
    }

    /// A reader with additional active config atoms.  Used to derive the
    /// build-pass reader without rebuilding the globals.
    pub fn with_extra_config(
        mode: EvalMode,
        globals: Arc<QMakeGlobals>,
        extra_config: Vec<Ustr>,
    ) -> Self {
        Self {
            mode,
            globals,
            extra_config,
            values: UstrMap::default(),
            files: vec![],
            include_edges: vec![],
            include_stack: vec![],
            warnings: vec![],
        }
    }

    pub fn mode(&self) -> EvalMode {
        self.mode
    }

    /// Evaluate one parsed block.  In Exact mode this fails with
    /// [`Error::Undecidable`] when a condition cannot be decided; in
    /// Cumulative mode conditions never fail.
    pub fn accept(&mut self, pro: &ParsedPro) -> Result<()> {
        let root = self.register_file(&pro.path);
        for (name, vals) in self.globals.predefined.clone() {
            self.values
                .insert(name, vals.into_iter().map(|v| (v, root)).collect());
        }
        let dir = parent_dir(&pro.path);
        self.include_stack.push(pro.path.clone());
        let r = self.eval_block(&pro.statements, root, &dir);
        self.include_stack.pop();
        r
    }

    fn register_file(&mut self, path: &Path) -> ProId {
        self.files.push(path.to_owned());
        self.files.len() - 1
    }

    fn eval_block(
        &mut self,
        stmts: &[Statement],
        id: ProId,
        dir: &Path,
    ) -> Result<()> {
        for stmt in stmts {
            match stmt {
                Statement::Assignment {
                    name, op, values, ..
                } => {
                    let expanded: Vec<Ustr> = values
                        .iter()
                        .flat_map(|w| self.expand(*w, dir))
                        .collect();
                    self.apply(*name, *op, expanded, id);
                }
                Statement::Scope {
                    condition,
                    body,
                    else_body,
                } => match self.condition(condition, dir) {
                    Tri::True => self.eval_block(body, id, dir)?,
                    Tri::False => self.eval_block(else_body, id, dir)?,
                    Tri::Undecided(var) => match self.mode {
                        EvalMode::Exact => {
                            return Err(Error::WithPath {
                                path: self.files[id].clone(),
                                error: Box::new(Error::Undecidable(var)),
                            })
                        }
                        //  Union the plausible branch; the else branch is
                        //  only applied when the condition is decidably
                        //  false, so nothing is applied twice.
                        EvalMode::Cumulative => {
                            self.eval_block(body, id, dir)?
                        }
                    },
                },
                Statement::Include { path, line } => {
                    self.eval_include(*path, *line, id, dir)?;
                }
            }
        }
        Ok(())
    }

    fn eval_include(
        &mut self,
        path: Ustr,
        line: u32,
        from: ProId,
        dir: &Path,
    ) -> Result<()> {
        let expanded = self.expand(path, dir).into_iter().join(" ");
        let target = resolve_path(dir, Path::new(&expanded));
        if self.include_stack.contains(&target) {
            tracing::warn!("{}:{}: inclusion loop through {}", dir.display(), line, target.display());
            self.warnings.push(format!(
                "inclusion loop through {}, edge skipped",
                target.display()
            ));
            return Ok(());
        }
        let file = match File::new(&target) {
            Ok(f) => f,
            Err(e) => {
                //  A missing or unreadable include degrades the result
                //  but is not fatal (qmake warns and moves on).
                self.warnings.push(format!(
                    "could not read included file {}: {}",
                    target.display(),
                    e
                ));
                return Ok(());
            }
        };
        let parsed = ProScanner::parse(&file)?;
        let child = self.register_file(&target);
        self.include_edges.push((from, child));
        let child_dir = parent_dir(&target);
        self.include_stack.push(target);
        let r = self.eval_block(&parsed.statements, child, &child_dir);
        self.include_stack.pop();
        r
    }

    fn apply(&mut self, name: Ustr, op: AssignOp, values: Vec<Ustr>, id: ProId) {
        let entry = self.values.entry(name).or_default();
        match op {
            AssignOp::Replace => {
                entry.clear();
                entry.extend(values.into_iter().map(|v| (v, id)));
            }
            AssignOp::Append => {
                entry.extend(values.into_iter().map(|v| (v, id)));
            }
            AssignOp::Remove => {
                entry.retain(|(v, _)| !values.contains(v));
            }
            AssignOp::Unique => {
                for v in values {
                    if !entry.iter().any(|(e, _)| *e == v) {
                        entry.push((v, id));
                    }
                }
            }
        }
    }

    /// Expand `$$VAR`, `$${VAR}` and `$$(ENV)` in one word.  An expansion
    /// of a list variable splices into several words (whitespace split),
    /// so the result is a list.
    fn expand(&self, word: Ustr, dir: &Path) -> Vec<Ustr> {
        let s = word.as_str();
        if !s.contains("$$") {
            return vec![word];
        }
        let mut out = String::new();
        let mut rest = s;
        while let Some(pos) = rest.find("$$") {
            out.push_str(&rest[..pos]);
            rest = &rest[pos + 2..];
            if let Some(stripped) = rest.strip_prefix('(') {
                let end = stripped.find(')').unwrap_or(stripped.len());
                let name = &stripped[..end];
                if let Ok(v) = std::env::var(name) {
                    out.push_str(&v);
                }
                rest = &stripped[(end + 1).min(stripped.len())..];
            } else if let Some(stripped) = rest.strip_prefix('{') {
                let end = stripped.find('}').unwrap_or(stripped.len());
                self.push_variable(&mut out, &stripped[..end], dir);
                rest = &stripped[(end + 1).min(stripped.len())..];
            } else {
                let end = rest
                    .find(|c: char| !c.is_ascii_alphanumeric() && c != '_' && c != '.')
                    .unwrap_or(rest.len());
                self.push_variable(&mut out, &rest[..end], dir);
                rest = &rest[end..];
            }
        }
        out.push_str(rest);
        out.split_whitespace().map(Ustr::from).collect()
    }

    fn push_variable(&self, out: &mut String, name: &str, dir: &Path) {
        if name == "PWD" {
            out.push_str(&dir.display().to_string());
            return;
        }
        let vals = self.raw_values(name);
        out.push_str(&vals.iter().map(Ustr::as_str).join(" "));
    }

    fn raw_values(&self, name: &str) -> Vec<Ustr> {
        self.values
            .get(&Ustr::from(name))
            .map(|vs| vs.iter().map(|(v, _)| *v).collect())
            .unwrap_or_default()
    }

    fn config_contains(&self, atom: Ustr) -> bool {
        self.globals.config.contains(&atom)
            || self.extra_config.contains(&atom)
            || self.raw_values("CONFIG").contains(&atom)
    }

    fn condition(&self, cond: &Condition, dir: &Path) -> Tri {
        match cond {
            Condition::Atom(a) => Tri::from(self.config_contains(*a)),
            Condition::Not(inner) => match self.condition(inner, dir) {
                Tri::True => Tri::False,
                Tri::False => Tri::True,
                undecided => undecided,
            },
            Condition::And(l, r) => {
                match (self.condition(l, dir), self.condition(r, dir)) {
                    (Tri::False, _) | (_, Tri::False) => Tri::False,
                    (Tri::Undecided(v), _) | (_, Tri::Undecided(v)) => {
                        Tri::Undecided(v)
                    }
                    _ => Tri::True,
                }
            }
            Condition::Or(l, r) => {
                match (self.condition(l, dir), self.condition(r, dir)) {
                    (Tri::True, _) | (_, Tri::True) => Tri::True,
                    (Tri::Undecided(v), _) | (_, Tri::Undecided(v)) => {
                        Tri::Undecided(v)
                    }
                    _ => Tri::False,
                }
            }
            Condition::Func { name, args } => self.test_function(*name, args, dir),
        }
    }

    fn test_function(&self, name: Ustr, args: &[Ustr], dir: &Path) -> Tri {
        match name.as_str() {
            "contains" if args.len() >= 2 => {
                let var = args[0];
                if !self.values.contains_key(&var) {
                    //  An unassigned variable might have been set by a
                    //  tool not run in this context: undecidable.
                    return Tri::Undecided(var);
                }
                let needle = self.expand(args[1], dir).into_iter().join(" ");
                Tri::from(
                    self.raw_values(var.as_str())
                        .iter()
                        .any(|v| v.as_str() == needle),
                )
            }
            "equals" if args.len() >= 2 => {
                let var = args[0];
                if !self.values.contains_key(&var) {
                    return Tri::Undecided(var);
                }
                let needle = self.expand(args[1], dir).into_iter().join(" ");
                let joined =
                    self.raw_values(var.as_str()).iter().map(Ustr::as_str).join(" ");
                Tri::from(joined == needle)
            }
            "isEmpty" if !args.is_empty() => {
                Tri::from(self.raw_values(args[0].as_str()).is_empty())
            }
            "exists" if !args.is_empty() => {
                let expanded = self.expand(args[0], dir).into_iter().join(" ");
                Tri::from(self.path_exists(&resolve_path(dir, Path::new(&expanded))))
            }
            "CONFIG" if !args.is_empty() => {
                Tri::from(self.config_contains(args[0]))
            }
            _ => {
                //  Unknown or malformed test: never decidable.
                Tri::Undecided(name)
            }
        }
    }

    /// Existence check honoring the sysroot: an absolute path missing on
    /// the host is retried below the sysroot, where cross builds stage
    /// their files.
    fn path_exists(&self, path: &Path) -> bool {
        if path.exists() {
            return true;
        }
        match &self.globals.sysroot {
            Some(root) if path.is_absolute() => {
                let rel = path.strip_prefix("/").unwrap_or(path);
                root.join(rel).exists()
            }
            _ => false,
        }
    }

    // ----- queries -----

    pub fn is_defined(&self, name: &str) -> bool {
        self.values.contains_key(&Ustr::from(name))
    }

    pub fn values(&self, name: &str) -> Vec<Ustr> {
        self.raw_values(name)
    }

    /// Values of a variable resolved as paths relative to base.
    pub fn absolute_path_values(&self, name: &str, base: &Path) -> Vec<PathBuf> {
        self.raw_values(name)
            .iter()
            .map(|v| resolve_path(base, Path::new(v.as_str())))
            .collect()
    }

    /// Values of a variable resolved as file references: relative entries
    /// are tried against base first, then against each VPATH directory.
    /// Each entry keeps the identity of the file that declared it.
    pub fn absolute_file_values(
        &self,
        name: &str,
        base: &Path,
        vpaths: &[PathBuf],
    ) -> Vec<(PathBuf, ProId)> {
        let entry = match self.values.get(&Ustr::from(name)) {
            Some(e) => e,
            None => return vec![],
        };
        entry
            .iter()
            .map(|(v, id)| {
                let p = Path::new(v.as_str());
                if p.is_absolute() {
                    return (p.to_path_buf().clean(), *id);
                }
                let direct = resolve_path(base, p);
                if direct.exists() {
                    return (direct, *id);
                }
                for vpath in vpaths {
                    let candidate = resolve_path(vpath, p);
                    if candidate.exists() {
                        return (candidate, *id);
                    }
                }
                (direct, *id)
            })
            .collect()
    }

    pub fn include_edges(&self) -> &[(ProId, ProId)] {
        &self.include_edges
    }

    pub fn file_path(&self, id: ProId) -> &Path {
        &self.files[id]
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }
}

impl Tri {
    fn from(b: bool) -> Tri {
        if b {
            Tri::True
        } else {
            Tri::False
        }
    }
}

fn parent_dir(path: &Path) -> PathBuf {
    path.parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("/"))
}

/// Join and lexically normalize, without touching the filesystem.
pub fn resolve_path(base: &Path, rel: &Path) -> PathBuf {
    if rel.is_absolute() {
        rel.to_path_buf().clean()
    } else {
        base.join(rel).clean()
    }
}
