use std::collections::BTreeMap;
use std::path::Path;
use ustr::Ustr;

/// The closed set of qmake variables downstream consumers query.
/// Everything else a project file assigns still takes part in evaluation
/// (expansion, conditions), it is just not part of the published store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Variable {
    Defines,
    IncludePath,
    Config,
    Qt,
    TargetExt,
    Makefile,
    ObjectsDir,
    InstallRoot,
    Source,
    Header,
    Form,
    Resource,
    StateChart,
    Qml,
    OtherFile,
    SubDirs,
    Vpath,
    Installs,
    Target,
    DestDir,
    Template,
}

impl Variable {
    pub const ALL: [Variable; 21] = [
        Variable::Defines,
        Variable::IncludePath,
        Variable::Config,
        Variable::Qt,
        Variable::TargetExt,
        Variable::Makefile,
        Variable::ObjectsDir,
        Variable::InstallRoot,
        Variable::Source,
        Variable::Header,
        Variable::Form,
        Variable::Resource,
        Variable::StateChart,
        Variable::Qml,
        Variable::OtherFile,
        Variable::SubDirs,
        Variable::Vpath,
        Variable::Installs,
        Variable::Target,
        Variable::DestDir,
        Variable::Template,
    ];

    /// The name under which the variable appears in project files.
    pub fn qmake_name(self) -> &'static str {
        match self {
            Variable::Defines => "DEFINES",
            Variable::IncludePath => "INCLUDEPATH",
            Variable::Config => "CONFIG",
            Variable::Qt => "QT",
            Variable::TargetExt => "TARGET_EXT",
            Variable::Makefile => "MAKEFILE",
            Variable::ObjectsDir => "OBJECTS_DIR",
            Variable::InstallRoot => "INSTALL_ROOT",
            Variable::Source => "SOURCES",
            Variable::Header => "HEADERS",
            Variable::Form => "FORMS",
            Variable::Resource => "RESOURCES",
            Variable::StateChart => "STATECHARTS",
            Variable::Qml => "QML_FILES",
            Variable::OtherFile => "OTHER_FILES",
            Variable::SubDirs => "SUBDIRS",
            Variable::Vpath => "VPATH",
            Variable::Installs => "INSTALLS",
            Variable::Target => "TARGET",
            Variable::DestDir => "DESTDIR",
            Variable::Template => "TEMPLATE",
        }
    }

    pub fn from_name(name: Ustr) -> Option<Variable> {
        NAME_TO_VARIABLE.get(&name).copied()
    }
}

lazy_static::lazy_static! {
    static ref NAME_TO_VARIABLE: ustr::UstrMap<Variable> = {
        let mut m = ustr::UstrMap::default();
        for v in Variable::ALL {
            m.insert(Ustr::from(v.qmake_name()), v);
        }
        m
    };
}

/// The published result of evaluating one project file: ordered string
/// lists, keyed by the closed enumeration above.  BTreeMap so two stores
/// built from identical inputs compare (and print) identically.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VariableStore(BTreeMap<Variable, Vec<Ustr>>);

impl VariableStore {
    pub fn set(&mut self, var: Variable, values: Vec<Ustr>) {
        if values.is_empty() {
            self.0.remove(&var);
        } else {
            self.0.insert(var, values);
        }
    }

    pub fn get(&self, var: Variable) -> &[Ustr] {
        self.0.get(&var).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, var: Variable, value: &str) -> bool {
        self.get(var).iter().any(|v| v.as_str() == value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Variable, &Vec<Ustr>)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Classification of the files a project contributes, and the mapping
/// from file types to the qmake variables that declare them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FileType {
    Header,
    Source,
    Form,
    Resource,
    StateChart,
    Project,
    Qml,
    Other,
}

impl FileType {
    pub const ALL: [FileType; 8] = [
        FileType::Header,
        FileType::Source,
        FileType::Form,
        FileType::Resource,
        FileType::StateChart,
        FileType::Project,
        FileType::Qml,
        FileType::Other,
    ];

    /// The qmake variables whose values are files of this type.
    pub fn variables(self) -> &'static [&'static str] {
        match self {
            FileType::Header => &["HEADERS", "PRECOMPILED_HEADER"],
            FileType::Source => &["SOURCES", "OBJECTIVE_SOURCES", "LEXSOURCES", "YACCSOURCES"],
            FileType::Form => &["FORMS"],
            FileType::Resource => &["RESOURCES"],
            FileType::StateChart => &["STATECHARTS"],
            FileType::Project => &["SUBDIRS"],
            FileType::Qml => &["QML_FILES"],
            FileType::Other => &["OTHER_FILES", "DISTFILES"],
        }
    }

    /// Whether a file found by recursive folder enumeration belongs to
    /// this type.  Used to filter wildcard matches and watch deltas.
    pub fn keeps(self, path: &Path) -> bool {
        let ext = path
            .extension()
            .and_then(std::ffi::OsStr::to_str)
            .unwrap_or("");
        match self {
            FileType::Header => matches!(ext, "h" | "hh" | "hpp" | "hxx"),
            FileType::Source => matches!(ext, "c" | "cc" | "cpp" | "cxx" | "m" | "mm"),
            FileType::Form => ext == "ui",
            FileType::Resource => ext == "qrc",
            FileType::StateChart => ext == "scxml",
            FileType::Project => matches!(ext, "pro" | "pri"),
            FileType::Qml => ext == "qml",
            FileType::Other => true,
        }
    }
}

impl std::fmt::Display for FileType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}
