use crate::model::ModelOptions;
use crate::reader::QMakeGlobals;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug)]
pub struct Settings {
    pub build_dir: Option<PathBuf>,
    // Shadow build directory; DESTDIR and OBJECTS_DIR resolve against it.
    pub config: Vec<String>,
    // Extra CONFIG atoms active during evaluation (debug, release, ...),
    // in addition to the host platform defaults.
    pub sysroot: Option<PathBuf>,
    pub debounce_ms: u64,
    // How long to wait after a file change before re-evaluating, so that
    // editor save bursts collapse into one evaluation.
    pub root: PathBuf,
    // The root .pro file the model is opened on.
}

impl Settings {
    pub fn globals(&self) -> QMakeGlobals {
        let mut globals = QMakeGlobals::host_defaults();
        for atom in &self.config {
            globals.config.insert(ustr::Ustr::from(atom));
        }
        globals.sysroot = self.sysroot.clone();
        globals
    }

    pub fn model_options(&self) -> ModelOptions {
        ModelOptions {
            build_dir: self.build_dir.clone(),
            globals: Arc::new(self.globals()),
            debounce: Duration::from_millis(self.debounce_ms),
        }
    }
}
