//! Filesystem watching for folders referenced as a whole.
//!
//! The model does not watch individual source files: a `.pro` file
//! listing a folder (or a wildcard) owns the obligation to notice files
//! appearing and disappearing under it.  The registry refcounts interest
//! per folder across nodes, so the OS watch is created on the first
//! interested node and removed with the last one.  Watch backends sit
//! behind a trait, with a manual implementation for tests.

use crate::errors::{Error, Result};
use crate::nodes::NodeId;
use crossbeam_channel::Sender;
use notify::Watcher;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub trait FolderWatcher: Send {
    fn watch(&mut self, folder: &Path) -> Result<()>;
    fn unwatch(&mut self, folder: &Path) -> Result<()>;
}

/// OS-backed watcher.  The changed paths are forwarded over a channel;
/// the model thread turns them into rescans or re-evaluations.
pub struct NotifyWatcher {
    inner: notify::RecommendedWatcher,
}

impl NotifyWatcher {
    pub fn new(events: Sender<PathBuf>) -> Result<Self> {
        let inner = notify::recommended_watcher(
            move |res: notify::Result<notify::Event>| {
                let event = match res {
                    Ok(e) => e,
                    Err(e) => {
                        tracing::warn!("watch backend error: {}", e);
                        return;
                    }
                };
                for path in event.paths {
                    let _ = events.send(path);
                }
            },
        )
        .map_err(|e| Error::Watch(e.to_string()))?;
        Ok(Self { inner })
    }
}

impl FolderWatcher for NotifyWatcher {
    fn watch(&mut self, folder: &Path) -> Result<()> {
        self.inner
            .watch(folder, notify::RecursiveMode::Recursive)
            .map_err(|e| Error::Watch(e.to_string()))
    }

    fn unwatch(&mut self, folder: &Path) -> Result<()> {
        self.inner
            .unwatch(folder)
            .map_err(|e| Error::Watch(e.to_string()))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WatchOp {
    Watch,
    Unwatch,
}

/// Records watch/unwatch calls instead of talking to the OS, for tests
/// asserting that the registry keeps the OS watch set minimal.
#[derive(Clone, Default)]
pub struct ManualWatcher {
    pub history: Arc<Mutex<Vec<(WatchOp, PathBuf)>>>,
}

impl ManualWatcher {
    pub fn watched(&self) -> BTreeSet<PathBuf> {
        let mut out = BTreeSet::new();
        for (op, path) in self.history.lock().iter() {
            match op {
                WatchOp::Watch => out.insert(path.clone()),
                WatchOp::Unwatch => out.remove(path),
            };
        }
        out
    }

    pub fn call_count(&self) -> usize {
        self.history.lock().len()
    }
}

impl FolderWatcher for ManualWatcher {
    fn watch(&mut self, folder: &Path) -> Result<()> {
        self.history.lock().push((WatchOp::Watch, folder.to_owned()));
        Ok(())
    }

    fn unwatch(&mut self, folder: &Path) -> Result<()> {
        self.history
            .lock()
            .push((WatchOp::Unwatch, folder.to_owned()));
        Ok(())
    }
}

/// Refcounted folder interest across nodes.  Reconciling a node's folder
/// set performs removals before additions, so a folder moving between
/// nodes never holds two OS watches at once.
pub struct WatchRegistry {
    watcher: Box<dyn FolderWatcher>,
    interest: HashMap<PathBuf, HashSet<NodeId>>,
    by_node: HashMap<NodeId, BTreeSet<PathBuf>>,
}

impl WatchRegistry {
    pub fn new(watcher: Box<dyn FolderWatcher>) -> Self {
        Self {
            watcher,
            interest: HashMap::new(),
            by_node: HashMap::new(),
        }
    }

    /// Bring the watches for one node in line with its latest folder set.
    pub fn reconcile(&mut self, node: NodeId, folders: &BTreeSet<PathBuf>) {
        let old = self.by_node.remove(&node).unwrap_or_default();

        for folder in old.difference(folders) {
            let empty = match self.interest.get_mut(folder) {
                Some(nodes) => {
                    nodes.remove(&node);
                    nodes.is_empty()
                }
                None => false,
            };
            if empty {
                self.interest.remove(folder);
                if let Err(e) = self.watcher.unwatch(folder) {
                    tracing::warn!("{}: {}", folder.display(), e);
                }
            }
        }
        for folder in folders.difference(&old) {
            let nodes = self.interest.entry(folder.clone()).or_default();
            if nodes.is_empty() {
                if let Err(e) = self.watcher.watch(folder) {
                    tracing::warn!("{}: {}", folder.display(), e);
                }
            }
            nodes.insert(node);
        }

        if !folders.is_empty() {
            self.by_node.insert(node, folders.clone());
        }
    }

    /// Drop every watch a removed node held.
    pub fn drop_node(&mut self, node: NodeId) {
        self.reconcile(node, &BTreeSet::new());
    }

    /// The nodes that must rescan when something under `changed` moved.
    /// Watches are recursive, so a node is interested in any change below
    /// one of its folders.
    pub fn interested(&self, changed: &Path) -> BTreeSet<NodeId> {
        let mut out = BTreeSet::new();
        for (folder, nodes) in &self.interest {
            if changed.starts_with(folder) {
                out.extend(nodes.iter().copied());
            }
        }
        out
    }

    /// The folder a node is interested in that covers `changed`, if any.
    pub fn covering_folder(
        &self,
        node: NodeId,
        changed: &Path,
    ) -> Option<&Path> {
        self.by_node
            .get(&node)?
            .iter()
            .filter(|f| changed.starts_with(f))
            .map(PathBuf::as_path)
            .max_by_key(|f| f.components().count())
    }
}
