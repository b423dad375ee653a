//! Translation of native notify events into created/deleted/modified.

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use super::FsCallback;

/// How many rename trackers a translator remembers.
const TRACKER_WINDOW: usize = 64;

/// Abstract filesystem event delivered to callbacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsEvent {
    Created(PathBuf),
    Deleted(PathBuf),
    Modified(PathBuf),
}

impl FsEvent {
    pub fn path(&self) -> &Path {
        match self {
            FsEvent::Created(p) | FsEvent::Deleted(p) | FsEvent::Modified(p) => p,
        }
    }

    /// Hand the event to a callback.
    pub fn deliver(&self, callback: &dyn FsCallback) {
        match self {
            FsEvent::Created(p) => callback.on_created(p),
            FsEvent::Deleted(p) => callback.on_deleted(p),
            FsEvent::Modified(p) => callback.on_modified(p),
        }
    }
}

/// Translate one native event for a watch rooted at `root`.
///
/// A move becomes a deletion of the source followed by a creation of the
/// destination. The creation is dropped when the destination leaves `root`,
/// and for non-recursive watches when it lands deeper than `root`'s direct
/// children.
pub fn translate(event: &Event, root: &Path, recursive: bool) -> Vec<FsEvent> {
    match &event.kind {
        EventKind::Create(_) => event.paths.iter().cloned().map(FsEvent::Created).collect(),
        EventKind::Remove(_) => event.paths.iter().cloned().map(FsEvent::Deleted).collect(),
        EventKind::Modify(ModifyKind::Name(mode)) => translate_rename(*mode, &event.paths, root, recursive),
        EventKind::Modify(_) => event.paths.iter().cloned().map(FsEvent::Modified).collect(),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => Vec::new(),
    }
}

fn translate_rename(
    mode: RenameMode,
    paths: &[PathBuf],
    root: &Path,
    recursive: bool,
) -> Vec<FsEvent> {
    match (mode, paths) {
        (RenameMode::Both, [from, to, ..]) => {
            let mut events = vec![FsEvent::Deleted(from.clone())];
            if creates_within(to, root, recursive) {
                events.push(FsEvent::Created(to.clone()));
            }
            events
        }
        (RenameMode::From, _) => paths.iter().cloned().map(FsEvent::Deleted).collect(),
        (RenameMode::To, _) => paths
            .iter()
            .filter(|p| creates_within(p, root, recursive))
            .cloned()
            .map(FsEvent::Created)
            .collect(),
        // Backends that cannot pair both halves report one path; its
        // existence tells which half this is.
        _ => paths
            .iter()
            .map(|p| {
                if p.exists() {
                    FsEvent::Created(p.clone())
                } else {
                    FsEvent::Deleted(p.clone())
                }
            })
            .collect(),
    }
}

/// Stateful translation for one running watch.
///
/// Some backends (inotify) report a move three times: the `From` half, the
/// `To` half, then a `Both` event carrying the same tracker. The halves are
/// delivered as they arrive, since an unpaired half is all a move into or
/// out of the tree produces; a `Both` whose tracker was already seen on a
/// half is dropped.
#[derive(Debug)]
pub struct EventTranslator {
    root: PathBuf,
    recursive: bool,
    seen_halves: VecDeque<usize>,
}

impl EventTranslator {
    pub fn new(root: impl Into<PathBuf>, recursive: bool) -> Self {
        Self {
            root: root.into(),
            recursive,
            seen_halves: VecDeque::new(),
        }
    }

    pub fn translate(&mut self, event: &Event) -> Vec<FsEvent> {
        if let (EventKind::Modify(ModifyKind::Name(mode)), Some(tracker)) =
            (event.kind, event.tracker())
        {
            match mode {
                RenameMode::From | RenameMode::To => self.remember(tracker),
                RenameMode::Both if self.forget(tracker) => return Vec::new(),
                _ => {}
            }
        }
        translate(event, &self.root, self.recursive)
    }

    fn remember(&mut self, tracker: usize) {
        if !self.seen_halves.contains(&tracker) {
            if self.seen_halves.len() == TRACKER_WINDOW {
                self.seen_halves.pop_front();
            }
            self.seen_halves.push_back(tracker);
        }
    }

    fn forget(&mut self, tracker: usize) -> bool {
        match self.seen_halves.iter().position(|t| *t == tracker) {
            Some(index) => {
                self.seen_halves.remove(index);
                true
            }
            None => false,
        }
    }
}

fn creates_within(dest: &Path, root: &Path, recursive: bool) -> bool {
    if !dest.starts_with(root) {
        return false;
    }
    recursive || dest == root || dest.parent() == Some(root)
}
