//! Application context: the session bookkeeping a front end needs.

use std::path::{Path, PathBuf};

/// Current file, unsaved-changes flag and last-used directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppContext {
    filename: Option<PathBuf>,
    modified: bool,
    last_dir: Option<PathBuf>,
}

impl AppContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filename(&self) -> Option<&Path> {
        self.filename.as_deref()
    }

    /// Set the current file. Its directory becomes the last-used directory
    /// and the session counts as saved.
    pub fn set_filename(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            self.last_dir = Some(parent.to_path_buf());
        }
        self.filename = Some(path);
        self.modified = false;
    }

    pub fn clear_filename(&mut self) {
        self.filename = None;
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn set_modified(&mut self, modified: bool) {
        self.modified = modified;
    }

    pub fn last_dir(&self) -> Option<&Path> {
        self.last_dir.as_deref()
    }

    pub fn set_last_dir(&mut self, dir: impl Into<PathBuf>) {
        self.last_dir = Some(dir.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_filename_updates_last_dir() {
        let mut ctx = AppContext::new();
        ctx.set_modified(true);
        ctx.set_filename("/tmp/songs/live.midi");
        assert_eq!(ctx.filename(), Some(Path::new("/tmp/songs/live.midi")));
        assert_eq!(ctx.last_dir(), Some(Path::new("/tmp/songs")));
        assert!(!ctx.is_modified());
    }

    #[test]
    fn test_bare_filename_keeps_last_dir() {
        let mut ctx = AppContext::new();
        ctx.set_last_dir("/home/me");
        ctx.set_filename("set.midi");
        assert_eq!(ctx.last_dir(), Some(Path::new("/home/me")));
    }
}
