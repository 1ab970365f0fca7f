use std::collections::HashSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Ordered classpath entries, unique by absolute path. Append-only.
#[derive(Debug, Clone, Default)]
pub struct ClasspathSet {
    entries: Vec<PathBuf>,
    seen: HashSet<PathBuf>,
}

impl ClasspathSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when the entry was already present.
    pub fn push(&mut self, entry: impl AsRef<Path>) -> bool {
        let abs = absolute(entry.as_ref());
        if !self.seen.insert(abs.clone()) {
            return false;
        }
        self.entries.push(abs);
        true
    }

    pub fn extend<I, P>(&mut self, entries: I)
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        for e in entries {
            self.push(e);
        }
    }

    pub fn entries(&self) -> &[PathBuf] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of archive entries (directories excluded).
    pub fn archive_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("jar"))
            .count()
    }

    /// Platform-separated form accepted by `-cp`.
    pub fn to_arg(&self) -> OsString {
        std::env::join_paths(&self.entries).unwrap_or_else(|_| {
            // an entry contained the separator; fall back to a lossy join
            let sep = if cfg!(windows) { ";" } else { ":" };
            self.entries
                .iter()
                .map(|p| p.to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join(sep)
                .into()
        })
    }
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_insertion_order_and_dedups() {
        let mut cp = ClasspathSet::new();
        assert!(cp.push("/a/classes"));
        assert!(cp.push("/b/x.jar"));
        assert!(!cp.push("/a/classes"));
        assert!(cp.push("/c/y.jar"));

        assert_eq!(
            cp.entries(),
            &[
                PathBuf::from("/a/classes"),
                PathBuf::from("/b/x.jar"),
                PathBuf::from("/c/y.jar")
            ]
        );
        assert_eq!(cp.archive_count(), 2);
    }

    #[test]
    fn relative_entries_become_absolute() {
        let mut cp = ClasspathSet::new();
        cp.push("lib/z.jar");
        assert!(cp.entries()[0].is_absolute());
        assert!(!cp.push(std::env::current_dir().unwrap().join("lib/z.jar")));
    }

    #[cfg(unix)]
    #[test]
    fn arg_uses_platform_separator() {
        let mut cp = ClasspathSet::new();
        cp.extend(["/a", "/b.jar"]);
        assert_eq!(cp.to_arg(), OsString::from("/a:/b.jar"));
    }
}
