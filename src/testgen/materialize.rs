use std::fs;
use std::io::{self, Write};
use std::path::Path;

/* ============================================================
   Public entry
   ============================================================ */

/// Writes an accepted test to its canonical location. The content lands
/// via a sibling temp file and a rename, so readers never observe a
/// half-written test and a failure leaves any previous file intact.
pub fn publish(path: &Path, content: &str) -> io::Result<()> {
    let parent = ensure_parent_dir(path)?;

    let mut staged = tempfile::Builder::new()
        .prefix(".evogen-")
        .suffix(".java.tmp")
        .tempfile_in(parent)?;

    staged.write_all(content.as_bytes())?;
    staged.as_file().sync_all()?;
    staged.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/* ============================================================
   Helpers
   ============================================================ */

fn ensure_parent_dir(path: &Path) -> io::Result<&Path> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            fs::create_dir_all(parent)?;
            Ok(parent)
        }
        _ => Ok(Path::new(".")),
    }
}

/// Reads an optional file; absence is `None`, other errors propagate.
pub fn read_optional(path: &Path) -> io::Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(s) => Ok(Some(s)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}
