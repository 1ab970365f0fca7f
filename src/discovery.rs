use std::collections::BTreeSet;
use std::path::Path;

use walkdir::WalkDir;

use crate::testgen::candidate::CompilationUnit;

/// Lists top-level compiled classes under `classes_dir`, sorted.
/// A missing directory means there is nothing to do, not an error.
pub fn discover_units(classes_dir: &Path) -> Vec<CompilationUnit> {
    if !classes_dir.is_dir() {
        return Vec::new();
    }

    let mut names = BTreeSet::new();

    for entry in WalkDir::new(classes_dir)
        .follow_links(true)
        .into_iter()
        .filter_map(Result::ok)
    {
        let path = entry.path();
        if !entry.file_type().is_file()
            || path.extension().and_then(|e| e.to_str()) != Some("class")
        {
            continue;
        }

        let Ok(rel) = path.strip_prefix(classes_dir) else {
            continue;
        };

        if let Some(name) = class_name(rel) {
            names.insert(name);
        }
    }

    names.into_iter().map(CompilationUnit::new).collect()
}

fn class_name(rel: &Path) -> Option<String> {
    let parts: Vec<String> = rel
        .with_extension("")
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();

    let name = parts.join(".");

    // nested/anonymous classes and package descriptors are never targets
    if name.is_empty() || name.contains('$') || name.ends_with("package-info") || name.ends_with("module-info") {
        return None;
    }

    Some(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(root: &Path, rel: &str) {
        let p = root.join(rel);
        fs::create_dir_all(p.parent().unwrap()).unwrap();
        fs::write(p, b"\xCA\xFE\xBA\xBE").unwrap();
    }

    #[test]
    fn finds_top_level_classes_sorted() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "org/example/Calculator.class");
        touch(dir.path(), "org/example/Calculator$Op.class");
        touch(dir.path(), "org/example/package-info.class");
        touch(dir.path(), "org/Alpha.class");
        touch(dir.path(), "org/example/notes.txt");
        touch(dir.path(), "Main.class");

        let names: Vec<String> = discover_units(dir.path())
            .into_iter()
            .map(|u| u.name().to_string())
            .collect();

        assert_eq!(names, vec!["Main", "org.Alpha", "org.example.Calculator"]);
    }

    #[test]
    fn missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(discover_units(&dir.path().join("target/classes")).is_empty());
    }
}
