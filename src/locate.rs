//! Corpus traversal with exclusion rules.
//!
//! The locator is the only component that decides which documents the
//! pipeline may touch, so the exclusion rules live here and nowhere else.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Enumerate markdown documents under `root`, relative to `root`, sorted.
///
/// Skipped outright: any path component starting with a dot (VCS and tool
/// metadata such as `.git`, `.github`, `.obsidian`, `.trash`), any path
/// under one of `excluded_prefixes`, and `README.md` files. Traversal
/// errors propagate; the caller aborts the whole run rather than acting
/// on partial results.
pub fn locate_documents(root: &Path, excluded_prefixes: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut documents = Vec::new();
    walk(root, root, excluded_prefixes, &mut documents)?;
    documents.sort();
    Ok(documents)
}

fn walk(
    root: &Path,
    dir: &Path,
    excluded_prefixes: &[PathBuf],
    documents: &mut Vec<PathBuf>,
) -> Result<()> {
    let mut entries: Vec<_> = fs::read_dir(dir)
        .with_context(|| format!("read {}", dir.display()))?
        .collect::<std::io::Result<Vec<_>>>()
        .with_context(|| format!("read {}", dir.display()))?;
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let name = entry.file_name();
        if name.to_string_lossy().starts_with('.') {
            continue;
        }
        let path = entry.path();
        let rel = path
            .strip_prefix(root)
            .with_context(|| format!("relativize {}", path.display()))?
            .to_path_buf();
        if is_excluded(&rel, excluded_prefixes) {
            continue;
        }
        let file_type = entry
            .file_type()
            .with_context(|| format!("stat {}", path.display()))?;
        if file_type.is_dir() {
            walk(root, &path, excluded_prefixes, documents)?;
        } else if file_type.is_file() && is_candidate_name(&name.to_string_lossy()) {
            documents.push(rel);
        }
    }
    Ok(())
}

fn is_excluded(rel: &Path, excluded_prefixes: &[PathBuf]) -> bool {
    excluded_prefixes.iter().any(|prefix| rel.starts_with(prefix))
}

fn is_candidate_name(name: &str) -> bool {
    if name.eq_ignore_ascii_case("readme.md") {
        return false;
    }
    let Some((_, extension)) = name.rsplit_once('.') else {
        return false;
    };
    extension.eq_ignore_ascii_case("md") || extension.eq_ignore_ascii_case("markdown")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, "content").unwrap();
    }

    #[test]
    fn finds_markdown_sorted_and_relative() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "b.md");
        touch(dir.path(), "a.md");
        touch(dir.path(), "notes/deep.markdown");
        touch(dir.path(), "notes/image.png");

        let found = locate_documents(dir.path(), &[]).unwrap();
        assert_eq!(
            found,
            vec![
                PathBuf::from("a.md"),
                PathBuf::from("b.md"),
                PathBuf::from("notes/deep.markdown"),
            ]
        );
    }

    #[test]
    fn skips_dot_folders_readme_and_excluded_prefixes() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "keep.md");
        touch(dir.path(), "README.md");
        touch(dir.path(), "notes/readme.MD");
        touch(dir.path(), ".obsidian/workspace.md");
        touch(dir.path(), ".git/config.md");
        touch(dir.path(), "ROUGH NOTES/draft.md");
        touch(dir.path(), "RESOURCES/links.md");

        let excluded = vec![PathBuf::from("ROUGH NOTES"), PathBuf::from("RESOURCES")];
        let found = locate_documents(dir.path(), &excluded).unwrap();
        assert_eq!(found, vec![PathBuf::from("keep.md")]);
    }

    #[test]
    fn exclusion_matches_whole_components_only() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "rough/c.md");
        touch(dir.path(), "roughly/d.md");

        let excluded = vec![PathBuf::from("rough")];
        let found = locate_documents(dir.path(), &excluded).unwrap();
        assert_eq!(found, vec![PathBuf::from("roughly/d.md")]);
    }

    #[test]
    fn missing_root_is_an_error() {
        let dir = TempDir::new().unwrap();
        let gone = dir.path().join("nope");
        assert!(locate_documents(&gone, &[]).is_err());
    }
}
