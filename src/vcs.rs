//! Git working-tree access: state discovery, tracked-file enumeration, and
//! head polling. Non-git directories degrade to a filesystem walk so plain
//! trees can still be indexed.

use anyhow::{Context, Result};
use std::path::Path;
use tracing::debug;

/// VCS state of a working tree at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VcsState {
    pub remote_url: Option<String>,
    pub branch: Option<String>,
    pub commit: Option<String>,
}

/// Best-effort discovery; everything is `None` for non-git directories.
pub fn discover_state(root: &Path) -> VcsState {
    let repo = match git2::Repository::discover(root) {
        Ok(repo) => repo,
        Err(_) => return VcsState::default(),
    };

    let remote_url = repo
        .find_remote("origin")
        .ok()
        .and_then(|remote| remote.url().map(String::from));

    let (branch, commit) = match repo.head() {
        Ok(head) => (
            head.shorthand().map(String::from),
            head.target().map(|oid| oid.to_string()),
        ),
        Err(_) => (None, None),
    };

    VcsState {
        remote_url,
        branch,
        commit,
    }
}

/// Current HEAD commit, or `None` for non-git or unborn-branch trees.
pub fn head_commit(root: &Path) -> Option<String> {
    git2::Repository::discover(root)
        .ok()
        .and_then(|repo| repo.head().ok().and_then(|head| head.target()))
        .map(|oid| oid.to_string())
}

/// Enumerate tracked files: the HEAD tree for git repositories, a sorted
/// filesystem walk (skipping `ignored_dirs`) otherwise.
pub fn list_tracked_files(root: &Path, ignored_dirs: &[String]) -> Result<Vec<String>> {
    if let Ok(repo) = git2::Repository::open(root) {
        if let Ok(head) = repo.head() {
            let tree = head
                .peel_to_tree()
                .context("failed to resolve HEAD tree")?;
            let mut files = Vec::new();
            walk_tree(&repo, &tree, "", &mut files)?;
            files.sort();
            return Ok(files);
        }
        debug!("repository at {} has no commits yet", root.display());
    }

    let mut files = Vec::new();
    walk_directory(root, root, ignored_dirs, &mut files)?;
    files.sort();
    Ok(files)
}

fn walk_tree(
    repo: &git2::Repository,
    tree: &git2::Tree,
    prefix: &str,
    files: &mut Vec<String>,
) -> Result<()> {
    for entry in tree.iter() {
        let Some(name) = entry.name() else { continue };
        let path = if prefix.is_empty() {
            name.to_string()
        } else {
            format!("{prefix}/{name}")
        };

        match entry.kind() {
            Some(git2::ObjectType::Tree) => {
                if let Ok(subtree) = repo.find_tree(entry.id()) {
                    walk_tree(repo, &subtree, &path, files)?;
                }
            }
            Some(git2::ObjectType::Blob) => files.push(path),
            _ => {}
        }
    }
    Ok(())
}

fn walk_directory(
    root: &Path,
    dir: &Path,
    ignored_dirs: &[String],
    files: &mut Vec<String>,
) -> Result<()> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read directory {}", dir.display()))?;
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();

        if path.is_dir() {
            if ignored_dirs.iter().any(|ignored| ignored == &name) {
                continue;
            }
            walk_directory(root, &path, ignored_dirs, files)?;
        } else if path.is_file() {
            if let Ok(rel) = path.strip_prefix(root) {
                files.push(rel.to_string_lossy().replace('\\', "/"));
            }
        }
    }
    Ok(())
}
