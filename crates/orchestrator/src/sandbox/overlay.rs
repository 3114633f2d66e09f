//! Union view over an upper and an optional lower directory.
//!
//! Reads check upper, then lower. Writes always land in upper. Listings and
//! searches merge both layers and upper wins on name collisions. With no lower
//! layer the view is a plain directory, which is how host execution works.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Component, Path, PathBuf};

use regex::Regex;
use sha2::{Digest, Sha256};
use tracing::debug;
use walkdir::WalkDir;

use super::edit::apply_edit;
use super::{CONTAINER_WORKDIR, MAX_GREP_MATCHES, MAX_LIST_ENTRIES, Result, SandboxError};

/// Union of a writable upper directory and a read-only lower directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayeredView {
    upper: PathBuf,
    lower: Option<PathBuf>,
}

impl LayeredView {
    /// Two-layer view.
    pub const fn layered(upper: PathBuf, lower: PathBuf) -> Self {
        Self {
            upper,
            lower: Some(lower),
        }
    }

    /// A single writable directory.
    pub const fn single(dir: PathBuf) -> Self {
        Self {
            upper: dir,
            lower: None,
        }
    }

    /// The writable layer.
    pub fn upper(&self) -> &Path {
        &self.upper
    }

    /// Read a file through the union.
    pub async fn read(&self, path: &str) -> Result<String> {
        let view = self.clone();
        let rel = file_path(path)?;
        blocking(move || view.read_sync(&rel)).await
    }

    /// Write a file into the upper layer.
    pub async fn write(&self, path: &str, content: String) -> Result<()> {
        let view = self.clone();
        let rel = file_path(path)?;
        blocking(move || view.write_sync(&rel, content.as_bytes())).await
    }

    /// Replace the unique `anchor` in a file.
    pub async fn edit(&self, path: &str, anchor: String, replacement: String) -> Result<()> {
        let view = self.clone();
        let rel = file_path(path)?;
        let display = path.to_string();
        blocking(move || {
            let content = view.read_sync(&rel)?;
            let edited = apply_edit(&content, &anchor, &replacement)
                .map_err(|e| SandboxError::edit(display, e))?;
            view.write_sync(&rel, edited.as_bytes())
        })
        .await
    }

    /// Files under `dir` in both layers, sorted.
    pub async fn list(&self, dir: &str) -> Result<Vec<String>> {
        let view = self.clone();
        let rel = dir_path(dir)?;
        blocking(move || {
            Ok(view
                .files_sync(&rel)
                .into_iter()
                .take(MAX_LIST_ENTRIES)
                .collect())
        })
        .await
    }

    /// Lines matching `pattern` under `dir`, as `path:line:text`.
    pub async fn grep(&self, pattern: &str, dir: &str) -> Result<Vec<String>> {
        let regex = Regex::new(pattern).map_err(|e| SandboxError::InvalidPattern(e.to_string()))?;
        let view = self.clone();
        let rel = dir_path(dir)?;
        blocking(move || Ok(view.grep_sync(&regex, &rel))).await
    }

    /// Files written to the upper layer.
    pub async fn changed_files(&self) -> Result<Vec<String>> {
        let upper = self.upper.clone();
        blocking(move || {
            let files: BTreeSet<String> = walk_files(&upper, &upper).into_iter().collect();
            Ok(files.into_iter().collect())
        })
        .await
    }

    /// Copy the union into `target`, replacing whatever was there.
    ///
    /// The returned baseline is what [`absorb`](Self::absorb) diffs against.
    pub async fn materialize(&self, target: PathBuf) -> Result<Baseline> {
        let view = self.clone();
        blocking(move || view.materialize_sync(&target)).await
    }

    /// Apply what changed in `from` since `baseline` to the upper layer.
    ///
    /// Files the command did not touch are left alone, so writes made to the
    /// view in the meantime survive. A deleted file is removed from upper
    /// unless someone else rewrote it after the copy was made.
    pub async fn absorb(&self, from: PathBuf, baseline: Baseline) -> Result<Absorbed> {
        let view = self.clone();
        blocking(move || view.absorb_sync(&from, &baseline)).await
    }

    fn layers(&self) -> impl Iterator<Item = &Path> {
        std::iter::once(self.upper.as_path()).chain(self.lower.as_deref())
    }

    fn read_bytes(&self, rel: &Path) -> Option<Vec<u8>> {
        self.layers()
            .map(|layer| layer.join(rel))
            .find(|p| p.is_file())
            .and_then(|p| fs::read(p).ok())
    }

    fn read_sync(&self, rel: &Path) -> Result<String> {
        let bytes = self
            .read_bytes(rel)
            .ok_or_else(|| SandboxError::FileNotFound(rel.display().to_string()))?;
        String::from_utf8(bytes)
            .map_err(|_| SandboxError::Io(format!("{} is not valid UTF-8", rel.display())))
    }

    fn write_sync(&self, rel: &Path, content: &[u8]) -> Result<()> {
        let target = self.upper.join(rel);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&target, content)?;
        Ok(())
    }

    fn files_sync(&self, rel_dir: &Path) -> BTreeSet<String> {
        self.layers()
            .flat_map(|layer| walk_files(&layer.join(rel_dir), layer))
            .collect()
    }

    fn grep_sync(&self, regex: &Regex, rel_dir: &Path) -> Vec<String> {
        let mut matches = Vec::new();
        for file in self.files_sync(rel_dir) {
            let Ok(text) = self.read_sync(Path::new(&file)) else {
                continue;
            };
            for (n, line) in text.lines().enumerate() {
                if regex.is_match(line) {
                    matches.push(format!("{file}:{}:{line}", n + 1));
                    if matches.len() >= MAX_GREP_MATCHES {
                        return matches;
                    }
                }
            }
        }
        matches
    }

    fn materialize_sync(&self, target: &Path) -> Result<Baseline> {
        if target.exists() {
            fs::remove_dir_all(target)?;
        }
        fs::create_dir_all(target)?;

        // Lower first so upper copies overwrite.
        let layers: Vec<&Path> = self.layers().collect();
        for layer in layers.into_iter().rev() {
            for rel in walk_files(layer, layer) {
                let dest = target.join(&rel);
                if let Some(parent) = dest.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::copy(layer.join(&rel), dest)?;
            }
        }

        let mut digests = BTreeMap::new();
        for rel in walk_files(target, target) {
            let bytes = fs::read(target.join(&rel))?;
            digests.insert(rel, digest(&bytes));
        }
        Ok(Baseline { digests })
    }

    fn absorb_sync(&self, from: &Path, baseline: &Baseline) -> Result<Absorbed> {
        let mut absorbed = Absorbed::default();
        let mut present = BTreeSet::new();

        for rel in walk_files(from, from) {
            let bytes = fs::read(from.join(&rel))?;
            if baseline.digests.get(&rel) != Some(&digest(&bytes)) {
                self.write_sync(Path::new(&rel), &bytes)?;
                absorbed.written.push(rel.clone());
            }
            present.insert(rel);
        }

        for (rel, original) in &baseline.digests {
            if present.contains(rel) {
                continue;
            }
            let in_upper = self.upper.join(rel);
            let untouched = fs::read(&in_upper).is_ok_and(|bytes| digest(&bytes) == *original);
            if untouched {
                fs::remove_file(&in_upper)?;
                absorbed.removed.push(rel.clone());
            }
            if self.lower.as_ref().is_some_and(|lower| lower.join(rel).is_file()) {
                debug!(file = %rel, "Deleted file is still visible from the lower layer");
            }
        }

        debug!(
            written = absorbed.written.len(),
            removed = absorbed.removed.len(),
            upper = %self.upper.display(),
            "Absorbed scratch changes"
        );
        Ok(absorbed)
    }
}

/// Content digests of a materialized copy, keyed by relative path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Baseline {
    digests: BTreeMap<String, [u8; 32]>,
}

impl Baseline {
    pub fn len(&self) -> usize {
        self.digests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.digests.is_empty()
    }
}

/// What [`LayeredView::absorb`] applied to the upper layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Absorbed {
    pub written: Vec<String>,
    pub removed: Vec<String>,
}

fn digest(bytes: &[u8]) -> [u8; 32] {
    Sha256::digest(bytes).into()
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}

/// Files under `dir`, as `/`-joined paths relative to `root`. Skips `.git`.
fn walk_files(dir: &Path, root: &Path) -> Vec<String> {
    if !dir.is_dir() {
        return Vec::new();
    }
    WalkDir::new(dir)
        .into_iter()
        .filter_entry(|e| e.file_name() != ".git")
        .filter_map(std::result::Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| {
            e.path().strip_prefix(root).ok().map(|rel| {
                rel.components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/")
            })
        })
        .collect()
}

/// Normalize a tool-supplied path to one relative to the workspace root.
///
/// Accepts paths under the container workdir; rejects anything that climbs out.
pub(crate) fn relative_path(path: &str) -> Result<PathBuf> {
    let trimmed = path
        .strip_prefix(CONTAINER_WORKDIR)
        .unwrap_or(path)
        .trim_start_matches('/');

    let mut rel = PathBuf::new();
    for component in Path::new(trimmed).components() {
        match component {
            Component::Normal(part) => rel.push(part),
            Component::CurDir => {}
            _ => return Err(SandboxError::InvalidPath(path.to_string())),
        }
    }
    Ok(rel)
}

fn file_path(path: &str) -> Result<PathBuf> {
    let rel = relative_path(path)?;
    if rel.as_os_str().is_empty() {
        return Err(SandboxError::InvalidPath(path.to_string()));
    }
    Ok(rel)
}

fn dir_path(dir: &str) -> Result<PathBuf> {
    relative_path(dir)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use tempfile::TempDir;

    fn view() -> (TempDir, LayeredView) {
        let tmp = TempDir::new().unwrap();
        let upper = tmp.path().join("upper");
        let lower = tmp.path().join("lower");
        fs::create_dir_all(&upper).unwrap();
        fs::create_dir_all(lower.join("src")).unwrap();
        fs::write(lower.join("src/main.rs"), "fn main() {}\n").unwrap();
        fs::write(lower.join("README.md"), "lower readme\n").unwrap();
        (tmp, LayeredView::layered(upper, lower))
    }

    #[test]
    fn should_normalize_workspace_paths() {
        assert_eq!(relative_path("/workspace/src/a.rs").unwrap(), PathBuf::from("src/a.rs"));
        assert_eq!(relative_path("./src/a.rs").unwrap(), PathBuf::from("src/a.rs"));
        assert_eq!(relative_path("").unwrap(), PathBuf::new());
        assert!(relative_path("../etc/passwd").is_err());
        assert!(file_path(".").is_err());
    }

    #[tokio::test]
    async fn given_file_only_in_lower_when_written_then_upper_shadows_lower() {
        let (tmp, view) = view();

        assert_eq!(view.read("README.md").await.unwrap(), "lower readme\n");
        view.write("README.md", "upper readme\n".to_string()).await.unwrap();

        assert_eq!(view.read("README.md").await.unwrap(), "upper readme\n");
        let lower = fs::read_to_string(tmp.path().join("lower/README.md")).unwrap();
        assert_eq!(lower, "lower readme\n");
        assert_eq!(view.changed_files().await.unwrap(), vec!["README.md"]);
    }

    #[tokio::test]
    async fn given_both_layers_when_listing_then_merges_without_duplicates() {
        let (_tmp, view) = view();
        view.write("src/main.rs", "fn main() { run() }\n".to_string()).await.unwrap();
        view.write("src/lib.rs", "pub fn run() {}\n".to_string()).await.unwrap();

        let files = view.list("").await.unwrap();
        assert_eq!(files, vec!["README.md", "src/lib.rs", "src/main.rs"]);

        let hits = view.grep("run", "src").await.unwrap();
        assert_eq!(
            hits,
            vec!["src/lib.rs:1:pub fn run() {}", "src/main.rs:1:fn main() { run() }"]
        );
    }

    #[tokio::test]
    async fn given_duplicate_anchor_when_editing_then_file_is_unchanged() {
        let (_tmp, view) = view();
        view.write("a.txt", "x\nx\n".to_string()).await.unwrap();

        let result = view.edit("a.txt", "x".to_string(), "y".to_string()).await;
        assert!(matches!(
            result,
            Err(SandboxError::Edit {
                source: super::super::EditError::NotUnique { count: 2 },
                ..
            })
        ));
        assert_eq!(view.read("a.txt").await.unwrap(), "x\nx\n");
    }

    #[tokio::test]
    async fn given_missing_anchor_when_editing_then_not_found_and_unchanged() {
        let (_tmp, view) = view();

        let result = view
            .edit("src/main.rs", "nope".to_string(), "y".to_string())
            .await;
        assert!(matches!(
            result,
            Err(SandboxError::Edit {
                source: super::super::EditError::NotFound,
                ..
            })
        ));
        assert_eq!(view.read("src/main.rs").await.unwrap(), "fn main() {}\n");
        assert!(view.changed_files().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn given_materialized_copy_when_changed_then_absorb_copies_only_differences() {
        let (tmp, view) = view();
        let scratch = tmp.path().join("merged/exec-1");

        let baseline = view.materialize(scratch.clone()).await.unwrap();
        assert!(scratch.join("src/main.rs").is_file());
        assert_eq!(baseline.len(), 2);

        fs::write(scratch.join("new.txt"), "new\n").unwrap();
        fs::write(scratch.join("README.md"), "edited\n").unwrap();

        let absorbed = view.absorb(scratch, baseline).await.unwrap();
        assert_eq!(absorbed.written, vec!["README.md", "new.txt"]);
        assert!(absorbed.removed.is_empty());
        assert_eq!(view.changed_files().await.unwrap(), vec!["README.md", "new.txt"]);
    }

    #[tokio::test]
    async fn given_write_during_exec_when_absorbing_then_untouched_copy_does_not_overwrite_it() {
        let (tmp, view) = view();
        view.write("shared.txt", "original\n".to_string()).await.unwrap();
        let scratch = tmp.path().join("merged/exec-2");

        let baseline = view.materialize(scratch.clone()).await.unwrap();
        view.write("shared.txt", "second agent\n".to_string()).await.unwrap();
        fs::write(scratch.join("out.txt"), "built\n").unwrap();

        let absorbed = view.absorb(scratch, baseline).await.unwrap();

        assert_eq!(absorbed.written, vec!["out.txt"]);
        assert_eq!(view.read("shared.txt").await.unwrap(), "second agent\n");
    }

    #[tokio::test]
    async fn given_file_deleted_in_scratch_when_absorbing_then_upper_copy_is_removed() {
        let (tmp, view) = view();
        view.write("tmp.log", "noise\n".to_string()).await.unwrap();
        view.write("keep.log", "old\n".to_string()).await.unwrap();
        let scratch = tmp.path().join("merged/exec-3");

        let baseline = view.materialize(scratch.clone()).await.unwrap();
        fs::remove_file(scratch.join("tmp.log")).unwrap();
        fs::remove_file(scratch.join("keep.log")).unwrap();
        view.write("keep.log", "rewritten\n".to_string()).await.unwrap();

        let absorbed = view.absorb(scratch, baseline).await.unwrap();

        assert_eq!(absorbed.removed, vec!["tmp.log"]);
        assert!(view.read("tmp.log").await.is_err());
        assert_eq!(view.read("keep.log").await.unwrap(), "rewritten\n");
    }

    #[tokio::test]
    async fn given_single_layer_when_reading_missing_file_then_not_found() {
        let tmp = TempDir::new().unwrap();
        let view = LayeredView::single(tmp.path().to_path_buf());
        assert_eq!(
            view.read("missing.txt").await,
            Err(SandboxError::FileNotFound("missing.txt".to_string()))
        );
    }
}
