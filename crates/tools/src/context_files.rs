//! Context files: `AGENTS.md` / `README.md` notes kept next to the data.
//!
//! When the viewport is inside a bucket, the notes at the bucket root and in
//! every directory up from the current one are loaded from the local catalog
//! and contributed to the shared context as background messages. Each scope
//! raises a readiness marker once its files are loaded; files that are
//! missing, empty or unreadable are skipped.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use copilot_core::context::{ContextAggregator, Contribution, PartialContext};
use futures::StreamExt;
use tokio::io::AsyncReadExt;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::get_object::{contained, object_path};
use crate::navigate::NavigableRoute;

/// Files larger than this are truncated.
pub const MAX_CONTEXT_FILE_SIZE: u64 = 10_000;
/// Non-root files kept per directory chain.
pub const MAX_CONTEXT_FILES: usize = 10;
const MAX_NON_ROOT_FILES_TO_TRY: usize = 50;
const MAX_CONCURRENT_LOADS: usize = 10;

pub const CONTEXT_FILE_NAMES: [&str; 2] = ["AGENTS.md", "README.md"];

pub const BUCKET_ROOT_MARKER: &str = "bucketRootContextFilesReady";
pub const BUCKET_DIR_MARKER: &str = "bucketDirContextFilesReady";

#[derive(Debug, thiserror::Error)]
pub enum ContextFileError {
    #[error("{0}")]
    InvalidPath(String),

    #[error("resolves outside the catalog")]
    OutsideCatalog,

    #[error("empty file")]
    Empty,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextFile {
    pub bucket: String,
    pub path: String,
    pub content: String,
    pub truncated: bool,
}

impl ContextFile {
    /// The file as a `<context-file>` element.
    pub fn format(&self) -> String {
        format!(
            "<context-file scope=\"bucket\" bucket=\"{}\" path=\"{}\" truncated=\"{}\">\n{}\n</context-file>",
            escape_attr(&self.bucket),
            escape_attr(&self.path),
            self.truncated,
            self.content
        )
    }
}

fn escape_attr(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Candidate paths from `dir` up to (not including) the bucket root.
///
/// `dir` is a directory prefix: empty, or ending with `/`.
pub fn path_chain(dir: &str) -> Vec<String> {
    let mut chain = Vec::new();
    let mut current = dir.to_string();
    while !current.is_empty() {
        chain.extend(CONTEXT_FILE_NAMES.iter().map(|name| format!("{current}{name}")));
        current = parent_prefix(&current);
    }
    chain.truncate(MAX_NON_ROOT_FILES_TO_TRY);
    chain
}

/// `a/b/` → `a/`, `a/` → ``, `a/b.csv` → `a/`.
fn parent_prefix(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(idx) => trimmed[..=idx].to_string(),
        None => String::new(),
    }
}

/// Where a route points inside a bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Focus {
    pub bucket: String,
    /// Directory prefix below the bucket root, ending with `/`.
    pub dir: Option<String>,
}

impl Focus {
    /// The bucket and directory a catalog route shows, if any.
    pub fn from_route(route: &NavigableRoute) -> Option<Self> {
        let bucket = route.params.get("bucket")?.clone();
        let path = route.params.get("path").map(String::as_str).unwrap_or_default();
        let dir = match route.name.as_str() {
            "bucket.overview" => String::new(),
            "bucket.prefix" if path.is_empty() || path.ends_with('/') => path.to_string(),
            "bucket.prefix" => format!("{path}/"),
            "bucket.object" => parent_prefix(path),
            _ => return None,
        };
        Some(Self {
            bucket,
            dir: (!dir.is_empty()).then_some(dir),
        })
    }
}

/// Reads context files from the local catalog root.
#[derive(Debug, Clone)]
pub struct ContextFileLoader {
    root: PathBuf,
}

impl ContextFileLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Load one file, keeping at most [`MAX_CONTEXT_FILE_SIZE`] bytes.
    pub async fn load(&self, bucket: &str, path: &str) -> Result<ContextFile, ContextFileError> {
        let location = object_path(&self.root, bucket, path).map_err(ContextFileError::InvalidPath)?;
        let location = contained(&self.root, &location)
            .await?
            .ok_or(ContextFileError::OutsideCatalog)?;

        let size = tokio::fs::metadata(&location).await?.len();
        if size == 0 {
            return Err(ContextFileError::Empty);
        }
        let truncated = size > MAX_CONTEXT_FILE_SIZE;

        let mut bytes = Vec::new();
        tokio::fs::File::open(&location)
            .await?
            .take(MAX_CONTEXT_FILE_SIZE)
            .read_to_end(&mut bytes)
            .await?;
        let content = String::from_utf8_lossy(&bytes).trim().to_string();
        if content.is_empty() {
            return Err(ContextFileError::Empty);
        }

        Ok(ContextFile {
            bucket: bucket.to_string(),
            path: path.to_string(),
            content,
            truncated,
        })
    }

    /// Load `paths` in order, skipping failures, keeping the first `limit` hits.
    pub async fn load_all(&self, bucket: &str, paths: &[String], limit: usize) -> Vec<ContextFile> {
        futures::stream::iter(paths.iter().cloned())
            .map(|path| async move {
                match self.load(bucket, &path).await {
                    Ok(file) => Some(file),
                    Err(e) => {
                        trace!(target: "context.files", %bucket, %path, error = %e, "Skipping context file");
                        None
                    }
                }
            })
            .buffered(MAX_CONCURRENT_LOADS)
            .filter_map(|file| async move { file })
            .take(limit)
            .collect()
            .await
    }
}

/// Context contribution holding the files for the current [`Focus`].
pub struct ContextFiles {
    loader: ContextFileLoader,
    contribution: Contribution,
    generation: AtomicU64,
}

impl ContextFiles {
    pub fn new(context: &ContextAggregator, loader: ContextFileLoader) -> Arc<Self> {
        Arc::new(Self {
            loader,
            contribution: context.push(PartialContext::new()),
            generation: AtomicU64::new(0),
        })
    }

    /// Drop whatever was loaded; used when the viewport leaves the buckets.
    pub fn clear(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.contribution.update(PartialContext::new());
    }

    /// Lower the markers and load the files for `focus` in the background.
    ///
    /// A later `focus` or `clear` supersedes a load still in flight.
    pub fn focus(self: &Arc<Self>, focus: Focus) -> JoinHandle<()> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let mut pending = PartialContext::new().with_marker(BUCKET_ROOT_MARKER, false);
        if focus.dir.is_some() {
            pending = pending.with_marker(BUCKET_DIR_MARKER, false);
        }
        self.contribution.update(pending);

        let this = Arc::clone(self);
        tokio::spawn(async move { this.refresh(generation, focus).await })
    }

    async fn refresh(&self, generation: u64, focus: Focus) {
        let root_paths: Vec<String> = CONTEXT_FILE_NAMES.iter().map(|n| n.to_string()).collect();
        let dir_paths = focus.dir.as_deref().map(path_chain).unwrap_or_default();
        let (root, dir) = futures::join!(
            self.loader.load_all(&focus.bucket, &root_paths, CONTEXT_FILE_NAMES.len()),
            self.loader.load_all(&focus.bucket, &dir_paths, MAX_CONTEXT_FILES),
        );

        if self.generation.load(Ordering::SeqCst) != generation {
            debug!(target: "context.files", bucket = %focus.bucket, "Discarding superseded context files");
            return;
        }
        debug!(
            target: "context.files",
            bucket = %focus.bucket,
            dir = ?focus.dir,
            root = root.len(),
            nested = dir.len(),
            "Context files loaded"
        );

        let mut partial = PartialContext::new().with_marker(BUCKET_ROOT_MARKER, true);
        if focus.dir.is_some() {
            partial = partial.with_marker(BUCKET_DIR_MARKER, true);
        }
        for file in root.iter().chain(&dir) {
            partial = partial.with_message(file.format());
        }
        self.contribution.update(partial);
    }
}

impl std::fmt::Debug for ContextFiles {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextFiles")
            .field("root", &self.loader.root())
            .field("generation", &self.generation.load(Ordering::SeqCst))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn catalog() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let cells = dir.path().join("cells");
        std::fs::create_dir_all(cells.join("raw/2024")).unwrap();
        std::fs::write(cells.join("README.md"), "# Cells\nSingle-cell runs.\n").unwrap();
        std::fs::write(cells.join("raw/AGENTS.md"), "Raw counts; never edit.").unwrap();
        std::fs::write(cells.join("raw/2024/README.md"), "   \n").unwrap();
        dir
    }

    fn route(name: &str, params: &[(&str, &str)]) -> NavigableRoute {
        NavigableRoute {
            name: name.into(),
            params: params
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    #[test]
    fn path_chain_walks_up_to_the_root() {
        assert_eq!(
            path_chain("a/b/"),
            vec!["a/b/AGENTS.md", "a/b/README.md", "a/AGENTS.md", "a/README.md"]
        );
        assert!(path_chain("").is_empty());

        let deep = "d/".repeat(40);
        assert_eq!(path_chain(&deep).len(), 50);
    }

    #[test]
    fn focus_follows_bucket_routes() {
        assert_eq!(Focus::from_route(&route("home", &[])), None);
        assert_eq!(
            Focus::from_route(&route("bucket.overview", &[("bucket", "cells")])),
            Some(Focus { bucket: "cells".into(), dir: None })
        );
        assert_eq!(
            Focus::from_route(&route("bucket.prefix", &[("bucket", "cells"), ("path", "raw")])),
            Some(Focus { bucket: "cells".into(), dir: Some("raw/".into()) })
        );
        assert_eq!(
            Focus::from_route(&route("bucket.object", &[("bucket", "cells"), ("path", "raw/2024/a.csv")])),
            Some(Focus { bucket: "cells".into(), dir: Some("raw/2024/".into()) })
        );
        assert_eq!(
            Focus::from_route(&route("bucket.object", &[("bucket", "cells"), ("path", "a.csv")])),
            Some(Focus { bucket: "cells".into(), dir: None })
        );
    }

    #[tokio::test]
    async fn large_files_are_truncated() {
        let dir = catalog();
        std::fs::write(dir.path().join("cells/AGENTS.md"), "x".repeat(12_000)).unwrap();
        let loader = ContextFileLoader::new(dir.path());

        let file = loader.load("cells", "AGENTS.md").await.unwrap();
        assert!(file.truncated);
        assert_eq!(file.content.len(), MAX_CONTEXT_FILE_SIZE as usize);

        let file = loader.load("cells", "README.md").await.unwrap();
        assert!(!file.truncated);
        assert_eq!(file.content, "# Cells\nSingle-cell runs.");
    }

    #[tokio::test]
    async fn missing_and_blank_files_are_skipped() {
        let dir = catalog();
        let loader = ContextFileLoader::new(dir.path());

        assert!(matches!(
            loader.load("cells", "raw/2024/README.md").await,
            Err(ContextFileError::Empty)
        ));
        assert!(matches!(
            loader.load("cells", "../secrets/AGENTS.md").await,
            Err(ContextFileError::InvalidPath(_))
        ));

        let files = loader.load_all("cells", &path_chain("raw/2024/"), MAX_CONTEXT_FILES).await;
        let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["raw/AGENTS.md"]);
    }

    #[tokio::test]
    async fn load_all_keeps_the_first_hits() {
        let dir = catalog();
        let nested = dir.path().join("cells/a/b/c");
        std::fs::create_dir_all(&nested).unwrap();
        for d in ["a", "a/b", "a/b/c"] {
            std::fs::write(dir.path().join("cells").join(d).join("README.md"), d).unwrap();
        }
        let loader = ContextFileLoader::new(dir.path());

        let files = loader.load_all("cells", &path_chain("a/b/c/"), 2).await;
        let contents: Vec<&str> = files.iter().map(|f| f.content.as_str()).collect();
        assert_eq!(contents, vec!["a/b/c", "a/b"]);
    }

    #[test]
    fn formats_as_context_file_element() {
        let file = ContextFile {
            bucket: "cells".into(),
            path: "raw/\"odd\".md".into(),
            content: "notes".into(),
            truncated: false,
        };
        assert_eq!(
            file.format(),
            "<context-file scope=\"bucket\" bucket=\"cells\" path=\"raw/&quot;odd&quot;.md\" truncated=\"false\">\nnotes\n</context-file>"
        );
    }

    #[tokio::test]
    async fn focus_contributes_messages_and_markers() {
        let dir = catalog();
        let context = ContextAggregator::new();
        let files = ContextFiles::new(&context, ContextFileLoader::new(dir.path()));

        files
            .focus(Focus {
                bucket: "cells".into(),
                dir: Some("raw/2024/".into()),
            })
            .await
            .unwrap();

        let ctx = context.aggregate();
        assert_eq!(ctx.markers.get(BUCKET_ROOT_MARKER), Some(&true));
        assert_eq!(ctx.markers.get(BUCKET_DIR_MARKER), Some(&true));
        assert_eq!(ctx.messages.len(), 2);
        assert!(ctx.messages[0].contains("path=\"README.md\""));
        assert!(ctx.messages[1].contains("Raw counts; never edit."));
    }

    #[tokio::test]
    async fn markers_can_be_awaited() {
        let dir = catalog();
        let context = ContextAggregator::new();
        let files = ContextFiles::new(&context, ContextFileLoader::new(dir.path()));

        let _load = files.focus(Focus {
            bucket: "cells".into(),
            dir: None,
        });
        context
            .wait_for_markers(&[BUCKET_ROOT_MARKER.to_string()], Duration::from_secs(5))
            .await
            .unwrap();
        assert!(!context.markers().contains_key(BUCKET_DIR_MARKER));
    }

    #[tokio::test]
    async fn superseded_load_is_discarded() {
        let dir = catalog();
        let context = ContextAggregator::new();
        let files = ContextFiles::new(&context, ContextFileLoader::new(dir.path()));

        let stale = files.focus(Focus {
            bucket: "cells".into(),
            dir: None,
        });
        files.clear();
        stale.await.unwrap();

        assert_eq!(*context.aggregate(), PartialContext::new());
    }
}
