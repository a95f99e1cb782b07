//! Object preview tool: fetch an object's metadata and contents from the
//! local catalog.
//!
//! Objects live at `<root>/<bucket>/<key>`. The result always starts with a
//! metadata block; the second block depends on the file type: an image, an
//! attached document, a "too large" notice, or an "unidentified" notice.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use copilot_config::CatalogConfig;
use copilot_core::content::{self, ContentBlock, DocumentFormat, ImageFormat};
use copilot_core::error::ToolError;
use copilot_core::tool::{Tool, ToolResult};
use serde::Deserialize;
use tracing::debug;

/// Images above this size are not attached.
const MAX_IMAGE_BYTES: u64 = 5 * 1024 * 1024;

pub struct GetObjectTool {
    root: PathBuf,
    preview_threshold: u64,
}

#[derive(Debug, Deserialize)]
struct GetObjectInput {
    bucket: String,
    key: String,
    #[serde(default)]
    version: Option<String>,
}

/// How an object's contents are presented to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileType {
    Image(ImageFormat),
    /// An image we recognize but cannot attach (bmp, tiff, czi).
    UnsupportedImage,
    Document(DocumentFormat),
    Unidentified,
}

impl GetObjectTool {
    pub fn new(config: &CatalogConfig) -> Self {
        Self {
            root: config.root.clone(),
            preview_threshold: config.preview_threshold_bytes,
        }
    }

    fn resolve(&self, bucket: &str, key: &str) -> Result<PathBuf, ToolError> {
        object_path(&self.root, bucket, key).map_err(|reason| ToolError::failed("get_object", reason))
    }

    async fn contents(&self, path: &Path, input: &GetObjectInput, size: u64) -> ContentBlock {
        match detect_file_type(&input.key) {
            FileType::Image(format) if size <= MAX_IMAGE_BYTES => match tokio::fs::read(path).await {
                Ok(data) => ContentBlock::Image { format, data },
                Err(e) => contents_error("Error while getting image preview:\n", e),
            },
            FileType::Image(_) => content::text(["Image is too large to include its contents directly"]),
            FileType::UnsupportedImage => contents_error(
                "Error while getting image preview:\n",
                "Image format is not supported for preview",
            ),
            FileType::Document(_) if size > self.preview_threshold => {
                content::text(["Object is too large to include its contents directly"])
            }
            FileType::Document(format) => match tokio::fs::read(path).await {
                Ok(data) => ContentBlock::Document {
                    name: normalize_document_name(&format!(
                        "{} {} {}",
                        input.bucket,
                        input.key,
                        input.version.as_deref().unwrap_or("")
                    )),
                    format,
                    data,
                },
                Err(e) => contents_error("Error while getting object contents:\n", e),
            },
            FileType::Unidentified => contents_error(
                "Error while getting object contents:\n",
                "Unidentified file type",
            ),
        }
    }
}

#[async_trait]
impl Tool for GetObjectTool {
    fn description(&self) -> Option<&str> {
        Some(
            "Get contents and metadata of an object in a catalog bucket. \
             The local catalog keeps only the latest version of each object; \
             a requested version is echoed in the metadata but does not select a different file",
        )
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "bucket": {
                    "type": "string",
                    "description": "Bucket name"
                },
                "key": {
                    "type": "string",
                    "description": "Object key (path within the bucket)"
                },
                "version": {
                    "type": "string",
                    "description": "Object version, recorded in the metadata only (the latest contents are always returned)"
                }
            },
            "required": ["bucket", "key"]
        })
    }

    async fn execute(&self, input: serde_json::Value) -> Result<Option<ToolResult>, ToolError> {
        let input: GetObjectInput = serde_json::from_value(input)
            .map_err(|e| ToolError::failed("get_object", e))?;
        let path = self.resolve(&input.bucket, &input.key)?;
        debug!(bucket = %input.bucket, key = %input.key, "Getting object");

        let path = match contained(&self.root, &path).await {
            Ok(Some(real)) => real,
            Ok(None) => {
                return Err(ToolError::failed(
                    "get_object",
                    format!("invalid key '{}': resolves outside the catalog", input.key),
                ));
            }
            Err(e) => return Ok(Some(ToolResult::fail([metadata_error(e)]))),
        };

        let meta = match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => meta,
            Ok(_) => {
                return Ok(Some(ToolResult::fail([metadata_error("object is not a file")])));
            }
            Err(e) => return Ok(Some(ToolResult::fail([metadata_error(e)]))),
        };

        let modified = meta
            .modified()
            .ok()
            .map(|t| DateTime::<Utc>::from(t).to_rfc3339());
        let metadata = serde_json::json!({
            "bucket": input.bucket,
            "key": input.key,
            "version": input.version,
            "size": meta.len(),
            "modified": modified,
        });
        let metadata = serde_json::to_string_pretty(&metadata).unwrap_or_default();
        let meta_block = content::text([
            "Got object metadata:\n",
            format!("<object-metadata>\n{metadata}\n</object-metadata>").as_str(),
        ]);

        let contents = self.contents(&path, &input, meta.len()).await;
        Ok(Some(ToolResult::succeed([meta_block, contents])))
    }
}

/// `<root>/<bucket>/<key>`, refusing bucket and key values that could escape the root.
pub(crate) fn object_path(root: &Path, bucket: &str, key: &str) -> Result<PathBuf, String> {
    for (label, part) in [("bucket", bucket), ("key", key)] {
        let path = Path::new(part);
        let escapes = part.is_empty()
            || path.is_absolute()
            || path
                .components()
                .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(format!("invalid {label} '{part}'"));
        }
    }
    if bucket.contains('/') || bucket.contains('\\') {
        return Err(format!("invalid bucket '{bucket}'"));
    }
    Ok(root.join(bucket).join(key))
}

/// Follow symlinks in `path`; `None` when the target lies outside `root`.
pub(crate) async fn contained(root: &Path, path: &Path) -> std::io::Result<Option<PathBuf>> {
    let root = tokio::fs::canonicalize(root).await?;
    let real = tokio::fs::canonicalize(path).await?;
    Ok(real.starts_with(&root).then_some(real))
}

fn metadata_error(e: impl std::fmt::Display) -> ContentBlock {
    content::text([
        "Error while getting object metadata:\n",
        format!("<object-metadata-error>\n{e}\n</object-metadata-error>").as_str(),
    ])
}

fn contents_error(prefix: &str, e: impl std::fmt::Display) -> ContentBlock {
    content::text([
        prefix,
        format!("<object-contents-error>\n{e}\n</object-contents-error>").as_str(),
    ])
}

/// Document names may only hold ASCII alphanumerics, whitespace, hyphens,
/// parentheses and square brackets, with no runs of whitespace.
pub fn normalize_document_name(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c.is_whitespace() || "-()[]".contains(c) {
                c
            } else {
                ' '
            }
        })
        .collect();
    replaced.split_whitespace().collect::<Vec<_>>().join(" ")
}

const TEXT_EXTENSIONS: &[&str] = &[
    "txt", "log", "sh", "bash", "zsh", "c", "h", "cc", "cpp", "hpp", "cs", "css", "diff", "patch",
    "go", "hs", "ini", "toml", "java", "js", "mjs", "jsx", "json", "jsonl", "lisp", "m", "pl",
    "php", "py", "r", "rb", "rs", "scala", "sql", "ts", "tsx", "xml", "xhtml", "rss", "yaml",
    "yml", "tsv", "bed", "fa", "fasta", "fastq", "fq", "sam", "gff", "gtf", "ipynb",
];

const TEXT_BASENAMES: &[&str] = &["license", "readme", "dockerfile", "makefile", "changelog"];

fn detect_file_type(key: &str) -> FileType {
    let path = Path::new(key);
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    let basename = path
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    match ext.as_str() {
        "png" => FileType::Image(ImageFormat::Png),
        "jpg" | "jpeg" => FileType::Image(ImageFormat::Jpeg),
        "gif" => FileType::Image(ImageFormat::Gif),
        "webp" => FileType::Image(ImageFormat::Webp),
        "bmp" | "tiff" | "tif" | "czi" => FileType::UnsupportedImage,
        "htm" | "html" => FileType::Document(DocumentFormat::Html),
        "md" | "rmd" => FileType::Document(DocumentFormat::Md),
        "pdf" => FileType::Document(DocumentFormat::Pdf),
        "csv" => FileType::Document(DocumentFormat::Csv),
        "docx" => FileType::Document(DocumentFormat::Docx),
        "doc" => FileType::Document(DocumentFormat::Doc),
        "xls" => FileType::Document(DocumentFormat::Xls),
        "xlsx" => FileType::Document(DocumentFormat::Xlsx),
        e if TEXT_EXTENSIONS.contains(&e) => FileType::Document(DocumentFormat::Txt),
        _ if TEXT_BASENAMES.contains(&basename.as_str()) => FileType::Document(DocumentFormat::Txt),
        _ => FileType::Unidentified,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog(threshold: u64) -> (tempfile::TempDir, GetObjectTool) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("cells/raw")).unwrap();
        std::fs::write(dir.path().join("cells/README.md"), "# Cells\n").unwrap();
        std::fs::write(dir.path().join("cells/raw/plot.png"), [0x89, b'P', b'N', b'G']).unwrap();
        std::fs::write(dir.path().join("cells/raw/data.parquet"), [0u8; 16]).unwrap();
        std::fs::write(dir.path().join("cells/raw/big.csv"), "a,b\n".repeat(64)).unwrap();
        let tool = GetObjectTool::new(&CatalogConfig {
            root: dir.path().to_path_buf(),
            preview_threshold_bytes: threshold,
        });
        (dir, tool)
    }

    async fn run(tool: &GetObjectTool, input: serde_json::Value) -> ToolResult {
        tool.execute(input).await.unwrap().unwrap()
    }

    #[test]
    fn document_name_normalized() {
        assert_eq!(
            normalize_document_name("cells raw/report_v2.final.pdf "),
            "cells raw report v2 final pdf"
        );
        assert_eq!(normalize_document_name("a  (b) [c]-d"), "a (b) [c]-d");
    }

    #[test]
    fn detects_file_types() {
        assert_eq!(detect_file_type("x/y.JPG"), FileType::Image(ImageFormat::Jpeg));
        assert_eq!(detect_file_type("y.tif"), FileType::UnsupportedImage);
        assert_eq!(detect_file_type("notes.Rmd"), FileType::Document(DocumentFormat::Md));
        assert_eq!(detect_file_type("main.rs"), FileType::Document(DocumentFormat::Txt));
        assert_eq!(detect_file_type("sub/LICENSE"), FileType::Document(DocumentFormat::Txt));
        assert_eq!(detect_file_type("table.parquet"), FileType::Unidentified);
    }

    #[tokio::test]
    async fn markdown_attached_as_document() {
        let (_dir, tool) = catalog(500 * 1024);
        let result = run(&tool, serde_json::json!({"bucket": "cells", "key": "README.md"})).await;
        assert!(result.is_success());
        assert_eq!(result.content.len(), 2);

        let meta = result.content[0].as_text().unwrap();
        assert!(meta.starts_with("Got object metadata:\n<object-metadata>"));
        assert!(meta.contains("\"size\": 8"));

        match &result.content[1] {
            ContentBlock::Document { name, format, data } => {
                assert_eq!(name, "cells README md");
                assert_eq!(*format, DocumentFormat::Md);
                assert_eq!(data, b"# Cells\n");
            }
            other => panic!("Expected document, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn image_attached() {
        let (_dir, tool) = catalog(500 * 1024);
        let result = run(&tool, serde_json::json!({"bucket": "cells", "key": "raw/plot.png"})).await;
        assert!(matches!(
            result.content[1],
            ContentBlock::Image { format: ImageFormat::Png, .. }
        ));
    }

    #[tokio::test]
    async fn large_document_described_not_attached() {
        let (_dir, tool) = catalog(100);
        let result = run(&tool, serde_json::json!({"bucket": "cells", "key": "raw/big.csv"})).await;
        assert!(result.is_success());
        assert_eq!(
            result.content[1].as_text(),
            Some("Object is too large to include its contents directly")
        );
    }

    #[tokio::test]
    async fn unidentified_type_reported() {
        let (_dir, tool) = catalog(500 * 1024);
        let result = run(&tool, serde_json::json!({"bucket": "cells", "key": "raw/data.parquet"})).await;
        assert!(result.is_success());
        assert!(result.content[1].as_text().unwrap().contains("Unidentified file type"));
    }

    #[tokio::test]
    async fn missing_object_is_error_result() {
        let (_dir, tool) = catalog(500 * 1024);
        let result = run(&tool, serde_json::json!({"bucket": "cells", "key": "nope.txt"})).await;
        assert!(!result.is_success());
        assert!(result.content[0].as_text().unwrap().contains("<object-metadata-error>"));
    }

    #[tokio::test]
    async fn traversal_rejected() {
        let (_dir, tool) = catalog(500 * 1024);
        for input in [
            serde_json::json!({"bucket": "cells", "key": "../../etc/passwd"}),
            serde_json::json!({"bucket": "..", "key": "x"}),
            serde_json::json!({"bucket": "cells", "key": "/etc/passwd"}),
            serde_json::json!({"bucket": "cells/raw", "key": "plot.png"}),
        ] {
            let err = tool.execute(input).await.unwrap_err();
            assert!(err.to_string().starts_with("Tool \"get_object\" failed: invalid"));
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn symlink_out_of_the_catalog_rejected() {
        let (dir, tool) = catalog(500 * 1024);
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("secret.txt"), "hunter2").unwrap();
        std::os::unix::fs::symlink(outside.path().join("secret.txt"), dir.path().join("cells/leak.txt"))
            .unwrap();
        std::os::unix::fs::symlink(dir.path().join("cells/README.md"), dir.path().join("cells/alias.md"))
            .unwrap();

        let err = tool
            .execute(serde_json::json!({"bucket": "cells", "key": "leak.txt"}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("resolves outside the catalog"));

        let result = run(&tool, serde_json::json!({"bucket": "cells", "key": "alias.md"})).await;
        assert!(result.is_success());
    }

    #[test]
    fn description_says_version_is_not_selected() {
        let (_dir, tool) = catalog(500 * 1024);
        assert!(tool.description().unwrap().contains("does not select a different file"));
    }
}
