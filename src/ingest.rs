//! File ingestion for `bkb ingest`.
//!
//! A path is either one file or a directory walked with the configured
//! include/exclude globs. Each file becomes one document; failures are
//! retried, recorded, and skipped so the rest of the batch still lands.

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use brandkb_core::kb::KnowledgeBase;
use brandkb_core::models::{DocumentInput, SHARED_OWNER};

use crate::config::Config;
use crate::http::backoff;
use crate::progress::{IngestProgressEvent, IngestProgressReporter};
use crate::research::extract_page;

#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub owner_id: i64,
    pub is_public: bool,
    /// Overrides the extension-derived content type.
    pub content_type: Option<String>,
    /// Extra attempts per file after the first failure.
    pub retries: u32,
    pub dry_run: bool,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            owner_id: SHARED_OWNER,
            is_public: true,
            content_type: None,
            retries: 2,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FileResult {
    pub path: String,
    pub ok: bool,
    pub content_id: Option<String>,
    pub chunks: usize,
    pub attempts: u32,
    pub error: Option<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct BatchReport {
    pub files: usize,
    pub ingested: usize,
    pub failed: usize,
    pub chunks: usize,
    pub results: Vec<FileResult>,
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("invalid glob '{}'", pattern))?);
    }
    Ok(builder.build()?)
}

/// Files under `root` selected by `[ingest]`, sorted by relative path.
pub fn discover(config: &Config, root: &Path) -> Result<Vec<(PathBuf, String)>> {
    if !root.exists() {
        bail!("Path does not exist: {}", root.display());
    }
    if root.is_file() {
        let name = root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        return Ok(vec![(root.to_path_buf(), name)]);
    }

    let include_set = build_globset(&config.ingest.include_globs)?;
    let mut excludes = vec!["**/.git/**".to_string(), "**/node_modules/**".to_string()];
    excludes.extend(config.ingest.exclude_globs.iter().cloned());
    let exclude_set = build_globset(&excludes)?;

    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(config.ingest.follow_symlinks) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let relative = path
            .strip_prefix(root)
            .unwrap_or(path)
            .to_string_lossy()
            .to_string();
        if exclude_set.is_match(&relative) || !include_set.is_match(&relative) {
            continue;
        }
        files.push((path.to_path_buf(), relative));
    }

    files.sort_by(|a, b| a.1.cmp(&b.1));
    Ok(files)
}

/// Read one file into a document. HTML is reduced to its visible text;
/// Markdown titles come from the first `# ` heading.
pub fn load_document(path: &Path, relative: &str, opts: &IngestOptions) -> Result<DocumentInput> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_else(|| "txt".to_string());
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| relative.to_string());

    let (title, content) = match extension.as_str() {
        "html" | "htm" => {
            let page = extract_page(&raw);
            (page.title.unwrap_or(stem), page.text)
        }
        "md" | "markdown" => {
            let heading = raw
                .lines()
                .map(str::trim)
                .find_map(|l| l.strip_prefix("# "))
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty());
            (heading.unwrap_or(stem), raw)
        }
        _ => (stem, raw),
    };

    Ok(DocumentInput::new(title, content)
        .with_content_type(opts.content_type.clone().unwrap_or(extension))
        .with_owner(opts.owner_id)
        .with_visibility(opts.is_public)
        .with_metadata(serde_json::json!({
            "source": "file",
            "path": relative,
        })))
}

async fn ingest_one(
    kb: &KnowledgeBase,
    path: &Path,
    relative: &str,
    opts: &IngestOptions,
) -> FileResult {
    let mut result = FileResult {
        path: relative.to_string(),
        ok: false,
        content_id: None,
        chunks: 0,
        attempts: 0,
        error: None,
    };

    let doc = match load_document(path, relative, opts) {
        Ok(doc) => doc,
        Err(e) => {
            result.error = Some(format!("{:#}", e));
            return result;
        }
    };

    for attempt in 0..=opts.retries {
        if attempt > 0 {
            tokio::time::sleep(backoff(attempt)).await;
        }
        result.attempts = attempt + 1;
        match kb.put_document(&doc).await {
            Ok(report) => {
                result.ok = true;
                result.content_id = Some(report.content_id);
                result.chunks = report.chunks;
                result.error = None;
                return result;
            }
            Err(e) => {
                tracing::warn!(path = relative, attempt, error = %e, "ingest attempt failed");
                result.error = Some(e.to_string());
            }
        }
    }
    result
}

/// Ingest every file selected under `path`.
pub async fn ingest_path(
    config: &Config,
    kb: &KnowledgeBase,
    path: &Path,
    opts: &IngestOptions,
    progress: &dyn IngestProgressReporter,
) -> Result<BatchReport> {
    progress.report(IngestProgressEvent::Discovering {
        root: path.display().to_string(),
    });
    let files = discover(config, path)?;
    let total = files.len() as u64;

    let mut report = BatchReport {
        files: files.len(),
        ..BatchReport::default()
    };

    for (n, (file, relative)) in files.iter().enumerate() {
        let result = if opts.dry_run {
            match load_document(file, relative, opts) {
                Ok(doc) => FileResult {
                    path: relative.clone(),
                    ok: true,
                    content_id: Some(doc.resolved_content_id()),
                    chunks: brandkb_core::chunk::expected_chunk_count(
                        doc.content.trim().chars().count(),
                        config.chunking.chunk_size,
                        config.chunking.overlap,
                    ),
                    attempts: 0,
                    error: None,
                },
                Err(e) => FileResult {
                    path: relative.clone(),
                    ok: false,
                    content_id: None,
                    chunks: 0,
                    attempts: 0,
                    error: Some(format!("{:#}", e)),
                },
            }
        } else {
            ingest_one(kb, file, relative, opts).await
        };

        if result.ok {
            report.ingested += 1;
            report.chunks += result.chunks;
        } else {
            report.failed += 1;
        }
        report.results.push(result);

        progress.report(IngestProgressEvent::Ingesting {
            n: n as u64 + 1,
            total,
            failed: report.failed as u64,
        });
    }

    tracing::info!(
        files = report.files,
        ingested = report.ingested,
        failed = report.failed,
        chunks = report.chunks,
        "batch ingest complete"
    );
    Ok(report)
}

pub fn print_report(report: &BatchReport, dry_run: bool) {
    println!("ingest{}", if dry_run { " (dry-run)" } else { "" });
    println!("  files: {}", report.files);
    println!("  ingested: {}", report.ingested);
    println!("  chunks: {}", report.chunks);
    println!("  failed: {}", report.failed);
    for r in report.results.iter().filter(|r| !r.ok) {
        println!(
            "    {}: {}",
            r.path,
            r.error.as_deref().unwrap_or("unknown error")
        );
    }
    if report.failed == 0 {
        println!("ok");
    }
}
