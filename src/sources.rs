//! Filesystem document source.
//!
//! Walks a configured root directory and turns matching files into
//! [`RawDocument`]s for the ingestion pipeline. Content type is inferred
//! from the file extension; include/exclude patterns are glob sets.

use std::path::Path;

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use walkdir::WalkDir;

use crate::config::SourceConfig;
use crate::models::RawDocument;

pub const SOURCE_NAME: &str = "filesystem";

/// Scan the configured root for ingestable documents.
///
/// Results are sorted by `source_id` for deterministic ordering.
pub fn scan(config: &SourceConfig) -> Result<Vec<RawDocument>> {
    let root = &config.root;
    if !root.exists() {
        bail!("Source root does not exist: {}", root.display());
    }

    let include_set = build_globset(&config.include_globs)?;

    let mut default_excludes = vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    default_excludes.extend(config.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    let mut items = Vec::new();

    let walker = WalkDir::new(root).follow_links(config.follow_symlinks);
    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().to_string();

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }

        items.push(file_to_raw_document(path, &rel_str)?);
    }

    items.sort_by(|a, b| a.source_id.cmp(&b.source_id));

    Ok(items)
}

fn file_to_raw_document(path: &Path, relative_path: &str) -> Result<RawDocument> {
    let body = std::fs::read_to_string(path).unwrap_or_default();

    let title = path
        .file_stem()
        .map(|n| n.to_string_lossy().to_string())
        .filter(|t| !t.is_empty());

    Ok(RawDocument {
        source: SOURCE_NAME.to_string(),
        source_id: relative_path.to_string(),
        source_url: Some(format!("file://{}", path.display())),
        title,
        content_type: content_type_for(path).to_string(),
        body,
    })
}

/// Content type from the file extension; unknown extensions are treated as
/// plain text.
pub fn content_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase()
        .as_str()
    {
        "html" | "htm" => "text/html",
        "md" | "markdown" => "text/markdown",
        _ => "text/plain",
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
