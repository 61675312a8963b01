//! Operator commands over whole entries: `get`, `list`, `add`, `delete`,
//! `visibility`, and `owner`.
//!
//! These bypass token scoping. The owner and visibility flags narrow what is
//! shown, but nothing here is reachable from the gateway.

use anyhow::{bail, Context, Result};
use std::path::PathBuf;

use brandkb_core::models::{DocumentInput, EntryDetail, EntryQuery, EntrySummary, Scope};

use crate::app::Services;
use crate::config::Config;
use crate::search::{snippet, ScopeArgs};

pub async fn run_get(config: &Config, content_id: &str, json: bool) -> Result<()> {
    let services = Services::open(config).await?;
    let entry = services
        .kb
        .get_entry(content_id, &Scope::unrestricted())
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entry)?);
    } else {
        print_entry(&entry);
    }

    services.pool.close().await;
    Ok(())
}

fn print_entry(entry: &EntryDetail) {
    let s = &entry.summary;
    println!("--- Entry ---");
    println!("content_id:   {}", s.content_id);
    println!("title:        {}", s.title);
    println!("content_type: {}", s.content_type);
    println!("owner_id:     {}", s.owner_id);
    println!("visibility:   {}", visibility(s.is_public));
    println!("created_at:   {}", s.created_at.format("%Y-%m-%dT%H:%M:%SZ"));
    println!("metadata:     {}", s.metadata);
    println!();

    println!("--- Chunks ({}) ---", entry.chunks.len());
    for chunk in &entry.chunks {
        println!("[chunk {}]", chunk.index);
        println!("{}", chunk.content);
        println!();
    }
}

fn visibility(is_public: bool) -> &'static str {
    if is_public {
        "public"
    } else {
        "private"
    }
}

pub struct ListArgs {
    pub scope: ScopeArgs,
    pub content_type: Option<String>,
    pub search: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

pub async fn run_list(config: &Config, args: ListArgs, json: bool) -> Result<()> {
    if args.limit < 1 || args.offset < 0 {
        bail!("--limit must be at least 1 and --offset non-negative");
    }

    let services = Services::open(config).await?;
    let mut query = EntryQuery::new(args.scope.to_scope());
    query.limit = args.limit;
    query.offset = args.offset;
    query.content_type = args.content_type;
    query.search = args.search;
    let entries = services.kb.list_entries(&query).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else {
        print_entries(&entries);
    }

    services.pool.close().await;
    Ok(())
}

fn print_entries(entries: &[EntrySummary]) {
    if entries.is_empty() {
        println!("No entries.");
        return;
    }
    println!(
        "{:<18} {:<32} {:<12} {:>6} {:>7}  {}",
        "CONTENT_ID", "TITLE", "TYPE", "OWNER", "CHUNKS", "VISIBILITY"
    );
    for e in entries {
        println!(
            "{:<18} {:<32} {:<12} {:>6} {:>7}  {}",
            e.content_id,
            snippet(&e.title, 30),
            e.content_type,
            e.owner_id,
            e.chunk_count,
            visibility(e.is_public)
        );
    }
}

pub struct AddArgs {
    pub title: String,
    /// Read from this file, or from `content` when absent.
    pub file: Option<PathBuf>,
    pub content: Option<String>,
    pub content_type: String,
    pub owner_id: i64,
    pub is_public: bool,
    pub content_id: Option<String>,
}

pub async fn run_add(config: &Config, args: AddArgs) -> Result<()> {
    let content = match (&args.file, args.content) {
        (Some(path), _) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?,
        (None, Some(text)) => text,
        (None, None) => bail!("provide --file or --content"),
    };

    let mut doc = DocumentInput::new(args.title, content)
        .with_content_type(args.content_type)
        .with_owner(args.owner_id)
        .with_visibility(args.is_public);
    if let Some(id) = args.content_id {
        doc = doc.with_content_id(id);
    }

    let services = Services::open(config).await?;
    let report = services.kb.put_document(&doc).await?;
    println!(
        "{} \"{}\" as {} ({} chunks)",
        if report.replaced > 0 { "Replaced" } else { "Added" },
        report.title,
        report.content_id,
        report.chunks
    );

    services.pool.close().await;
    Ok(())
}

pub async fn run_delete(config: &Config, content_id: &str) -> Result<()> {
    let services = Services::open(config).await?;
    let removed = services.kb.delete_document(content_id).await?;
    if removed == 0 {
        println!("No entry with content_id {}.", content_id);
    } else {
        println!("Deleted {} ({} chunks).", content_id, removed);
    }
    services.pool.close().await;
    Ok(())
}

pub async fn run_set_visibility(config: &Config, content_id: &str, is_public: bool) -> Result<()> {
    let services = Services::open(config).await?;
    let updated = services.kb.set_visibility(content_id, is_public).await?;
    println!(
        "{} is now {} ({} chunks).",
        content_id,
        visibility(is_public),
        updated
    );
    services.pool.close().await;
    Ok(())
}

pub async fn run_set_owner(config: &Config, content_id: &str, owner_id: i64) -> Result<()> {
    if owner_id < 0 {
        bail!("owner id must be non-negative");
    }
    let services = Services::open(config).await?;
    let updated = services.kb.set_owner(content_id, owner_id).await?;
    println!(
        "{} now belongs to owner {} ({} chunks).",
        content_id, owner_id, updated
    );
    services.pool.close().await;
    Ok(())
}
