//! `bkb search` and `bkb ask`.
//!
//! Both run through the same retriever the gateway uses, so what an operator
//! sees here is what a token with the equivalent scope would see.

use anyhow::Result;

use brandkb_core::answer::{Answer, AssistantScope};
use brandkb_core::models::Scope;
use brandkb_core::retrieve::Retrieval;

use crate::app::Services;
use crate::config::Config;

/// Which chunks a CLI search may see.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScopeArgs {
    pub owner: Option<i64>,
    pub all: bool,
    pub public_only: bool,
}

impl ScopeArgs {
    pub fn to_scope(self) -> Scope {
        let scope = if self.all {
            Scope::unrestricted()
        } else {
            Scope::for_owner(self.owner)
        };
        if self.public_only {
            scope.public_only()
        } else {
            scope
        }
    }
}

pub async fn run_search(
    config: &Config,
    query: &str,
    scope: ScopeArgs,
    limit: Option<i64>,
    json: bool,
) -> Result<()> {
    if query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }

    let services = Services::open(config).await?;
    let limit = config.retrieval.limits().clamp(limit);
    let retrieval = services
        .retriever
        .retrieve(query, &scope.to_scope(), limit)
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&retrieval.results)?);
    } else {
        print_retrieval(&retrieval);
    }

    services.pool.close().await;
    Ok(())
}

fn print_retrieval(retrieval: &Retrieval) {
    if retrieval.results.is_empty() {
        println!("No results.");
        return;
    }

    for (i, r) in retrieval.results.iter().enumerate() {
        println!(
            "{}. [{:.2}] {} #{} ({}{})",
            i + 1,
            r.score,
            r.chunk.title,
            r.chunk.chunk_index,
            r.chunk.content_type,
            if r.chunk.is_public { "" } else { ", private" }
        );
        println!("    content_id: {}", r.chunk.content_id);
        println!("    {}", snippet(&r.chunk.content, 160));
        println!();
    }
    println!(
        "{} of {} candidates ({})",
        retrieval.results.len(),
        retrieval.considered,
        retrieval.source.as_str()
    );
}

/// First `max` characters of `text` on one line.
pub fn snippet(text: &str, max: usize) -> String {
    let flat: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max {
        return flat;
    }
    let cut: String = flat.chars().take(max).collect();
    format!("{}...", cut.trim_end())
}

pub async fn run_ask(
    config: &Config,
    query: &str,
    member: bool,
    owner: Option<i64>,
    json: bool,
) -> Result<()> {
    let services = Services::open(config).await?;
    let scope = if member {
        AssistantScope::Private
    } else {
        AssistantScope::Public
    };
    let answer = services.composer.answer(query, scope, owner).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&answer)?);
    } else {
        print_answer(&answer);
    }

    services.pool.close().await;
    Ok(())
}

fn print_answer(answer: &Answer) {
    println!("{}", answer.text.trim());
    if let Some(report) = &answer.researched {
        println!();
        println!(
            "Researched \"{}\" ({} chunks, content_id {})",
            report.title, report.chunks, report.content_id
        );
    }
    if !answer.sources.is_empty() {
        println!();
        println!("Sources:");
        for s in &answer.sources {
            println!("  - {} #{} [{:.2}]", s.title, s.chunk_index, s.score);
        }
    }
}
