//! `bkb token ...`: operator management of gateway tokens.
//!
//! The raw secret is printed exactly once, by `issue`. Everything else works
//! from the numeric id.

use anyhow::Result;

use brandkb_core::models::{Permission, TokenInfo, TokenType};
use brandkb_core::tokens::{ActivateOutcome, RevokeOutcome, TokenRequest};

use crate::app::Services;
use crate::config::Config;
use crate::stats::format_ts_relative;

pub struct IssueArgs {
    pub name: String,
    pub token_type: TokenType,
    pub permissions: Vec<Permission>,
    pub expires_in_days: Option<i64>,
    pub created_by: i64,
}

pub async fn run_issue(config: &Config, args: IssueArgs, json: bool) -> Result<()> {
    let services = Services::open(config).await?;
    let issued = services
        .tokens
        .issue(TokenRequest {
            name: args.name,
            token_type: args.token_type,
            permissions: args.permissions,
            expires_in_days: args.expires_in_days,
            created_by: args.created_by,
        })
        .await?;
    let info = services.tokens.get(issued.id).await?;

    if json {
        let body = serde_json::json!({
            "token": info,
            "secret": issued.secret,
        });
        println!("{}", serde_json::to_string_pretty(&body)?);
    } else {
        print_token(&info);
        println!();
        println!("secret:       {}", issued.secret);
        println!();
        println!("Store this secret now. It cannot be shown again.");
    }

    services.pool.close().await;
    Ok(())
}

pub async fn run_list(config: &Config, json: bool) -> Result<()> {
    let services = Services::open(config).await?;
    let tokens = services.tokens.list().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&tokens)?);
    } else if tokens.is_empty() {
        println!("No tokens.");
    } else {
        println!(
            "{:>5}  {:<24} {:<8} {:<14} {:<8} {:<12}  {}",
            "ID", "NAME", "TYPE", "PERMISSION", "ACTIVE", "HASH", "LAST USED"
        );
        for t in &tokens {
            println!(
                "{:>5}  {:<24} {:<8} {:<14} {:<8} {:<12}  {}",
                t.id,
                t.name,
                t.token_type,
                strongest(t),
                if t.is_active { "yes" } else { "no" },
                t.hash_preview,
                last_used(t)
            );
        }
    }

    services.pool.close().await;
    Ok(())
}

pub async fn run_get(config: &Config, id: i64, json: bool) -> Result<()> {
    let services = Services::open(config).await?;
    let info = services.tokens.get(id).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
    } else {
        print_token(&info);
    }
    services.pool.close().await;
    Ok(())
}

pub async fn run_revoke(config: &Config, id: i64) -> Result<()> {
    let services = Services::open(config).await?;
    match services.tokens.revoke(id).await? {
        RevokeOutcome::Revoked => println!("Token {} revoked.", id),
        RevokeOutcome::AlreadyInactive => println!("Token {} was already revoked.", id),
    }
    services.pool.close().await;
    Ok(())
}

pub async fn run_activate(config: &Config, id: i64) -> Result<()> {
    let services = Services::open(config).await?;
    match services.tokens.activate(id).await? {
        ActivateOutcome::Activated => println!("Token {} re-activated.", id),
        ActivateOutcome::AlreadyActive => println!("Token {} is already active.", id),
    }
    services.pool.close().await;
    Ok(())
}

pub async fn run_remove(config: &Config, id: i64) -> Result<()> {
    let services = Services::open(config).await?;
    services.tokens.remove(id).await?;
    println!("Token {} removed.", id);
    services.pool.close().await;
    Ok(())
}

fn strongest(info: &TokenInfo) -> &'static str {
    info.permissions
        .iter()
        .copied()
        .max()
        .map(|p| p.as_str())
        .unwrap_or("-")
}

fn last_used(info: &TokenInfo) -> String {
    info.last_used_at
        .map(|t| format_ts_relative(t.timestamp()))
        .unwrap_or_else(|| "never".to_string())
}

fn print_token(info: &TokenInfo) {
    let permissions: Vec<&str> = info.permissions.iter().map(|p| p.as_str()).collect();
    println!("--- Token ---");
    println!("id:           {}", info.id);
    println!("name:         {}", info.name);
    println!("type:         {}", info.token_type);
    println!("permissions:  {}", permissions.join(", "));
    println!("active:       {}", info.is_active);
    println!("hash:         {}", info.hash_preview);
    println!(
        "expires_at:   {}",
        info.expires_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "never".to_string())
    );
    println!("created_by:   {}", info.created_by);
    println!("created_at:   {}", info.created_at.format("%Y-%m-%d %H:%M"));
    println!("last_used:    {}", last_used(info));
}
