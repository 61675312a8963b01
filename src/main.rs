//! # Brand knowledge base CLI (`bkb`)
//!
//! ```bash
//! bkb --config ./config/bkb.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `bkb init` | Create the SQLite database and run schema migrations |
//! | `bkb ingest <path>` | Ingest a file or directory |
//! | `bkb add --title ...` | Add or replace a single entry |
//! | `bkb get <content_id>` | Show an entry and its chunks |
//! | `bkb list` | List entries |
//! | `bkb delete`, `visibility`, `owner` | Manage an entry |
//! | `bkb search "<query>"` | Similarity search |
//! | `bkb ask "<question>"` | Grounded answer from the assistant |
//! | `bkb token ...` | Issue and manage gateway tokens |
//! | `bkb stats` | Knowledge-base overview |
//! | `bkb serve` | Start the gateway (HTTP + MCP) |

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use brandkb::entries::{AddArgs, ListArgs};
use brandkb::ingest::IngestOptions;
use brandkb::logging::{self, LogFormat};
use brandkb::progress::ProgressMode;
use brandkb::search::ScopeArgs;
use brandkb::token_cmd::IssueArgs;
use brandkb::{config, entries, ingest, migrate, search, server, stats, token_cmd};
use brandkb_core::models::{Permission, TokenType, SHARED_OWNER};

/// Brand knowledge base: chunked retrieval, grounded answers, and a
/// token-scoped MCP gateway.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/bkb.example.toml` for a full example.
#[derive(Parser)]
#[command(name = "bkb", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/bkb.toml")]
    config: PathBuf,

    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Owner and visibility filters shared by read commands.
#[derive(clap::Args, Clone, Copy)]
struct ScopeFlags {
    /// Include this member's private knowledge alongside shared entries.
    #[arg(long)]
    owner: Option<i64>,

    /// Every owner's entries.
    #[arg(long, conflicts_with = "owner")]
    all: bool,

    /// Only public entries.
    #[arg(long)]
    public_only: bool,
}

impl From<ScopeFlags> for ScopeArgs {
    fn from(f: ScopeFlags) -> Self {
        ScopeArgs {
            owner: f.owner,
            all: f.all,
            public_only: f.public_only,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum Visibility {
    Public,
    Private,
}

impl Visibility {
    fn is_public(self) -> bool {
        matches!(self, Visibility::Public)
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ProgressArg {
    Auto,
    Off,
    Human,
    Json,
}

impl ProgressArg {
    fn mode(self) -> ProgressMode {
        match self {
            ProgressArg::Auto => ProgressMode::default_for_tty(),
            ProgressArg::Off => ProgressMode::Off,
            ProgressArg::Human => ProgressMode::Human,
            ProgressArg::Json => ProgressMode::Json,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Ingest a file or every matching file under a directory.
    ///
    /// Each file becomes one entry. HTML is reduced to visible text;
    /// Markdown takes its title from the first heading. Failed files are
    /// retried, then reported and skipped.
    Ingest {
        path: PathBuf,

        /// Owner id; 0 is the shared brand knowledge.
        #[arg(long, default_value_t = SHARED_OWNER)]
        owner: i64,

        #[arg(long, value_enum, default_value = "public")]
        visibility: Visibility,

        /// Content type for every file, instead of the extension.
        #[arg(long)]
        content_type: Option<String>,

        /// Retries per file after the first failure.
        #[arg(long, default_value_t = 2)]
        retries: u32,

        /// Count files and chunks without writing.
        #[arg(long)]
        dry_run: bool,

        #[arg(long, value_enum, default_value = "auto")]
        progress: ProgressArg,

        /// Print the batch report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Add an entry, or replace one when `--content-id` matches.
    Add {
        #[arg(long)]
        title: String,

        /// Read the content from this file.
        #[arg(long, conflicts_with = "content")]
        file: Option<PathBuf>,

        #[arg(long)]
        content: Option<String>,

        #[arg(long, default_value = "post")]
        content_type: String,

        #[arg(long, default_value_t = SHARED_OWNER)]
        owner: i64,

        #[arg(long, value_enum, default_value = "public")]
        visibility: Visibility,

        #[arg(long)]
        content_id: Option<String>,
    },

    /// Show an entry with all its chunks.
    Get {
        content_id: String,
        #[arg(long)]
        json: bool,
    },

    /// List entries, newest first.
    List {
        #[command(flatten)]
        scope: ScopeFlags,

        #[arg(long)]
        content_type: Option<String>,

        /// Substring match over titles and text.
        #[arg(long)]
        search: Option<String>,

        #[arg(long, default_value_t = 20)]
        limit: i64,

        #[arg(long, default_value_t = 0)]
        offset: i64,

        #[arg(long)]
        json: bool,
    },

    /// Delete every chunk of an entry.
    Delete { content_id: String },

    /// Make an entry public or private.
    Visibility {
        content_id: String,
        #[arg(value_enum)]
        visibility: Visibility,
    },

    /// Reassign an entry to another owner (0 for shared).
    Owner { content_id: String, owner: i64 },

    /// Similarity search over chunks.
    Search {
        query: String,

        #[command(flatten)]
        scope: ScopeFlags,

        /// Maximum number of results.
        #[arg(long)]
        limit: Option<i64>,

        #[arg(long)]
        json: bool,
    },

    /// Answer a question from the knowledge base.
    ///
    /// Uses the public assistant and public knowledge unless `--member`
    /// is given. A question starting with `please research this url <url>`
    /// fetches and ingests the page, then summarizes it.
    Ask {
        question: String,

        /// Answer as the member assistant, without the visibility filter.
        #[arg(long)]
        member: bool,

        /// Member whose private knowledge may be cited.
        #[arg(long)]
        owner: Option<i64>,

        #[arg(long)]
        json: bool,
    },

    /// Manage gateway access tokens.
    Token {
        #[command(subcommand)]
        action: TokenAction,
    },

    /// Show knowledge-base statistics.
    Stats {
        #[arg(long)]
        json: bool,
    },

    /// Start the gateway on `[server].bind`.
    Serve,

    /// Print shell completions.
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
enum TokenAction {
    /// Issue a new token. The secret is printed once.
    Issue {
        #[arg(long)]
        name: String,

        /// `public` tokens only see public knowledge.
        #[arg(long = "type", default_value = "public")]
        token_type: TokenType,

        /// `read_kb` or `read_write_kb`; repeatable.
        #[arg(long = "permission", required = true)]
        permissions: Vec<Permission>,

        #[arg(long)]
        expires_in_days: Option<i64>,

        /// Operator id recorded on the token.
        #[arg(long, default_value_t = 0)]
        created_by: i64,

        #[arg(long)]
        json: bool,
    },
    /// List tokens (hash previews only).
    List {
        #[arg(long)]
        json: bool,
    },
    /// Show one token.
    Get {
        id: i64,
        #[arg(long)]
        json: bool,
    },
    /// Deactivate a token.
    Revoke { id: i64 },
    /// Re-activate a revoked token.
    Activate { id: i64 },
    /// Delete a token permanently.
    Remove { id: i64 },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init(if cli.log_json {
        LogFormat::Json
    } else {
        LogFormat::Text
    });

    // Commands that don't require config
    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(shell, &mut cmd, "bkb", &mut std::io::stdout());
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest {
            path,
            owner,
            visibility,
            content_type,
            retries,
            dry_run,
            progress,
            json,
        } => {
            let opts = IngestOptions {
                owner_id: owner,
                is_public: visibility.is_public(),
                content_type,
                retries,
                dry_run,
            };
            let services = brandkb::app::Services::open(&cfg).await?;
            let reporter = progress.mode().reporter();
            let report =
                ingest::ingest_path(&cfg, &services.kb, &path, &opts, reporter.as_ref()).await?;
            services.pool.close().await;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                ingest::print_report(&report, dry_run);
            }
            if report.failed > 0 {
                anyhow::bail!("{} of {} files failed", report.failed, report.files);
            }
        }
        Commands::Add {
            title,
            file,
            content,
            content_type,
            owner,
            visibility,
            content_id,
        } => {
            entries::run_add(
                &cfg,
                AddArgs {
                    title,
                    file,
                    content,
                    content_type,
                    owner_id: owner,
                    is_public: visibility.is_public(),
                    content_id,
                },
            )
            .await?;
        }
        Commands::Get { content_id, json } => {
            entries::run_get(&cfg, &content_id, json).await?;
        }
        Commands::List {
            scope,
            content_type,
            search,
            limit,
            offset,
            json,
        } => {
            entries::run_list(
                &cfg,
                ListArgs {
                    scope: scope.into(),
                    content_type,
                    search,
                    limit,
                    offset,
                },
                json,
            )
            .await?;
        }
        Commands::Delete { content_id } => {
            entries::run_delete(&cfg, &content_id).await?;
        }
        Commands::Visibility {
            content_id,
            visibility,
        } => {
            entries::run_set_visibility(&cfg, &content_id, visibility.is_public()).await?;
        }
        Commands::Owner { content_id, owner } => {
            entries::run_set_owner(&cfg, &content_id, owner).await?;
        }
        Commands::Search {
            query,
            scope,
            limit,
            json,
        } => {
            search::run_search(&cfg, &query, scope.into(), limit, json).await?;
        }
        Commands::Ask {
            question,
            member,
            owner,
            json,
        } => {
            search::run_ask(&cfg, &question, member, owner, json).await?;
        }
        Commands::Token { action } => match action {
            TokenAction::Issue {
                name,
                token_type,
                permissions,
                expires_in_days,
                created_by,
                json,
            } => {
                token_cmd::run_issue(
                    &cfg,
                    IssueArgs {
                        name,
                        token_type,
                        permissions,
                        expires_in_days,
                        created_by,
                    },
                    json,
                )
                .await?;
            }
            TokenAction::List { json } => token_cmd::run_list(&cfg, json).await?,
            TokenAction::Get { id, json } => token_cmd::run_get(&cfg, id, json).await?,
            TokenAction::Revoke { id } => token_cmd::run_revoke(&cfg, id).await?,
            TokenAction::Activate { id } => token_cmd::run_activate(&cfg, id).await?,
            TokenAction::Remove { id } => token_cmd::run_remove(&cfg, id).await?,
        },
        Commands::Stats { json } => {
            stats::run_stats(&cfg, json).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Completions { .. } => {
            // Handled above (before config loading)
            unreachable!()
        }
    }

    Ok(())
}
