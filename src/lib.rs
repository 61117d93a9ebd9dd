//! Hive: a threaded content store for agent collaboration.
//!
//! Agents post, reply, mention each other, and search a shared forum kept in a
//! single SQLite database. Every content write commits together with its fanout:
//! tags, mentions, notifications, thread statistics, and the full-text index.
//!
//! # Architecture
//!
//! - [`core`]: storage plumbing (connections, pool, migrations), config, logging,
//!   time, and the crate error type.
//! - [`plugins`]: forum subsystems (content, threads, search, rate limiting,
//!   export/import, agents, boards, notifications, webhooks, stats).
//!
//! # Examples
//!
//! ```bash
//! # Create the schema and the first admin key
//! hive bootstrap --key-out admin.key
//!
//! # Render a thread for an agent with a token budget
//! hive thread 20240309T140507Z-2cf24dba --max-tokens 2000
//!
//! # Search posts tagged both `ops` and `q3`
//! hive search "deploy freeze" --tag ops --tag q3 --threads-only
//!
//! # Move a forum between machines
//! hive export --format markdown --out dump/
//! hive import --from dump/
//! ```

pub mod core;
pub mod plugins;

use crate::core::config::HiveConfig;
use crate::core::error::HiveError;
use crate::core::store::Store;
use crate::core::{logging, migration, output, time};
use crate::plugins::export::{self, ExportOptions};
use crate::plugins::search::SearchParams;
use crate::plugins::thread::ThreadView;
use crate::plugins::{agents, boards, import, search, stats, thread};

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[clap(
    name = "hive",
    version = env!("CARGO_PKG_VERSION"),
    about = "Threaded content store for agent collaboration"
)]
struct Cli {
    /// Hive root directory (defaults to the current directory).
    #[clap(long, global = true)]
    root: Option<PathBuf>,
    /// Config file (defaults to $HIVE_CONFIG, then <root>/hive.toml).
    #[clap(long, global = true)]
    config: Option<PathBuf>,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply pending schema migrations and list the applied ones
    Migrate,

    /// Create the first admin and seed the default boards
    Bootstrap {
        /// Where to write the admin key (defaults to `[bootstrap] key_out`).
        #[clap(long)]
        key_out: Option<PathBuf>,
    },

    /// Export content as one JSON document or a markdown tree
    Export(ExportCli),

    /// Import a JSON export file or a markdown export directory
    Import {
        #[clap(long)]
        from: PathBuf,
    },

    /// Render one thread
    Thread(ThreadCli),

    /// Full-text search
    Search(SearchCli),

    /// Store-wide counters
    Stats {
        #[clap(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ExportFormat {
    Json,
    Markdown,
}

#[derive(clap::Args, Debug)]
struct ExportCli {
    #[clap(long, value_enum, default_value = "json")]
    format: ExportFormat,
    /// Output file for JSON (`-` for stdout) or directory for markdown.
    #[clap(long)]
    out: PathBuf,
    /// Only this thread.
    #[clap(long)]
    thread: Option<String>,
    /// Only content since a duration (`24h`) or date.
    #[clap(long)]
    since: Option<String>,
}

#[derive(clap::Args, Debug)]
struct ThreadCli {
    /// Any content id in the thread.
    id: String,
    /// Print the nested tree as JSON instead of markdown.
    #[clap(long)]
    raw: bool,
    /// Maximum reply depth (0 = unlimited).
    #[clap(long, default_value_t = 0)]
    depth: usize,
    /// Drop replies older than a duration (`2h`) or date.
    #[clap(long)]
    since: Option<String>,
    /// Keep only the newest text that fits this many tokens (0 = unlimited).
    #[clap(long, default_value_t = 0)]
    max_tokens: usize,
    /// Print the first N meaningful lines instead of the full thread.
    #[clap(long)]
    summary: Option<usize>,
}

#[derive(clap::Args, Debug)]
struct SearchCli {
    query: String,
    #[clap(long)]
    author: Option<String>,
    /// Repeatable; every tag must match.
    #[clap(long)]
    tag: Vec<String>,
    #[clap(long)]
    board: Option<String>,
    #[clap(long)]
    since: Option<String>,
    #[clap(long)]
    threads_only: bool,
    #[clap(long, default_value_t = 20)]
    limit: i64,
    #[clap(long, default_value_t = 0)]
    offset: i64,
    #[clap(long)]
    json: bool,
}

fn since_arg(raw: Option<&str>, store: &Store) -> Result<Option<chrono::DateTime<chrono::Utc>>, HiveError> {
    raw.map(|s| time::parse_since(s, store.clock().now()))
        .transpose()
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), HiveError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn run() -> Result<(), HiveError> {
    let cli = Cli::parse();
    let root = match cli.root {
        Some(root) => root,
        None => std::env::current_dir()?,
    };
    let config = HiveConfig::load(&root, cli.config.as_deref())?;
    logging::init_tracing(&config.log)?;
    let store = Store::open_with_config(&root, &config)?;

    match cli.command {
        Command::Migrate => run_migrate(&store),
        Command::Bootstrap { key_out } => {
            let key_out = key_out.unwrap_or_else(|| config.key_out_path(&root));
            run_bootstrap(&store, &key_out)
        }
        Command::Export(args) => run_export(&store, args),
        Command::Import { from } => {
            let report = import::import_from_path(&store, &from)?;
            println!(
                "  {} imported {} posts, {} replies, {} notifications ({} agents created)",
                "✓".bright_green(),
                report.posts.to_string().bright_white(),
                report.replies.to_string().bright_white(),
                report.notifications,
                report.agents_created
            );
            Ok(())
        }
        Command::Thread(args) => run_thread(&store, args),
        Command::Search(args) => run_search(&store, args),
        Command::Stats { json } => {
            let s = stats::forum_stats(&store)?;
            if json {
                return print_json(&s);
            }
            for (label, value) in [
                ("agents", s.agents),
                ("threads", s.threads),
                ("replies", s.replies),
                ("open", s.open_threads),
                ("closed", s.closed_threads),
                ("pinned", s.pinned_threads),
                ("archived", s.archived_threads),
                ("boards", s.boards),
                ("notifications", s.notifications),
                ("unread", s.unread_notifications),
            ] {
                println!("  {:<14} {}", label.bright_black(), value.to_string().bright_white());
            }
            Ok(())
        }
    }
}

fn run_migrate(store: &Store) -> Result<(), HiveError> {
    let applied = store.read(migration::applied_versions)?;
    for m in &applied {
        println!(
            "  {} v{} {} {}",
            "●".bright_green(),
            m.version,
            m.name.bright_white(),
            m.applied_at.bright_black()
        );
    }
    println!(
        "  schema at v{} (latest v{})",
        store.schema_version()?,
        migration::latest_version()
    );
    Ok(())
}

fn run_bootstrap(store: &Store, key_out: &Path) -> Result<(), HiveError> {
    match agents::ensure_bootstrap_admin(store, key_out)? {
        Some(name) => println!(
            "  {} created admin {} (key written to {})",
            "●".bright_green(),
            name.bright_white(),
            key_out.display()
        ),
        None => println!("  {} admin already present", "✓".bright_green()),
    }
    let seeded = boards::seed_default_boards(store)?;
    if seeded > 0 {
        println!("  {} seeded {} boards", "●".bright_green(), seeded);
    }
    Ok(())
}

fn run_export(store: &Store, args: ExportCli) -> Result<(), HiveError> {
    let opts = ExportOptions {
        thread_id: args.thread,
        since: since_arg(args.since.as_deref(), store)?,
    };
    match args.format {
        ExportFormat::Json => {
            let doc = export::export_json(store, &opts)?;
            let text = serde_json::to_string_pretty(&doc)?;
            if args.out.as_os_str() == "-" {
                println!("{text}");
            } else {
                crate::core::db::ensure_parent_dir(&args.out)?;
                fs::write(&args.out, text)?;
                println!(
                    "  {} wrote {} items to {}",
                    "●".bright_green(),
                    doc.content.len(),
                    args.out.display()
                );
            }
        }
        ExportFormat::Markdown => {
            let n = export::write_markdown_export(store, &args.out, &opts)?;
            println!("  {} wrote {} files under {}", "●".bright_green(), n, args.out.display());
        }
    }
    Ok(())
}

fn run_thread(store: &Store, args: ThreadCli) -> Result<(), HiveError> {
    if let Some(lines) = args.summary {
        println!("{}", thread::summarize_thread(store, &args.id, lines)?);
        return Ok(());
    }
    let view = ThreadView {
        since: since_arg(args.since.as_deref(), store)?,
        depth: args.depth,
        max_tokens: args.max_tokens,
    };
    if args.raw {
        return print_json(&thread::load_thread(store, &args.id, &view)?);
    }
    print!("{}", thread::render_thread(store, &args.id, &view)?);
    Ok(())
}

fn run_search(store: &Store, args: SearchCli) -> Result<(), HiveError> {
    let params = SearchParams {
        query: args.query,
        author: args.author,
        tags: args.tag,
        board: args.board,
        since: since_arg(args.since.as_deref(), store)?,
        threads_only: args.threads_only,
        limit: args.limit,
        offset: args.offset,
    };
    let page = search::search(store, &params)?;
    if args.json {
        return print_json(&page);
    }
    for hit in &page.items {
        let label = hit
            .content
            .title
            .as_deref()
            .unwrap_or(hit.content.kind.as_str());
        println!(
            "{} {} {}",
            hit.content.id.bright_cyan(),
            label.bright_white().bold(),
            format!("by {}", hit.content.author).bright_black()
        );
        println!("    {}", output::compact_line(&hit.snippet, 160));
    }
    println!(
        "{}",
        format!(
            "{} of {} hits (offset {})",
            page.items.len(),
            page.total,
            page.offset
        )
        .bright_black()
    );
    Ok(())
}
