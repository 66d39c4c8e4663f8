//! Operator CLI for context objects, ledgers, and configuration.
//!
//! The symbolic loop itself is a library entry point ([`rlm::symbolic`]); this
//! binary inspects what a run leaves on disk.

use anyhow::{Context, Result, bail};
use clap::{ArgGroup, Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};

use rlm::exit_codes;
use rlm::io::clock::SystemClock;
use rlm::io::config::{RlmConfig, load_config, write_config};
use rlm::io::context_store::{ContextSource, ContextStore, build_context};
use rlm::io::ledger::{LEDGER_FILE, PROJECTION_FILE, load_projection, verify_chain};

const DEFAULT_CONFIG: &str = "rlm.toml";

#[derive(Parser)]
#[command(
    name = "rlm",
    version,
    about = "Budgeted recursive reasoning over large text with an audited ledger"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build and query context objects.
    #[command(subcommand)]
    Context(ContextCommand),
    /// Audit the alignment ledger of a run directory.
    #[command(subcommand)]
    Ledger(LedgerCommand),
    /// Manage the TOML configuration file.
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand)]
enum ContextCommand {
    /// Chunk a source into `<out>/index.json` + `<out>/source.txt`.
    #[command(group(ArgGroup::new("source").required(true).args(["text", "file", "dir"])))]
    Build {
        /// Inline text source.
        #[arg(long)]
        text: Option<String>,
        /// File source.
        #[arg(long)]
        file: Option<PathBuf>,
        /// Existing context directory to import.
        #[arg(long)]
        dir: Option<PathBuf>,
        /// Target context directory.
        #[arg(long)]
        out: PathBuf,
        /// Config file supplying `[chunking]`.
        #[arg(long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,
    },
    /// Print bytes addressed by a chunk pointer.
    Read {
        /// Context directory.
        #[arg(long)]
        dir: PathBuf,
        pointer: String,
        #[arg(long, default_value_t = 0)]
        offset: u64,
        #[arg(long, default_value_t = 4096)]
        bytes: u64,
    },
    /// Print search hits as JSON lines.
    Search {
        /// Context directory.
        #[arg(long)]
        dir: PathBuf,
        query: String,
        #[arg(long, default_value_t = 20)]
        top_k: usize,
        #[arg(long, default_value_t = 160)]
        preview_bytes: usize,
    },
}

#[derive(Subcommand)]
enum LedgerCommand {
    /// Recompute the hash chain; exits non-zero on the first break.
    Verify {
        /// Run directory containing `alignment/`.
        #[arg(long)]
        run_dir: PathBuf,
    },
    /// Print the derived projection.
    Projection {
        /// Run directory containing `alignment/`.
        #[arg(long)]
        run_dir: PathBuf,
    },
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Write a default config file.
    Init {
        #[arg(long, default_value = DEFAULT_CONFIG)]
        path: PathBuf,
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
}

fn main() {
    rlm::logging::init();
    if let Err(err) = run() {
        eprintln!("{:#}", err);
        std::process::exit(exit_codes::INVALID);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Context(command) => run_context(command),
        Command::Ledger(command) => run_ledger(command),
        Command::Config(ConfigCommand::Init { path, force }) => cmd_config_init(&path, force),
    }
}

#[derive(Serialize)]
struct BuildSummary<'a> {
    object_id: &'a str,
    dir: String,
    chunk_count: usize,
    byte_length: u64,
}

fn run_context(command: ContextCommand) -> Result<()> {
    match command {
        ContextCommand::Build {
            text,
            file,
            dir,
            out,
            config,
        } => {
            let cfg = load_config(&config)?;
            let source = match (text, file, dir) {
                (Some(text), _, _) => ContextSource::Text(text),
                (_, Some(file), _) => ContextSource::File(file),
                (_, _, Some(dir)) => ContextSource::Dir(dir),
                (None, None, None) => bail!("one of --text, --file, --dir is required"),
            };
            let object = build_context(&source, &out, &cfg.chunking, &SystemClock)?;
            print_json(&BuildSummary {
                object_id: &object.index.object_id,
                dir: object.dir.display().to_string(),
                chunk_count: object.index.chunks.len(),
                byte_length: object.index.source.byte_length,
            })
        }
        ContextCommand::Read {
            dir,
            pointer,
            offset,
            bytes,
        } => {
            let store = ContextStore::open(&dir)?;
            let span = store.read(&pointer, offset, bytes)?;
            print!("{}", span.text);
            Ok(())
        }
        ContextCommand::Search {
            dir,
            query,
            top_k,
            preview_bytes,
        } => {
            let store = ContextStore::open(&dir)?;
            for hit in store.search(&query, top_k, preview_bytes)? {
                println!(
                    "{}",
                    serde_json::to_string(&hit).context("serialize search hit")?
                );
            }
            Ok(())
        }
    }
}

fn run_ledger(command: LedgerCommand) -> Result<()> {
    match command {
        LedgerCommand::Verify { run_dir } => {
            let path = run_dir.join("alignment").join(LEDGER_FILE);
            let report = verify_chain(&path)?;
            print_json(&report)?;
            if let Some(chain_break) = report.first_break {
                bail!(
                    "ledger chain broken at event {} ({})",
                    chain_break.index,
                    chain_break.idempotency_key
                );
            }
            Ok(())
        }
        LedgerCommand::Projection { run_dir } => {
            let path = run_dir.join("alignment").join(PROJECTION_FILE);
            print_json(&load_projection(&path)?)
        }
    }
}

fn cmd_config_init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_config(path, &RlmConfig::default())?;
    println!("wrote {}", path.display());
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("serialize output")?;
    println!("{text}");
    Ok(())
}
