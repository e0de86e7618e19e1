// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! arbor: developer CLI for the Arbor reconciliation engine.
//!
//! `arbor demo <scenario>` runs a scripted scenario against the in-memory host
//! and prints one commit table per step. `arbor config show|init` inspects or
//! writes the engine config the demos run with.

use std::io::Write;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use arbor_core::{ConfigService, EngineConfig, ENGINE_CONFIG_KEY};
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

mod demo;
mod fs_store;
mod report;

use demo::Scenario;
use fs_store::FsConfigStore;

#[derive(Parser, Debug)]
#[command(name = "arbor", author, version, about = "Arbor engine developer CLI")]
struct Args {
    /// Log filter (e.g. `arbor_core=debug`); falls back to `RUST_LOG`, then `warn`
    #[arg(long, global = true)]
    log: Option<String>,
    /// Directory holding `engine.json` (defaults to the platform config dir)
    #[arg(long, global = true, env = "ARBOR_CONFIG_DIR")]
    config_dir: Option<PathBuf>,
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a scripted scenario and print each commit
    Demo {
        /// Scenario to run
        #[arg(value_enum)]
        scenario: Scenario,
        /// Print a JSON summary instead of tables
        #[arg(long)]
        json: bool,
    },
    /// Inspect or write the engine config
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the effective config and where it is read from
    Show,
    /// Write the default config
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn init_tracing(filter: Option<&str>) -> Result<()> {
    let filter = match filter {
        Some(f) => EnvFilter::try_new(f).with_context(|| format!("invalid log filter {f:?}"))?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

fn store(dir: Option<PathBuf>) -> Result<FsConfigStore> {
    match dir {
        Some(dir) => Ok(FsConfigStore::at(dir)),
        None => FsConfigStore::new().context("resolving the config directory"),
    }
}

fn run(args: Args, out: &mut impl Write) -> Result<()> {
    let store = store(args.config_dir)?;
    let path = store.path_for(ENGINE_CONFIG_KEY);
    let service = ConfigService::new(store);
    match args.cmd {
        Command::Demo { scenario, json } => {
            let config = service
                .load_engine()
                .with_context(|| format!("loading {}", path.display()))?;
            debug!(?config, "engine config");
            let demo = demo::run(scenario, config)
                .with_context(|| format!("demo {} failed", scenario.as_str()))?;
            if json {
                writeln!(out, "{}", report::render_json(&demo)?)?;
            } else {
                write!(out, "{}", report::render_text(&demo))?;
            }
        }
        Command::Config {
            action: ConfigAction::Show,
        } => {
            let config = service
                .load_engine()
                .with_context(|| format!("loading {}", path.display()))?;
            write!(out, "{}", report::config_table(&config, &path, path.exists()))?;
        }
        Command::Config {
            action: ConfigAction::Init { force },
        } => {
            if path.exists() && !force {
                bail!("{} already exists (pass --force to overwrite)", path.display());
            }
            service
                .save(ENGINE_CONFIG_KEY, &EngineConfig::default())
                .with_context(|| format!("writing {}", path.display()))?;
            writeln!(out, "wrote {}", path.display())?;
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log.as_deref())?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    run(args, &mut out)
}
