// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: CLI entry point for the OpenAMP RPU assist.
// Author: Lukas Bower
#![forbid(unsafe_code)]

//! Load a tree description, run the assist and write the results.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Env;
use log::info;
use serde::Serialize;

use openamp_xlnx::tree::load::{dump_tree, load_tree};
use openamp_xlnx::{xlnx_openamp_rpu, AssistOptions, AssistOutcome};

#[derive(Debug, Parser)]
#[command(author = "Lukas Bower", version, about = "OpenAMP RPU domain resolver", long_about = None)]
struct Cli {
    /// Tree description (TOML, or JSON with a .json extension).
    description: PathBuf,

    /// Domain node to resolve; defaults to the first OpenAMP host domain.
    #[arg(long, default_value = "/domains")]
    target: String,

    /// Write the mutated tree as JSON.
    #[arg(long)]
    tree_out: Option<PathBuf>,

    /// Write the resolved facts as JSON; printed to stdout when omitted.
    #[arg(long)]
    facts_out: Option<PathBuf>,

    /// Increase log verbosity.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    let default_level = if verbose > 0 { "debug" } else { "info" };
    let mut builder = env_logger::Builder::from_env(Env::default().default_filter_or(default_level));
    builder.format_timestamp_millis();
    let _ = builder.try_init();
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut tree = load_tree(&cli.description)?;
    let options = AssistOptions {
        verbose: cli.verbose.max(AssistOptions::default().verbose),
    };

    let outcome = xlnx_openamp_rpu(&cli.target, &mut tree, &options)
        .context("openamp assist failed")?;
    let facts = match outcome {
        AssistOutcome::Resolved(resolution) => {
            info!(
                "openamp-rpu: resolved {} channel(s) for {}",
                resolution.channels.len(),
                resolution.domain
            );
            resolution.facts
        }
        AssistOutcome::NoAmpDomains => {
            info!("openamp-rpu: no OpenAMP host domain in {}", cli.description.display());
            Default::default()
        }
    };

    if let Some(path) = &cli.tree_out {
        write_json(path, &dump_tree(&tree))?;
    }
    match &cli.facts_out {
        Some(path) => write_json(path, &facts)?,
        None => println!("{}", serde_json::to_string_pretty(&facts)?),
    }
    Ok(())
}
