// src/main.rs

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use feedstock_solvable::config::CheckerConfig;
use feedstock_solvable::repository::ChannelClient;
use feedstock_solvable::virtual_packages::{query_cuda_versions, synthesize};
use feedstock_solvable::worker::{WORKER_SUBCOMMAND, serve};
use feedstock_solvable::{CheckOptions, Channel, Isolation, SolvabilityReport, check_recipe_solvable};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "feedstock-solvable")]
#[command(author, version, about = "Check whether a conda feedstock's requirements are solvable", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check every variant of a feedstock
    Check {
        /// Feedstock directory (holding recipe/ and .ci_support/)
        feedstock: PathBuf,

        /// Extra channel searched before the variant's channels (repeatable)
        #[arg(short = 'c', long = "channel")]
        channels: Vec<String>,

        /// Wall-clock budget in seconds; 0 disables it
        #[arg(long)]
        timeout: Option<u64>,

        /// Build on another platform, as HOST=BUILD (e.g. osx_arm64=osx_64)
        #[arg(long = "build-platform", value_parser = parse_build_platform)]
        build_platforms: Vec<(String, String)>,

        /// Run in a worker thread instead of a child process
        #[arg(long)]
        in_process: bool,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Write the virtual package channel to a directory
    VirtualPackages {
        /// Output directory
        #[arg(long, default_value = "virtual-packages")]
        out: PathBuf,
    },
    /// Serve one check for the parent process (options on stdin)
    #[command(name = WORKER_SUBCOMMAND, hide = true)]
    Worker {
        feedstock: PathBuf,
    },
}

fn parse_build_platform(value: &str) -> std::result::Result<(String, String), String> {
    match value.split_once('=') {
        Some((host, build)) if !host.is_empty() && !build.is_empty() => {
            Ok((host.to_string(), build.to_string()))
        }
        _ => Err(format!("expected HOST=BUILD, got '{value}'")),
    }
}

fn level_for(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "error",
        1 => "warn",
        2 => "info",
        _ => "debug",
    }
}

fn init_logging(verbosity: u8) {
    // Logs go to stderr; stdout carries reports
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level_for(verbosity))),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn print_summary(feedstock: &Path, report: &SolvabilityReport) {
    let verdict = if report.solvable { "solvable" } else { "NOT solvable" };
    println!("{}: {}", feedstock.display(), verdict);
    for (variant, solvable) in &report.solvable_by_variant {
        println!("  {} {}", if *solvable { "ok  " } else { "FAIL" }, variant);
    }
    if !report.errors.is_empty() {
        println!("\nErrors:");
        for error in &report.errors {
            println!("  {error}");
        }
    }
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = cli
        .config
        .as_deref()
        .map(CheckerConfig::load)
        .transpose()?;

    match cli.command {
        Commands::Check {
            feedstock,
            channels,
            timeout,
            build_platforms,
            in_process,
            json,
        } => {
            let mut options = CheckOptions {
                isolation: Isolation::Subprocess,
                ..CheckOptions::default()
            };
            if let Some(config) = &config {
                config.apply_to(&mut options);
            }
            options.additional_channels.extend(channels.iter().map(Channel::new));
            if let Some(secs) = timeout {
                options.timeout = (secs > 0).then(|| Duration::from_secs(secs));
            }
            for (host, build) in &build_platforms {
                options = options.with_build_platform(host, build);
            }
            if in_process {
                options.isolation = Isolation::Thread;
            }
            if cli.verbose > 0 {
                options.verbosity = 1 + cli.verbose;
            }
            init_logging(options.verbosity);

            info!("Checking {}", feedstock.display());
            debug!("Options: {:?}", options);
            let report = check_recipe_solvable(&feedstock, &options);

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_summary(&feedstock, &report);
            }
            Ok(if report.solvable { ExitCode::SUCCESS } else { ExitCode::FAILURE })
        }
        Commands::VirtualPackages { out } => {
            init_logging(1 + cli.verbose);
            let client = ChannelClient::new().context("Failed to create HTTP client")?;
            let repodata = synthesize(query_cuda_versions(&client));
            repodata
                .write(&out)
                .with_context(|| format!("Failed to write virtual packages to {}", out.display()))?;
            println!(
                "Wrote {} virtual packages for {} subdirs to {}",
                repodata.len(),
                repodata.subdirs().len(),
                out.display()
            );
            Ok(ExitCode::SUCCESS)
        }
        Commands::Worker { feedstock } => {
            let mut stdin_options = Vec::new();
            std::io::Read::read_to_end(&mut std::io::stdin(), &mut stdin_options)
                .context("Failed to read worker options")?;
            let verbosity = serde_json::from_slice::<CheckOptions>(&stdin_options)
                .map(|o| o.verbosity)
                .unwrap_or(1);
            init_logging(verbosity.max(cli.verbose));

            let stdout = std::io::stdout();
            serve(&feedstock, stdin_options.as_slice(), stdout.lock())
                .with_context(|| format!("Worker failed for {}", feedstock.display()))?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
