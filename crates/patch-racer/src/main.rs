use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use patch_racer::config::{check_endpoint, parse_gate_args};
use patch_racer::{Credential, JobOrchestrator, JobRequest, RacerConfig, RepoRef, Strategy};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// TOML config file, overlaid on the RACER_* environment
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Race strategies on a repository and open a pull request for the winner
    Run {
        /// `owner/name` or a GitHub clone URL
        #[arg(long)]
        repo: String,

        /// Change request in plain language
        #[arg(long)]
        task: String,

        /// Strategy preset to race (repeatable; default: the configured list)
        #[arg(long = "strategy")]
        strategies: Vec<String>,

        /// Race deadline in seconds
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Validation gate, `name=command` or a bare command (repeatable)
        #[arg(long = "gate")]
        gates: Vec<String>,

        /// Rewrite the task with the generator before planning
        #[arg(long, default_value_t = false)]
        enhance: bool,

        /// Push to a fork of the repository and open the pull request from it
        #[arg(long, default_value_t = false)]
        fork: bool,

        /// Token used for cloning, pushing and the hosting API
        #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
        token: Option<String>,
    },
    /// Check that the generator endpoint answers
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => RacerConfig::load_file(path)?,
        None => RacerConfig::default(),
    };

    match cli.command {
        Command::Check => {
            let url = &config.generator.url;
            if check_endpoint(url).await {
                info!(url = %url, model = %config.generator.model, "generator endpoint reachable");
                Ok(())
            } else {
                bail!("generator endpoint {url} is not reachable")
            }
        }
        Command::Run {
            repo,
            task,
            strategies,
            timeout_secs,
            gates,
            enhance,
            fork,
            token,
        } => {
            let mut config = config;
            if !strategies.is_empty() {
                config.strategies = strategies
                    .iter()
                    .map(|name| {
                        Strategy::preset(name).with_context(|| {
                            format!("unknown strategy '{name}' (expected conservative, balanced or creative)")
                        })
                    })
                    .collect::<Result<_>>()?;
            }
            if let Some(secs) = timeout_secs {
                config.race_timeout_secs = secs;
            }
            if !gates.is_empty() {
                config.gates = parse_gate_args(&gates);
            }
            config.enhance_task |= enhance;
            config.fork |= fork;

            let repo = RepoRef::parse(&repo)?;
            if token.is_none() {
                warn!("GITHUB_TOKEN not set; pushing and opening the pull request will likely fail");
            }
            let request = JobRequest::new(repo, task, token.map(Credential::new));

            let orchestrator = Arc::new(JobOrchestrator::from_config(config)?);
            info!(
                generator = %orchestrator.config().generator.url,
                strategies = orchestrator.config().strategies.len(),
                "patch racer starting"
            );

            let handle = orchestrator.submit(request);
            info!(job = %handle.id(), "job submitted");
            let report = handle.wait().await.context("job task failed")?;

            match report.pull_request() {
                Some(pr) => {
                    println!("{}", pr.url);
                    Ok(())
                }
                None => {
                    println!("{}", serde_json::to_string_pretty(&report.summary())?);
                    std::process::exit(1);
                }
            }
        }
    }
}
