use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use rampart::config::RampartConfig;
use rampart::firewall::{normalize_key, Decision, Firewall, Request, RulesConfig, TracingSink};
use rampart::store::{spawn_janitor, InMemoryStore};

#[derive(Parser, Debug)]
#[command(name = "rampart", version, about = "Request filtering and rate limiting firewall")]
struct Cli {
    /// Configuration file (YAML). `RAMPART__*` environment variables override it.
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Evaluate JSON-lines requests and print one decision per line
    Check {
        /// Rules file; defaults to `rules_path` from the configuration
        #[arg(short, long)]
        rules: Option<String>,

        /// Requests file; reads stdin when omitted
        #[arg(short, long)]
        input: Option<String>,

        /// Print a diagnostics snapshot after the last decision
        #[arg(long)]
        diagnostics: bool,
    },
    /// Load a rules file and report what it contains
    Validate {
        /// Rules file; defaults to `rules_path` from the configuration
        #[arg(short, long)]
        rules: Option<String>,
    },
    /// Print the store-safe form of a key
    Normalize { key: String },
}

#[derive(Serialize)]
struct CheckOutput<'a> {
    line: usize,
    #[serde(flatten)]
    decision: &'a Decision,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = RampartConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    init_tracing(&config);

    match cli.command {
        Command::Check {
            rules,
            input,
            diagnostics,
        } => check(&config, rules, input, diagnostics).await,
        Command::Validate { rules } => validate(&config, rules),
        Command::Normalize { key } => {
            println!("{}", normalize_key(&key));
            Ok(())
        }
    }
}

fn init_tracing(config: &RampartConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    // Decisions go to stdout; keep logs on stderr.
    if config.logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }
}

fn rules_path(config: &RampartConfig, rules: Option<String>) -> anyhow::Result<String> {
    rules
        .or_else(|| config.rules_path.clone())
        .context("No rules file given; pass --rules or set rules_path")
}

fn validate(config: &RampartConfig, rules: Option<String>) -> anyhow::Result<()> {
    let path = rules_path(config, rules)?;
    let rule_set = RulesConfig::from_file(&path)?.build_rule_set()?;

    println!(
        "{}: {} rules (safelist={}, blocklist={}, fail2ban={}, throttle={}, track={})",
        path,
        rule_set.len(),
        rule_set.safelists().len(),
        rule_set.blocklists().len(),
        rule_set.fail2bans().len(),
        rule_set.throttles().len(),
        rule_set.tracks().len(),
    );
    Ok(())
}

async fn check(
    config: &RampartConfig,
    rules: Option<String>,
    input: Option<String>,
    diagnostics: bool,
) -> anyhow::Result<()> {
    let path = rules_path(config, rules)?;
    let rule_set = RulesConfig::from_file(&path)?.build_rule_set()?;
    info!(rules = rule_set.len(), path = %path, "Rules loaded");

    let store = Arc::new(InMemoryStore::new());
    let janitor = spawn_janitor(
        Arc::clone(&store),
        Duration::from_secs(config.store.sweep_interval_secs.max(1)),
    );

    let firewall = Firewall::new(rule_set, store)
        .with_options(config.firewall.clone())
        .with_sink(Arc::new(TracingSink));

    let result = match input {
        Some(file) => {
            let file = tokio::fs::File::open(&file)
                .await
                .with_context(|| format!("Failed to open {}", file))?;
            run_requests(&firewall, BufReader::new(file)).await
        }
        None => run_requests(&firewall, BufReader::new(tokio::io::stdin())).await,
    };
    janitor.abort();
    result?;

    if diagnostics {
        println!(
            "{}",
            serde_json::json!({ "diagnostics": firewall.diagnostics().snapshot() })
        );
    }
    Ok(())
}

async fn run_requests<R>(firewall: &Firewall, reader: R) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut line_no = 0;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }

        let request: Request = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(e) => {
                warn!(line = line_no, error = %e, "Skipping malformed request");
                continue;
            }
        };

        let decision = firewall.decide(&request);
        let output = CheckOutput {
            line: line_no,
            decision: &decision,
        };
        println!("{}", serde_json::to_string(&output)?);
    }

    info!(lines = line_no, "Input exhausted");
    Ok(())
}
