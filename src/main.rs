//! reroll CLI - CI test-retry orchestrator.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

use reroll::config::{self, ExecutorConfig};
use reroll::coordinator::Coordinator;
use reroll::env::CiEnvironment;
use reroll::executor::{ProcessExecutor, TestUnit};
use reroll::planner;
use reroll::policy::RetryPolicy;
use reroll::report::{ConsoleReporter, JUnitReporter, MultiReporter};

#[derive(Parser)]
#[command(name = "reroll")]
#[command(about = "CI test-retry orchestrator", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "reroll.toml")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run test units with retry orchestration
    Run {
        /// Qualified unit names to run
        units: Vec<String>,

        /// File with one unit name per line
        #[arg(long)]
        units_file: Option<PathBuf>,

        /// Override the planned fork count
        #[arg(short, long)]
        forks: Option<usize>,

        /// JUnit XML output path
        #[arg(long)]
        junit: Option<PathBuf>,
    },

    /// Validate configuration file
    Validate,

    /// Initialize a new configuration file
    Init,

    /// Print the resolved CI environment
    Env {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Run {
            units,
            units_file,
            forks,
            junit,
        } => run_units(&cli.config, units, units_file, forks, junit, cli.verbose).await,
        Commands::Validate => validate_config(&cli.config),
        Commands::Init => init_config(),
        Commands::Env { format } => print_environment(&format),
    }
}

async fn run_units(
    config_path: &Path,
    unit_names: Vec<String>,
    units_file: Option<PathBuf>,
    forks_override: Option<usize>,
    junit_path: Option<PathBuf>,
    verbose: bool,
) -> Result<()> {
    let config = config::load_config(config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!("Loaded configuration from {}", config_path.display());

    // Environment problems are fatal: the orchestrator cannot shard or
    // decide retries against an unresolved topology.
    let env = CiEnvironment::resolve()?;

    let units = collect_units(unit_names, units_file.as_deref())?;
    if units.is_empty() {
        bail!("no test units specified (pass names or --units-file)");
    }

    let max_forks = planner::compute_max_forks(
        planner::detect_cores(),
        env.agent_count,
        forks_override.or(config.reroll.max_forks),
    );

    let policy = RetryPolicy::for_environment(config.reroll.budget(), &env)
        .performance_run(config.reroll.performance);

    let reporter = create_reporter(&config, junit_path, verbose);

    let ExecutorConfig::Process(exec_cfg) = config.executor;
    let executor = ProcessExecutor::new(exec_cfg).with_properties(env.mirror_properties());

    info!("Using executor: process");

    let coordinator = Coordinator::new(policy, Arc::new(executor), Arc::new(reporter), max_forks);
    let report = coordinator.run(units).await?;

    std::process::exit(report.exit_code());
}

/// Merge positional unit names with a units file, preserving order.
fn collect_units(names: Vec<String>, units_file: Option<&Path>) -> Result<Vec<TestUnit>> {
    let mut units: Vec<TestUnit> = names.into_iter().map(TestUnit::new).collect();

    if let Some(path) = units_file {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read units file: {}", path.display()))?;

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            units.push(TestUnit::new(line));
        }
    }

    Ok(units)
}

fn validate_config(config_path: &Path) -> Result<()> {
    match config::load_config(config_path) {
        Ok(config) => {
            println!("Configuration is valid!");
            println!();
            println!("Settings:");
            println!("  Max retries:  {}", config.reroll.max_retries);
            println!("  Max failures: {}", config.reroll.max_failures);
            println!("  Performance:  {}", config.reroll.performance);
            match config.reroll.max_forks {
                Some(n) => println!("  Max forks:    {}", n),
                None => println!("  Max forks:    (planned from cores/agents)"),
            }

            let ExecutorConfig::Process(p) = &config.executor;
            println!("  Executor:     process");
            println!("  Run command:  {}", p.run_command);

            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    }
}

fn init_config() -> Result<()> {
    let config = r#"# reroll configuration file

[reroll]
max_retries = 1
max_failures = 10

[executor]
type = "process"
# {unit} is replaced with the unit's qualified name
run_command = "scripts/run-suite.sh {unit}"
timeout_secs = 900

[report]
output_dir = "test-results"
junit = true
junit_file = "junit.xml"
"#;

    let path = PathBuf::from("reroll.toml");
    if path.exists() {
        eprintln!("reroll.toml already exists. Remove it first or edit manually.");
        std::process::exit(1);
    }

    std::fs::write(&path, config)?;
    println!("Created reroll.toml");
    println!();
    println!("Edit the configuration as needed, then run:");
    println!("  reroll run billing::InvoiceSuite");

    Ok(())
}

fn print_environment(format: &str) -> Result<()> {
    let env = CiEnvironment::resolve()?;

    match format {
        "json" => {
            let json = serde_json::to_string_pretty(&env)?;
            println!("{}", json);
        }
        _ => {
            println!("CI server:   {}", env.is_ci);
            println!("Agent count: {}", env.agent_count);
            println!("Agent index: {}", env.agent_index);

            if env.mirrors.is_empty() {
                println!("Mirrors:     (none)");
            } else {
                println!("Mirrors:");
                for (key, value) in env.mirror_properties() {
                    println!("  {}={}", key, value);
                }
            }
        }
    }

    Ok(())
}

fn create_reporter(
    config: &config::Config,
    junit_override: Option<PathBuf>,
    verbose: bool,
) -> MultiReporter {
    let mut multi = MultiReporter::new();

    multi = multi.with_reporter(ConsoleReporter::new(verbose));

    if config.report.junit || junit_override.is_some() {
        let junit_path = junit_override
            .unwrap_or_else(|| config.report.output_dir.join(&config.report.junit_file));
        multi = multi.with_reporter(JUnitReporter::new(junit_path));
    }

    multi
}
