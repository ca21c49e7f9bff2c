//! Ellipsoid Stack - declarative provisioning for one deployment topology
//!
//! Declares a private network with a public subnet, a single HTTPS-reachable
//! compute instance, a two-stage delivery pipeline (source fetch and
//! agent-driven deploy with rollback), and a health alarm over an external
//! metric stream, then assembles the whole graph as one named stack.
//!
//! ## Usage
//!
//! ```bash
//! # Assemble the stack for the default environment
//! ellipsoid-stack assemble
//!
//! # Show the creation plan without applying
//! ellipsoid-stack plan
//!
//! # Run one pipeline execution
//! ellipsoid-stack pipeline run
//!
//! # Evaluate the health alarm
//! ellipsoid-stack alarm eval
//!
//! # Tear everything down
//! ellipsoid-stack teardown --yes
//! ```

use anyhow::Result;
use clap::Parser;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

mod assembler;
mod cli;
mod config;
mod models;
mod output;
mod pipeline;
mod provider;
mod provision;
mod state;
mod utils;

use assembler::StackAssembler;
use config::{ConfigFile, EnvConfig, SecretStore, StackConfig};
use output::{OutputFormat, ReportFormatter};
use pipeline::{Deployer, GitHubFetcher, LocalAgent, PipelineExecutor};
use provider::{LocalProvider, Provider};
use provision::{AlarmEvaluator, AlarmState, StoredMetricSource};
use state::{DataPoint, StackState, StateStore};
use utils::{init_logger, LogLevel};

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Args::parse();
    let env = EnvConfig::load();

    let verbose = args.verbose || env.verbose.unwrap_or(false);
    init_logger(if verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    });

    let store = state_store(&env)?;

    match &args.command {
        cli::Command::Assemble(assemble_args) => {
            run_assemble(&args, &env, &store, assemble_args).await?;
        }
        cli::Command::Teardown(teardown_args) => {
            run_teardown(&args, &env, &store, teardown_args).await?;
        }
        cli::Command::Plan(plan_args) => {
            run_plan(&args, &env, &store, plan_args).await?;
        }
        cli::Command::Status(status_args) => {
            run_status(&args, &env, &store, status_args)?;
        }
        cli::Command::Pipeline(pipeline_args) => {
            run_pipeline(&args, &env, &store, pipeline_args).await?;
        }
        cli::Command::Alarm(alarm_args) => {
            run_alarm(&args, &env, &store, alarm_args).await?;
        }
        cli::Command::Config(config_args) => {
            run_config(&args, &env, config_args)?;
        }
        cli::Command::State(state_args) => {
            run_state(&args, &env, &store, state_args)?;
        }
    }

    Ok(())
}

/// Resolve the stack declaration from config file, environment profile, and
/// environment variables
fn load_stack(args: &cli::Args, env: &EnvConfig) -> Result<StackConfig> {
    let config_file = load_config_file(args, env)?;

    let environment = args.env.clone().or_else(|| env.environment.clone());
    let mut stack = config_file.resolve(environment.as_deref())?;
    stack.apply_env(env);

    Ok(stack)
}

fn load_config_file(args: &cli::Args, env: &EnvConfig) -> Result<ConfigFile> {
    let path = args.config.clone().or_else(|| env.config_file.clone());
    match path {
        Some(path) => ConfigFile::load(&path),
        None => ConfigFile::load_default(),
    }
}

fn state_store(env: &EnvConfig) -> Result<StateStore> {
    match &env.state_dir {
        Some(dir) => Ok(StateStore::new(dir)),
        None => StateStore::default_dir(),
    }
}

fn open_provider(store: &StateStore, stack: &StackConfig) -> Result<Arc<LocalProvider>> {
    let state = store
        .load_stack(&stack.stack_name)?
        .unwrap_or_else(|| StackState::new(&stack.stack_name, &stack.account, &stack.region));
    debug!(
        "Opened stack {} with {} recorded resource(s)",
        stack.stack_name,
        state.resources.len()
    );
    Ok(Arc::new(LocalProvider::open(store.clone(), state)))
}

fn formatter(format: &str) -> ReportFormatter {
    ReportFormatter::new(OutputFormat::from_str(format).unwrap_or(OutputFormat::Table))
}

async fn run_assemble(
    args: &cli::Args,
    env: &EnvConfig,
    store: &StateStore,
    assemble_args: &cli::AssembleArgs,
) -> Result<()> {
    let mut stack = load_stack(args, env)?;
    if let Some(account) = &assemble_args.account {
        stack.account = account.clone();
    }
    if let Some(region) = &assemble_args.region {
        stack.region = region.clone();
    }

    let provider = open_provider(store, &stack)?;
    let assembler = StackAssembler::new(stack, provider);

    match assembler.assemble().await {
        Ok(report) => {
            println!("{}", formatter(&assemble_args.format).format_report(&report));
        }
        Err(e) => {
            println!("✗ Assembly failed: {e}");
            std::process::exit(1);
        }
    }

    Ok(())
}

async fn run_teardown(
    args: &cli::Args,
    env: &EnvConfig,
    store: &StateStore,
    teardown_args: &cli::TeardownArgs,
) -> Result<()> {
    let stack = load_stack(args, env)?;

    if !teardown_args.yes {
        println!(
            "This removes every resource of stack '{}'. Re-run with --yes to confirm.",
            stack.stack_name
        );
        return Ok(());
    }

    let provider = open_provider(store, &stack)?;
    let assembler = StackAssembler::new(stack.clone(), provider);

    match assembler.teardown().await {
        Ok(removed) => {
            store.delete_stack(&stack.stack_name)?;
            println!("✓ Removed {removed} resource(s) of stack '{}'", stack.stack_name);
        }
        Err(e) => {
            println!("✗ Teardown failed: {e}");
            std::process::exit(1);
        }
    }

    Ok(())
}

async fn run_plan(
    args: &cli::Args,
    env: &EnvConfig,
    store: &StateStore,
    plan_args: &cli::PlanArgs,
) -> Result<()> {
    let stack = load_stack(args, env)?;
    let provider = open_provider(store, &stack)?;
    let assembler = StackAssembler::new(stack, provider);

    let plan = assembler.plan().await?;
    println!("{}", formatter(&plan_args.format).format_plan(&plan));
    Ok(())
}

fn run_status(
    args: &cli::Args,
    env: &EnvConfig,
    store: &StateStore,
    status_args: &cli::StatusArgs,
) -> Result<()> {
    let stack = load_stack(args, env)?;

    match store.load_stack(&stack.stack_name)? {
        Some(state) => {
            println!("{}", formatter(&status_args.format).format_status(&state));
        }
        None => {
            println!(
                "No state recorded for stack '{}'. Run 'ellipsoid-stack assemble' first.",
                stack.stack_name
            );
        }
    }

    Ok(())
}

async fn run_pipeline(
    args: &cli::Args,
    env: &EnvConfig,
    store: &StateStore,
    pipeline_args: &cli::PipelineArgs,
) -> Result<()> {
    let stack = load_stack(args, env)?;

    match &pipeline_args.action {
        cli::PipelineAction::Run { format } => {
            let provider: Arc<dyn Provider> = open_provider(store, &stack)?;

            let mut secrets = SecretStore::new();
            if let Some(file) = &env.secrets_file {
                secrets = secrets.with_file(file);
            }

            let fetcher = Arc::new(GitHubFetcher::new(store.artifacts_dir()?)?);
            let agent = Arc::new(LocalAgent::new(provider.clone()));
            let alarm = Arc::new(AlarmEvaluator::new(
                stack.alarm.clone(),
                Arc::new(StoredMetricSource::new(store.clone())),
            ));
            let deployer = Deployer::new(
                stack.pipeline.deployment_group.clone(),
                provider,
                agent,
                alarm,
            );
            let executor = PipelineExecutor::new(
                stack.pipeline.clone(),
                fetcher,
                deployer,
                secrets,
                store.clone(),
            );

            // Ctrl-C during the deploy stage requests a stop, which reaches
            // the rollback path.
            let stop = Arc::new(AtomicBool::new(false));
            let stop_signal = stop.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    stop_signal.store(true, Ordering::SeqCst);
                }
            });

            let record = executor.run(stop).await?;
            println!("{}", formatter(format).format_execution(&record));

            if record.status == pipeline::ExecutionStatus::Failed {
                std::process::exit(1);
            }
        }

        cli::PipelineAction::Executions { format, limit } => {
            let mut records = store.list_executions(&stack.pipeline.name)?;
            records.truncate(*limit);

            if records.is_empty() {
                println!("No executions recorded for pipeline '{}'.", stack.pipeline.name);
            } else {
                println!("{}", formatter(format).format_executions(&records));
            }
        }

        cli::PipelineAction::Show { id, format } => {
            match store.load_execution(&stack.pipeline.name, id)? {
                Some(record) => {
                    println!("{}", formatter(format).format_execution(&record));
                }
                None => {
                    println!("Execution '{id}' not found for pipeline '{}'.", stack.pipeline.name);
                }
            }
        }
    }

    Ok(())
}

async fn run_alarm(
    args: &cli::Args,
    env: &EnvConfig,
    store: &StateStore,
    alarm_args: &cli::AlarmArgs,
) -> Result<()> {
    let stack = load_stack(args, env)?;
    let evaluator = AlarmEvaluator::new(
        stack.alarm.clone(),
        Arc::new(StoredMetricSource::new(store.clone())),
    );

    match &alarm_args.action {
        cli::AlarmAction::Eval { format } => {
            let evaluation = evaluator.evaluate()?;
            println!("{}", formatter(format).format_evaluation(&evaluation));

            if evaluation.state == AlarmState::Alarm {
                std::process::exit(1);
            }
        }

        cli::AlarmAction::Watch { iterations } => {
            let table = formatter("table");
            for iteration in 0..*iterations {
                let evaluation = evaluator.evaluate()?;
                print!("{}", table.format_evaluation(&evaluation));

                if iteration + 1 < *iterations {
                    tokio::time::sleep(std::time::Duration::from_secs(stack.alarm.period_secs))
                        .await;
                }
            }
            println!();
        }

        cli::AlarmAction::Record { value } => {
            store.record_data_point(&stack.alarm.metric, DataPoint::now(*value))?;
            println!(
                "✓ Recorded {} on {} at {}",
                value,
                stack.alarm.metric,
                chrono::Utc::now().format("%H:%M:%S UTC")
            );
        }
    }

    Ok(())
}

fn run_config(args: &cli::Args, env: &EnvConfig, config_args: &cli::ConfigArgs) -> Result<()> {
    match &config_args.action {
        cli::ConfigAction::Init { output, force } => {
            let path = Path::new(output);
            if path.exists() && !force {
                anyhow::bail!(
                    "Configuration file already exists: {output}. Use --force to overwrite."
                );
            }

            let config = ConfigFile::default();
            config.save(path)?;
            println!("✓ Configuration file created: {output}");
            println!("\nEdit the file to customize the topology.");
        }

        cli::ConfigAction::Show { env_vars, format } => {
            if *env_vars {
                env.print_summary();
            } else {
                let config = load_config_file(args, env)?;
                let output = if format == "json" {
                    serde_json::to_string_pretty(&config)?
                } else {
                    serde_yaml::to_string(&config)?
                };
                println!("{output}");
            }
        }

        cli::ConfigAction::Validate { file } => {
            let path = file
                .clone()
                .or_else(|| args.config.clone())
                .or_else(|| {
                    ConfigFile::find().map(|p| p.to_string_lossy().to_string())
                })
                .unwrap_or_else(|| "./ellipsoid-stack.yaml".to_string());

            match ConfigFile::load(&path) {
                Ok(_) => {
                    println!("✓ Configuration file is valid: {path}");
                }
                Err(e) => {
                    println!("✗ Configuration file is invalid: {path}");
                    println!("  Error: {e}");
                    return Err(e);
                }
            }
        }

        cli::ConfigAction::Env => {
            config::print_env_help();
        }
    }

    Ok(())
}

fn run_state(
    args: &cli::Args,
    env: &EnvConfig,
    store: &StateStore,
    state_args: &cli::StateArgs,
) -> Result<()> {
    match &state_args.action {
        cli::StateAction::Show { format } => {
            let stack = load_stack(args, env)?;
            match store.load_stack(&stack.stack_name)? {
                Some(state) => {
                    println!("{}", formatter(format).format_status(&state));
                }
                None => {
                    println!("No state recorded for stack '{}'.", stack.stack_name);
                }
            }
        }

        cli::StateAction::Export { output } => {
            let stack = load_stack(args, env)?;
            let state = store.load_stack(&stack.stack_name)?.ok_or_else(|| {
                anyhow::anyhow!("no state recorded for stack '{}'", stack.stack_name)
            })?;

            let path = Path::new(output);
            if path.extension().map(|e| e == "csv").unwrap_or(false) {
                store.export_csv(&state, path)?;
            } else {
                std::fs::write(path, serde_json::to_string_pretty(&state)?)?;
            }
            println!("✓ Exported stack state to: {output}");
        }

        cli::StateAction::List => {
            let stacks = store.list_stacks()?;
            if stacks.is_empty() {
                println!("No stacks recorded.");
            } else {
                println!("Recorded stacks:");
                for name in stacks {
                    println!("  - {name}");
                }
            }
        }
    }

    Ok(())
}
