//! CLI argument parsing
//!
//! Defines command-line interface using clap.

use clap::{Parser, Subcommand};

/// Declarative provisioning for the Ellipsoid deployment topology
#[derive(Parser, Debug)]
#[command(name = "ellipsoid-stack")]
#[command(version)]
#[command(about = "Declare, assemble, and operate the Ellipsoid deployment stack")]
#[command(long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Environment profile to resolve (e.g. staging, production)
    #[arg(short, long, global = true)]
    pub env: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Assemble the stack against the target account/region
    Assemble(AssembleArgs),

    /// Tear the whole stack down
    Teardown(TeardownArgs),

    /// Show the dependency-resolved creation order without applying
    Plan(PlanArgs),

    /// Show the assembled stack's resources
    Status(StatusArgs),

    /// Run and inspect pipeline executions
    Pipeline(PipelineArgs),

    /// Evaluate and observe the health alarm
    Alarm(AlarmArgs),

    /// Manage configuration
    Config(ConfigArgs),

    /// Inspect and export persisted stack state
    State(StateArgs),
}

/// Arguments for the assemble command
#[derive(Parser, Debug)]
pub struct AssembleArgs {
    /// Target account identifier override
    #[arg(long)]
    pub account: Option<String>,

    /// Target region override
    #[arg(long)]
    pub region: Option<String>,

    /// Output format (table, json, json-pretty)
    #[arg(short, long, default_value = "table")]
    pub format: String,
}

/// Arguments for the teardown command
#[derive(Parser, Debug)]
pub struct TeardownArgs {
    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

/// Arguments for the plan command
#[derive(Parser, Debug)]
pub struct PlanArgs {
    /// Output format (table, json, json-pretty)
    #[arg(short, long, default_value = "table")]
    pub format: String,
}

/// Arguments for the status command
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Output format (table, json, json-pretty)
    #[arg(short, long, default_value = "table")]
    pub format: String,
}

/// Arguments for pipeline commands
#[derive(Parser, Debug)]
pub struct PipelineArgs {
    #[command(subcommand)]
    pub action: PipelineAction,
}

#[derive(Subcommand, Debug)]
pub enum PipelineAction {
    /// Run one pipeline execution (source fetch, then deploy)
    Run {
        /// Output format (table, json, json-pretty)
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// List recorded executions
    Executions {
        /// Output format (table, json, json-pretty)
        #[arg(short, long, default_value = "table")]
        format: String,

        /// Maximum number of executions to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Show one execution in detail
    Show {
        /// Execution id
        id: String,

        /// Output format (table, json, json-pretty)
        #[arg(short, long, default_value = "table")]
        format: String,
    },
}

/// Arguments for alarm commands
#[derive(Parser, Debug)]
pub struct AlarmArgs {
    #[command(subcommand)]
    pub action: AlarmAction,
}

#[derive(Subcommand, Debug)]
pub enum AlarmAction {
    /// Evaluate the alarm once
    Eval {
        /// Output format (table, json, json-pretty)
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// Evaluate repeatedly on the configured period
    Watch {
        /// Number of evaluations to run
        #[arg(short, long, default_value = "10")]
        iterations: u32,
    },

    /// Record one data point on the monitored metric
    Record {
        /// Observed value
        value: f64,
    },
}

/// Arguments for configuration commands
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Write a configuration file with the default topology
    Init {
        /// Output path
        #[arg(short, long, default_value = "./ellipsoid-stack.yaml")]
        output: String,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Show the resolved configuration
    Show {
        /// Show environment variable overrides instead
        #[arg(long)]
        env_vars: bool,

        /// Output format (yaml, json)
        #[arg(short, long, default_value = "yaml")]
        format: String,
    },

    /// Validate a configuration file
    Validate {
        /// File to validate (defaults to the discovered config)
        #[arg(short, long)]
        file: Option<String>,
    },

    /// Show supported environment variables
    Env,
}

/// Arguments for state commands
#[derive(Parser, Debug)]
pub struct StateArgs {
    #[command(subcommand)]
    pub action: StateAction,
}

#[derive(Subcommand, Debug)]
pub enum StateAction {
    /// Show persisted stack state
    Show {
        /// Output format (table, json, json-pretty)
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// Export the resource inventory
    Export {
        /// Output path; .csv exports CSV, anything else JSON
        output: String,
    },

    /// List stacks with persisted state
    List,
}
