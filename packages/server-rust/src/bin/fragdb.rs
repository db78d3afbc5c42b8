//! `fragdb` command-line gateway.
//!
//! Builds the partition layout from a config file, optionally loads seed
//! data into in-memory partitions, runs one operation through the gateway
//! pipeline and prints the response as JSON.
//!
//! ```bash
//! fragdb --seed seed.json scholarships --department K1 --top 5
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use fragdb_gateway::service::domain::{AdminRequest, ClassRequest, RegistrationRequest, ReportRequest};
use fragdb_gateway::service::OperationError;
use fragdb_gateway::telemetry::{init_tracing, LogFormat};
use fragdb_gateway::{
    build_operation_pipeline, load_seed, GatewayConfig, GatewayContext, Operation, OperationRouter,
    PartitionRegistry, SeedData,
};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

/// Command-line arguments of the `fragdb` binary.
#[derive(Parser, Debug)]
#[command(
    name = "fragdb",
    version,
    about = "Query a department-fragmented database through one gateway"
)]
struct CliArgs {
    /// JSON gateway config. The standard seven-partition layout is used
    /// when absent.
    ///
    /// Environment variable: `FRAGDB_CONFIG`
    #[arg(long, env = "FRAGDB_CONFIG")]
    config: Option<PathBuf>,

    /// JSON seed data loaded into the partitions before the command runs.
    ///
    /// Environment variable: `FRAGDB_SEED`
    #[arg(long, env = "FRAGDB_SEED")]
    seed: Option<PathBuf>,

    /// Log output format (logs go to stderr).
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,

    /// Per-operation timeout override in milliseconds.
    #[arg(long)]
    timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Partition mapping: id, name, table and departments of every partition.
    Topology,
    /// Per-department counts and the total number of registrations.
    Overview,
    /// Class and student counts per department.
    Departments,
    /// Every registration of one student with all three scores.
    StudentScores { student_id: String },
    /// Highest scholarships, optionally within one department.
    Scholarships {
        #[arg(long)]
        department: Option<String>,
        #[arg(long, default_value_t = 0.0)]
        min_amount: f64,
        #[arg(long)]
        top: Option<usize>,
    },
    /// Average scores per subject and department.
    Averages {
        #[arg(long)]
        department: Option<String>,
        #[arg(long)]
        subject: Option<String>,
    },
    /// Registrations averaging below a threshold.
    Failures {
        #[arg(long)]
        threshold: Option<f64>,
        #[arg(long)]
        department: Option<String>,
        #[arg(long)]
        subject: Option<String>,
    },
    /// Score histogram of one subject per department.
    Distribution {
        subject: String,
        #[arg(long)]
        department: Option<String>,
    },
}

impl Command {
    fn into_operation(self, call_id: u64, timeout_ms: u64) -> Operation {
        match self {
            Self::Topology => Operation::admin(call_id, timeout_ms, AdminRequest::Topology),
            Self::Overview => Operation::admin(call_id, timeout_ms, AdminRequest::Overview),
            Self::Departments => Operation::class(call_id, timeout_ms, ClassRequest::Departments),
            Self::StudentScores { student_id } => Operation::registration(
                call_id,
                timeout_ms,
                RegistrationRequest::ScoresOf { student_id },
            ),
            Self::Scholarships {
                department,
                min_amount,
                top,
            } => Operation::report(
                call_id,
                timeout_ms,
                ReportRequest::Scholarships {
                    department,
                    min_amount,
                    top,
                },
            ),
            Self::Averages { department, subject } => Operation::report(
                call_id,
                timeout_ms,
                ReportRequest::Averages {
                    department,
                    subject_id: subject,
                },
            ),
            Self::Failures {
                threshold,
                department,
                subject,
            } => Operation::report(
                call_id,
                timeout_ms,
                ReportRequest::Failures {
                    threshold,
                    department,
                    subject_id: subject,
                },
            ),
            Self::Distribution { subject, department } => Operation::report(
                call_id,
                timeout_ms,
                ReportRequest::Distribution {
                    subject_id: subject,
                    department,
                },
            ),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_tracing(args.log_format)?;

    let config = match &args.config {
        Some(path) => GatewayConfig::from_file(path)?,
        None => GatewayConfig::default(),
    };
    let layout = config.layout().context("building partition layout")?;
    let registry = Arc::new(PartitionRegistry::in_memory(layout)?);
    tracing::info!(
        node_id = %config.node_id,
        partitions = registry.layout().partitions().len(),
        "gateway ready"
    );

    if let Some(path) = &args.seed {
        let seed = SeedData::from_file(path)?;
        load_seed(&registry, &seed, &CancellationToken::new())
            .await
            .with_context(|| format!("loading seed {}", path.display()))?;
    }

    let timeout_ms = args.timeout_ms.unwrap_or(config.default_operation_timeout_ms);
    let ctx = Arc::new(GatewayContext::new(Arc::clone(&registry), Arc::new(config.clone())));
    let pipeline = build_operation_pipeline(OperationRouter::for_gateway(&ctx), &config);

    let response = match pipeline.oneshot(args.command.into_operation(1, timeout_ms)).await {
        Ok(response) => response,
        Err(OperationError::Timeout {
            timeout_ms,
            outcome: Some(outcome),
        }) => {
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            anyhow::bail!("operation timed out after {timeout_ms}ms");
        }
        Err(err) => return Err(err.into()),
    };
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}
