use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::{error, info};

use lambda_deploy::artifact::{ArtifactLocation, ArtifactPublisher};
use lambda_deploy::config::{parse_pair, DeployConfig, Overrides, DEFAULT_REGION};
use lambda_deploy::credentials::CredentialResolver;
use lambda_deploy::local::{LocalCloud, Seed, DEFAULT_ACCOUNT_ID};
use lambda_deploy::reconcile::{Deployer, RunReport, Settings};
use lambda_deploy::DeployResult;

#[derive(Parser)]
#[command(
    name = "lambda-deploy",
    about = "Deploy serverless functions and their triggers from a JSON descriptor"
)]
struct Args {
    /// Deploy descriptor.
    #[arg(long, default_value = "lambda-deploy.json")]
    config: PathBuf,
    /// Provider state file, created on first run.
    #[arg(long, default_value = ".lambda-deploy-state.json")]
    state: PathBuf,
    #[arg(long, default_value = DEFAULT_ACCOUNT_ID)]
    account_id: String,
    /// Overrides the descriptor's region.
    #[arg(long)]
    region: Option<String>,
    /// Overrides the descriptor's function name suffix.
    #[arg(long)]
    suffix: Option<String>,
    #[arg(short, long)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Upload the artifact, create or update functions, reconcile triggers.
    Deploy {
        #[arg(long)]
        force_update: bool,
        /// Pass-through environment variable, KEY=VALUE.
        #[arg(long = "env", value_parser = parse_pair)]
        env: Vec<(String, String)>,
        /// Pass-through variable encrypted with the descriptor's KMS key.
        #[arg(long = "encrypted-env", value_parser = parse_pair)]
        encrypted_env: Vec<(String, String)>,
    },
    /// Remove functions, their triggers and the staged artifact.
    Delete,
    /// Upload new code to existing functions only.
    UpdateCode,
    /// Create tables, streams, queues, bots or keys in the state file so
    /// triggers can resolve them.
    Seed {
        /// DynamoDB table with a change stream.
        #[arg(long = "table")]
        tables: Vec<String>,
        #[arg(long = "kinesis-stream")]
        kinesis_streams: Vec<String>,
        /// Standard SQS queue.
        #[arg(long = "queue")]
        queues: Vec<String>,
        /// Lex bot, created READY.
        #[arg(long = "bot")]
        bots: Vec<String>,
        /// Number of KMS keys to create.
        #[arg(long, default_value_t = 0)]
        kms_keys: usize,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "info,lambda_deploy=debug"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Relative artifact paths are taken from the descriptor's directory.
fn artifact_path(config: &Path, artifact: &Path) -> PathBuf {
    if artifact.is_absolute() {
        return artifact.to_path_buf();
    }
    match config.parent() {
        Some(dir) => dir.join(artifact),
        None => artifact.to_path_buf(),
    }
}

/// `--region`, else the descriptor's region when there is one.
fn seed_region(args: &Args) -> DeployResult<String> {
    if let Some(region) = &args.region {
        return Ok(region.clone());
    }
    if args.config.exists() {
        return Ok(DeployConfig::load(&args.config)?.region);
    }
    Ok(DEFAULT_REGION.to_string())
}

async fn seed(args: &Args, request: &Seed) -> DeployResult<()> {
    let region = seed_region(args)?;
    let cloud = LocalCloud::load(&args.state, &args.account_id, &region)?;
    for line in cloud.seed(request).await {
        println!("{}", line);
    }
    cloud.save(&args.state).await?;
    info!(state = %args.state.display(), "state saved");
    Ok(())
}

#[derive(Clone, Copy)]
enum Action {
    Deploy,
    Delete,
    UpdateCode,
}

/// Runs one command. `seed` only touches the state file and has no report.
async fn run(args: Args) -> DeployResult<Option<RunReport>> {
    let mut overrides = Overrides {
        suffix: args.suffix.clone(),
        region: args.region.clone(),
        ..Overrides::default()
    };
    let action = match &args.command {
        Command::Deploy {
            force_update,
            env,
            encrypted_env,
        } => {
            overrides.force_update = *force_update;
            overrides.pass_through = env.iter().cloned().collect();
            overrides.encrypted = encrypted_env.iter().cloned().collect();
            Action::Deploy
        }
        Command::Delete => Action::Delete,
        Command::UpdateCode => Action::UpdateCode,
        Command::Seed {
            tables,
            kinesis_streams,
            queues,
            bots,
            kms_keys,
        } => {
            let request = Seed {
                tables: tables.clone(),
                kinesis_streams: kinesis_streams.clone(),
                queues: queues.clone(),
                bots: bots.clone(),
                kms_keys: *kms_keys,
            };
            seed(&args, &request).await?;
            return Ok(None);
        }
    };

    let deployment = DeployConfig::load(&args.config)?.resolve(&overrides)?;
    let credentials = CredentialResolver::default().resolve(
        deployment.access_key.as_deref(),
        deployment.secret_key.as_deref(),
    )?;
    info!(source = %credentials.source, access_key = %credentials.access_key_id, "resolved credentials");

    let cloud = LocalCloud::load(&args.state, &args.account_id, &deployment.region)?;
    let clients = cloud.clients();
    let key = deployment.artifact_key();
    let artifact = match action {
        Action::Delete => ArtifactLocation {
            bucket: deployment.bucket.clone(),
            key,
        },
        Action::Deploy | Action::UpdateCode => {
            let path = artifact_path(&args.config, &deployment.artifact);
            ArtifactPublisher::new(clients.s3.as_ref(), &deployment.bucket)
                .ensure_uploaded(&path, &key)
                .await?
        }
    };

    let deployer = Deployer::new(
        clients,
        Settings {
            artifact,
            force_update: deployment.force_update,
            kms_key: deployment.kms_key.clone(),
        },
    );
    let report = match action {
        Action::Deploy => deployer.deploy(&deployment.functions).await,
        Action::Delete => deployer.delete(&deployment.functions).await,
        Action::UpdateCode => deployer.update_code(&deployment.functions).await,
    };

    cloud.save(&args.state).await?;
    Ok(Some(report))
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose);

    match run(args).await {
        Ok(Some(report)) => {
            print!("{}", report);
            if report.has_failures() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            }
        }
        Ok(None) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "run aborted");
            ExitCode::FAILURE
        }
    }
}
