use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Error};
use clap::{Parser, Subcommand};
use log::{info, warn};

use crate::config::{load_config, AppConfig, Invocation, DEFAULT_CONFIG_FILE};
use crate::domain::image::ImageFinder;
use crate::domain::poller::Interrupt;
use crate::domain::port::SharedControlPlane;
use crate::domain::{DeployContext, Deployment};
use crate::infra::aws::AwsControlPlane;

mod config;
mod domain;
mod infra;

#[derive(Parser)]
#[command(
    name = "fleetcut",
    about = "Zero-downtime deployments of machine images onto auto scaling groups",
    version
)]
struct Cli {
    /// Configuration file, layered under FLEETCUT__* environment variables
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Deploy the image built for a source revision
    #[command(name = "deploy:create")]
    Create {
        environment: String,
        source_revision: String,
        /// Deploy this image instead of looking it up by tags
        #[arg(long)]
        image: Option<String>,
        /// Override the configured stack name
        #[arg(long)]
        stack: Option<String>,
    },
    /// Tear down whatever is deployed for an environment
    #[command(name = "deploy:destroy")]
    Destroy {
        environment: String,
        #[arg(long)]
        stack: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    let base_dir = cli
        .config
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or(Path::new("."))
        .to_path_buf();

    let interrupt = Interrupt::default();
    raise_on_ctrl_c(interrupt.clone());

    let control_plane: SharedControlPlane = Arc::new(AwsControlPlane::connect(&config.aws).await);

    match cli.command {
        Command::Create {
            environment,
            source_revision,
            image,
            stack,
        } => {
            let image_id = match image {
                Some(image_id) => image_id,
                None => {
                    ImageFinder::new(control_plane.clone())
                        .find_latest(&config.image_tags(&source_revision))
                        .await
                        .with_context(|| format!("Can't find an image for {source_revision}"))?
                        .image_id
                }
            };
            let invocation = Invocation {
                environment: &environment,
                source_revision: &source_revision,
                image_id: &image_id,
                stack_override: stack.as_deref(),
            };
            let deployment = deployment(&config, &invocation, &base_dir, control_plane, interrupt)?;
            deployment
                .deploy()
                .await
                .with_context(|| format!("Deployment of {source_revision} to {environment} failed"))?;
            info!("Deployed {} ({}) to {}", source_revision, image_id, environment);
        }
        Command::Destroy { environment, stack } => {
            let invocation = Invocation {
                environment: &environment,
                source_revision: "",
                image_id: "",
                stack_override: stack.as_deref(),
            };
            let deployment = deployment(&config, &invocation, &base_dir, control_plane, interrupt)?;
            deployment
                .delete()
                .await
                .with_context(|| format!("Destroying {environment} failed"))?;
            info!("Destroyed {}", environment);
        }
    }
    Ok(())
}

fn deployment(
    config: &AppConfig,
    invocation: &Invocation,
    base_dir: &Path,
    control_plane: SharedControlPlane,
    interrupt: Interrupt,
) -> Result<Deployment, Error> {
    let deployment_config = config.deployment_config(invocation, base_dir)?;
    info!(
        "Loaded environment {} for stack {}",
        invocation.environment, deployment_config.stack_name
    );
    let context = DeployContext::new(
        deployment_config,
        &config.threshold_table(),
        control_plane,
        config.poll,
        interrupt,
    )
    .context("Invalid deployment configuration")?;
    Ok(Deployment::new(context))
}

/// The running step notices the interrupt on its next poll and rolls back.
/// A second Ctrl-C abandons the rollback and exits at once.
fn raise_on_ctrl_c(interrupt: Interrupt) {
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if interrupt.raise() {
                warn!("Interrupted again, exiting without finishing the rollback");
                std::process::exit(130);
            }
            warn!("Interrupted, rolling back the current step (Ctrl-C again to abort)");
        }
    });
}
