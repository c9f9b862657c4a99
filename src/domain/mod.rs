use std::sync::Arc;

use async_trait::async_trait;
use log::info;

use alarms::AlarmConfigurator;
use deployer::{RollingDeployer, SimpleDeployer};
use error::DeployError;
use locator::ResourceLocator;
use model::{DeploymentConfig, Strategy, ThresholdTable};
use poller::{ConvergencePoller, Interrupt, PollSettings};
use port::SharedControlPlane;

pub mod alarms;
pub mod deployer;
pub mod environment;
pub mod error;
pub mod image;
pub mod locator;
pub mod model;
pub mod poller;
pub mod port;

/// Collaborators shared by every environment and deployer of one invocation.
#[derive(Clone)]
pub struct DeployContext {
    pub config: Arc<DeploymentConfig>,
    pub control_plane: SharedControlPlane,
    pub locator: ResourceLocator,
    pub poller: ConvergencePoller,
    pub alarms: Arc<AlarmConfigurator>,
}

impl DeployContext {
    pub fn new(
        config: DeploymentConfig,
        thresholds: &ThresholdTable,
        control_plane: SharedControlPlane,
        settings: PollSettings,
        interrupt: Interrupt,
    ) -> Result<Self, DeployError> {
        if config.stack_name.is_empty() {
            return Err(DeployError::Configuration("stack name is empty".to_string()));
        }
        if config.autoscaling_min > config.autoscaling_max {
            return Err(DeployError::Configuration(format!(
                "autoscaling_min ({}) is greater than autoscaling_max ({})",
                config.autoscaling_min, config.autoscaling_max
            )));
        }
        let row = thresholds.get(&config.instance_type).ok_or_else(|| {
            DeployError::Configuration(format!(
                "no alarm thresholds for instance type {}",
                config.instance_type
            ))
        })?;

        let locator = ResourceLocator::new(control_plane.clone());
        let poller =
            ConvergencePoller::new(control_plane.clone(), locator.clone(), settings, interrupt);
        let alarms = AlarmConfigurator::new(
            control_plane.clone(),
            &config.stack_name,
            &config.resources.sns_alert_name,
            row,
        );
        Ok(Self {
            config: Arc::new(config),
            control_plane,
            locator,
            poller,
            alarms: Arc::new(alarms),
        })
    }

    pub fn uninterruptible(&self) -> Self {
        Self {
            poller: self.poller.uninterruptible(),
            ..self.clone()
        }
    }
}

#[async_trait]
pub trait Deployer {
    async fn deploy(&self) -> Result<(), DeployError>;

    async fn delete(&self) -> Result<(), DeployError>;
}

/// Entry point: runs the strategy chosen in the stack configuration.
pub struct Deployment {
    deployer: Box<dyn Deployer + Send + Sync + 'static>,
}

impl Deployment {
    pub fn new(context: DeployContext) -> Self {
        let deployer: Box<dyn Deployer + Send + Sync> = match context.config.strategy {
            Strategy::Simple => {
                info!("Chose simple deployment strategy");
                Box::new(SimpleDeployer::new(context))
            }
            Strategy::Rolling => {
                info!("Chose blue/green deployment strategy");
                Box::new(RollingDeployer::new(context))
            }
        };
        Self { deployer }
    }

    pub async fn deploy(&self) -> Result<(), DeployError> {
        self.deployer.deploy().await
    }

    pub async fn delete(&self) -> Result<(), DeployError> {
        self.deployer.delete().await
    }
}
