use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Error};
use base64::{engine::general_purpose::STANDARD, Engine};
use config::{Config, File, FileFormat};
use itertools::Itertools;
use rand::Rng;
use serde::Deserialize;

use crate::domain::model::{AlarmThresholds, DeploymentConfig, ResourceRefs, Strategy, ThresholdTable};
use crate::domain::poller::PollSettings;

pub const DEFAULT_CONFIG_FILE: &str = "fleetcut.toml";

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AwsSettings {
    /// Falls back to the SDK's own region resolution when unset.
    pub region: Option<String>,
    pub retry_limit: u32,
    /// Role assumed on top of the default credentials, e.g. to deploy into another account.
    pub role_arn: Option<String>,
    /// `{random}` is replaced by 8 hex digits.
    pub role_session_name: String,
}

impl Default for AwsSettings {
    fn default() -> Self {
        Self {
            region: None,
            retry_limit: 5,
            role_arn: None,
            role_session_name: "fleetcut-{random}".to_string(),
        }
    }
}

impl AwsSettings {
    pub fn session_name(&self) -> String {
        let random: u32 = rand::thread_rng().gen();
        self.role_session_name.replace("{random}", &format!("{random:08x}"))
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FinderConfig {
    pub tags: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct EnvironmentConfig {
    pub stack_name: String,
    #[serde(default)]
    pub deployment_strategy: Strategy,
    pub keypair_name: String,
    pub instance_type: String,
    pub autoscaling_min: u32,
    pub autoscaling_max: u32,
    /// Path to the bootstrap script, relative paths resolve against the config file.
    #[serde(default)]
    pub user_data: Option<PathBuf>,
    pub resources: ResourceRefs,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub aws: AwsSettings,
    pub poll: PollSettings,
    pub finder: FinderConfig,
    pub thresholds: HashMap<String, AlarmThresholds>,
    pub environments: HashMap<String, EnvironmentConfig>,
}

/// What the command line contributes on top of the configured environment.
#[derive(Debug, Clone)]
pub struct Invocation<'a> {
    pub environment: &'a str,
    pub source_revision: &'a str,
    pub image_id: &'a str,
    pub stack_override: Option<&'a str>,
}

impl AppConfig {
    pub fn threshold_table(&self) -> ThresholdTable {
        ThresholdTable::default().merge(self.thresholds.clone())
    }

    pub fn environment(&self, name: &str) -> Result<&EnvironmentConfig, Error> {
        self.environments.get(name).ok_or_else(|| {
            anyhow!(
                "Unknown environment {}, known environments are [{}]",
                name,
                self.environments.keys().sorted().join(", ")
            )
        })
    }

    /// Finder tags for `source_revision`: the configured ones plus `source_revision` itself.
    pub fn image_tags(&self, source_revision: &str) -> Vec<(String, String)> {
        self.finder
            .tags
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .chain([("source_revision".to_string(), source_revision.to_string())])
            .sorted()
            .collect()
    }

    pub fn deployment_config(
        &self,
        invocation: &Invocation,
        base_dir: &Path,
    ) -> Result<DeploymentConfig, Error> {
        let environment = self.environment(invocation.environment)?;
        let user_data = environment
            .user_data
            .as_ref()
            .map(|path| read_user_data(&base_dir.join(path)))
            .transpose()?;

        Ok(DeploymentConfig {
            stack_name: invocation
                .stack_override
                .unwrap_or(&environment.stack_name)
                .to_string(),
            image_id: invocation.image_id.to_string(),
            source_revision: invocation.source_revision.to_string(),
            keypair_name: environment.keypair_name.clone(),
            instance_type: environment.instance_type.clone(),
            autoscaling_min: environment.autoscaling_min,
            autoscaling_max: environment.autoscaling_max,
            strategy: environment.deployment_strategy,
            user_data,
            resources: environment.resources.clone(),
        })
    }
}

fn read_user_data(path: &Path) -> Result<String, Error> {
    let script = std::fs::read(path)
        .with_context(|| format!("Can't read user data from {}", path.display()))?;
    Ok(STANDARD.encode(script))
}

pub fn load_config(path: &Path) -> Result<AppConfig, Error> {
    let config = Config::builder()
        .add_source(
            File::from(path.to_path_buf())
                .format(FileFormat::Toml)
                .required(false),
        )
        .add_source(
            config::Environment::with_prefix("FLEETCUT")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .context("Can't load configuration")?;

    config
        .try_deserialize()
        .context("Can't deserialize AppConfig from loaded configuration")
}
