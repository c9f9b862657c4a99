//! One named scalable group, its launch template and its alarms.
//!
//! An environment keeps no state of its own: whether it exists, and at which
//! size, is asked from the control plane on every call.

use itertools::Itertools;
use log::{error, info};
use rand::Rng;

use super::error::{ControlPlaneError, DeployError};
use super::model::{GroupSpec, GroupTag, GroupUpdate, LaunchTemplateSpec, ScalableGroup};
use super::DeployContext;

/// Suspended while the group is reshaped.
const AUTOMATIC_SCALING: &[&str] = &["AlarmNotification"];

/// Undo steps recorded while `create` provisions resources.
#[derive(Debug, Clone, PartialEq)]
enum Compensation {
    DeleteLaunchTemplate(String),
    TearDownGroup,
}

#[derive(Clone)]
pub struct Environment {
    name: String,
    alarm_prefix: String,
    context: DeployContext,
}

impl Environment {
    pub fn new(name: &str, alarm_prefix: &str, context: DeployContext) -> Self {
        Self {
            name: name.to_string(),
            alarm_prefix: alarm_prefix.to_string(),
            context,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn exists(&self) -> Result<bool, DeployError> {
        Ok(self.context.locator.find_group(&self.name).await?.is_some())
    }

    /// Current desired capacity.
    pub async fn size(&self) -> Result<u32, DeployError> {
        Ok(self
            .context
            .locator
            .find_group_required(&self.name)
            .await?
            .desired_capacity)
    }

    /// Provisions launch template, group and alarms, then waits for the minimum
    /// number of healthy instances. Anything created is torn down again if a
    /// step fails or the operator interrupts.
    pub async fn create(&self) -> Result<(), DeployError> {
        let launch_template = self.unique_launch_template_name().await?;
        let mut compensations = Vec::new();

        if let Err(err) = self.provision(&launch_template, &mut compensations).await {
            error!(
                "Rolling back environment {} because of an error: {}",
                self.name, err
            );
            self.roll_back(compensations).await;
            return Err(err);
        }

        info!(
            "Scalable group {} is deployed, with {} healthy instances",
            self.name, self.context.config.autoscaling_min
        );
        Ok(())
    }

    async fn provision(
        &self,
        launch_template: &str,
        compensations: &mut Vec<Compensation>,
    ) -> Result<(), DeployError> {
        self.create_launch_template(launch_template).await?;
        compensations.push(Compensation::DeleteLaunchTemplate(launch_template.to_string()));

        // A rejected create (e.g. the name is taken) leaves nothing of ours to tear
        // down. Only a request that may have reached the service is ambiguous.
        match self.create_group(launch_template).await {
            Ok(()) => compensations.push(Compensation::TearDownGroup),
            Err(err @ DeployError::ControlPlane(ControlPlaneError::Transport(_))) => {
                compensations.push(Compensation::TearDownGroup);
                return Err(err);
            }
            Err(err) => return Err(err),
        }

        self.context
            .alarms
            .apply_configuration(&self.name, &self.alarm_prefix)
            .await?;

        self.wait_for_scale_up(self.context.config.autoscaling_min)
            .await
    }

    async fn roll_back(&self, compensations: Vec<Compensation>) {
        // The operator may have interrupted us, cleanup must still be able to wait.
        let cleanup = Environment {
            context: self.context.uninterruptible(),
            ..self.clone()
        };
        for compensation in compensations.into_iter().rev() {
            let result = match &compensation {
                Compensation::TearDownGroup => cleanup.tear_down_group().await.map(|_| ()),
                Compensation::DeleteLaunchTemplate(name) => {
                    cleanup.delete_launch_template(name).await
                }
            };
            if let Err(err) = result {
                error!(
                    "Rollback step {:?} of {} failed: {}",
                    compensation, self.name, err
                );
            }
        }
    }

    /// Sets the desired capacity, capped at the group's max size, and waits for it.
    pub async fn scale_up(&self, size: u32) -> Result<(), DeployError> {
        let max_size = self
            .context
            .locator
            .find_group_required(&self.name)
            .await?
            .max_size;

        let size = if size > max_size {
            info!("Scaling {} to max size ({})", self.name, max_size);
            max_size
        } else {
            info!("Scaling {} to size {}", self.name, size);
            size
        };

        self.context
            .control_plane
            .set_desired_capacity(&self.name, size)
            .await?;
        self.wait_for_scale_up(size).await
    }

    pub async fn drain(&self) -> Result<(), DeployError> {
        info!("Draining scalable group {}", self.name);
        self.context
            .control_plane
            .update_group(&GroupUpdate {
                name: self.name.clone(),
                min_size: 0,
                max_size: 0,
                desired_capacity: Some(0),
                launch_template_name: None,
            })
            .await?;

        info!("Waiting for scalable group {} to drain", self.name);
        self.context
            .poller
            .await_instance_counts(&self.name, &self.context.config.resources.elb_name, |counts| {
                counts.total == 0
            })
            .await?;
        info!("Scalable group {} has been drained", self.name);
        Ok(())
    }

    /// Swaps the group onto a fresh launch template. Automatic scaling is resumed
    /// whatever happens in between.
    pub async fn update(&self) -> Result<(), DeployError> {
        let old_template = self
            .context
            .locator
            .find_group_required(&self.name)
            .await?
            .launch_template_name;
        let new_template = self.unique_launch_template_name().await?;

        info!(
            "Replacing launch template {:?} of {}",
            old_template, self.name
        );

        let result = self
            .rotate_launch_template(old_template.as_deref(), &new_template)
            .await;
        if result.is_err() {
            self.discard_launch_template(&new_template).await;
        }
        let resumed = self.resume_automatic_scaling().await;

        match (result, resumed) {
            (Err(err), Err(resume_err)) => {
                error!(
                    "Could not resume automatic scaling of {}: {}",
                    self.name, resume_err
                );
                Err(err)
            }
            (Err(err), Ok(())) => Err(err),
            (Ok(()), resumed) => resumed,
        }
    }

    async fn rotate_launch_template(
        &self,
        old_template: Option<&str>,
        new_template: &str,
    ) -> Result<(), DeployError> {
        let config = &self.context.config;
        self.suspend_automatic_scaling().await?;
        self.create_launch_template(new_template).await?;
        self.drain().await?;

        self.context
            .control_plane
            .update_group(&GroupUpdate {
                name: self.name.clone(),
                min_size: config.autoscaling_min,
                max_size: config.autoscaling_max,
                desired_capacity: None,
                launch_template_name: Some(new_template.to_string()),
            })
            .await?;
        info!(
            "Updated scalable group {} to use launch template {}",
            self.name, new_template
        );

        if let Some(old_template) = old_template {
            self.delete_launch_template(old_template).await?;
        }
        self.wait_for_scale_up(config.autoscaling_min).await
    }

    /// Tears the group down if present, then deletes its launch template, or
    /// `fallback_launch_template` when given.
    pub async fn destroy(&self, fallback_launch_template: Option<&str>) -> Result<(), DeployError> {
        let group = self.tear_down_group().await?;

        let launch_template = fallback_launch_template
            .map(str::to_string)
            .or_else(|| group.and_then(|group| group.launch_template_name));
        if let Some(launch_template) = launch_template {
            self.delete_launch_template(&launch_template).await?;
        }
        Ok(())
    }

    async fn tear_down_group(&self) -> Result<Option<ScalableGroup>, DeployError> {
        let Some(group) = self.context.locator.find_group(&self.name).await? else {
            info!("Scalable group {} does not exist, nothing to tear down", self.name);
            return Ok(None);
        };

        self.suspend_automatic_scaling().await?;
        self.context
            .alarms
            .remove_configuration(&self.name, &self.alarm_prefix)
            .await?;
        self.drain().await?;
        self.delete_group().await?;
        Ok(Some(group))
    }

    /// "Does not exist" only counts as success on a retry: it then means an earlier
    /// attempt went through. On the first attempt it is a real failure.
    async fn delete_group(&self) -> Result<(), DeployError> {
        info!("Deleting scalable group {}", self.name);
        let settings = self.context.poller.settings();
        let control_plane = &self.context.control_plane;
        let name = self.name.as_str();

        self.context
            .poller
            .retry_on(
                &format!("delete of scalable group {name}"),
                settings.delete_attempts,
                settings.delete_interval(),
                |err| err.is_transient(),
                |attempt| async move {
                    match control_plane.delete_group(name).await {
                        Err(err) if err.is_not_found() && attempt > 0 => {
                            info!("Scalable group {} already gone", name);
                            Ok(())
                        }
                        result => result,
                    }
                },
            )
            .await?;
        info!("Deleted scalable group {}", self.name);
        Ok(())
    }

    async fn unique_launch_template_name(&self) -> Result<String, DeployError> {
        let base = format!("{}-launch", self.context.config.stack_name);
        loop {
            let suffix: u16 = rand::thread_rng().gen();
            let name = format!("{base}-{suffix:04x}");
            let existing = self
                .context
                .control_plane
                .describe_launch_templates(&name)
                .await?;
            if existing.is_empty() {
                return Ok(name);
            }
            info!("Launch template name {} already exists. Trying another one.", name);
        }
    }

    async fn create_launch_template(&self, name: &str) -> Result<(), DeployError> {
        let config = &self.context.config;
        let security_group = self
            .context
            .locator
            .find_security_group_required(&config.resources.app_security_group_name)
            .await?;

        let spec = LaunchTemplateSpec {
            name: name.to_string(),
            image_id: config.image_id.clone(),
            key_name: config.keypair_name.clone(),
            security_group_ids: vec![security_group.group_id],
            instance_type: config.instance_type.clone(),
            iam_instance_profile: config.resources.iam_profile_name.clone(),
            associate_public_ip_address: true,
            user_data: config.user_data.clone(),
        };
        self.context.control_plane.create_launch_template(&spec).await?;
        info!(
            "Created launch template {}",
            serde_json::to_string_pretty(&spec).unwrap_or_else(|_| name.to_string())
        );
        Ok(())
    }

    async fn delete_launch_template(&self, name: &str) -> Result<(), DeployError> {
        match self.context.control_plane.delete_launch_template(name).await {
            Ok(()) => info!("Deleted launch template {}", name),
            Err(err) if err.is_not_found() => info!("Launch template {} already gone", name),
            Err(err) => return Err(err.into()),
        }
        Ok(())
    }

    /// Best effort: keeps the template if the group already points at it.
    async fn discard_launch_template(&self, name: &str) {
        let in_use = match self.context.locator.find_group(&self.name).await {
            Ok(group) => group
                .is_some_and(|group| group.launch_template_name.as_deref() == Some(name)),
            Err(err) => {
                error!("Could not check launch template {} of {}: {}", name, self.name, err);
                return;
            }
        };
        if in_use {
            return;
        }
        if let Err(err) = self.delete_launch_template(name).await {
            error!("Could not delete unused launch template {}: {}", name, err);
        }
    }

    async fn create_group(&self, launch_template: &str) -> Result<(), DeployError> {
        let config = &self.context.config;
        let resources = &config.resources;
        let vpc = self
            .context
            .locator
            .find_vpc_required(&resources.vpc_name)
            .await?;
        let subnets = self
            .context
            .locator
            .find_subnets_required(&vpc.vpc_id, &resources.app_subnet_name_prefix)
            .await?;

        let spec = GroupSpec {
            name: self.name.clone(),
            min_size: config.autoscaling_min,
            max_size: config.autoscaling_max,
            launch_template_name: launch_template.to_string(),
            default_cooldown: 60,
            availability_zones: subnets
                .iter()
                .map(|subnet| subnet.availability_zone.clone())
                .unique()
                .sorted()
                .collect(),
            subnet_ids: subnets.into_iter().map(|subnet| subnet.subnet_id).collect(),
            load_balancer_names: vec![resources.elb_name.clone()],
            health_check_type: "ELB".to_string(),
            health_check_grace_period: 600,
            tags: vec![
                GroupTag {
                    key: "Name".to_string(),
                    value: format!("{}-instance", self.name),
                    propagate_at_launch: true,
                },
                GroupTag {
                    key: "SourceRevision".to_string(),
                    value: config.source_revision.clone(),
                    propagate_at_launch: true,
                },
            ],
        };
        self.context.control_plane.create_group(&spec).await?;
        info!(
            "Created scalable group {} as {}",
            self.name,
            serde_json::to_string_pretty(&spec).unwrap_or_default()
        );
        Ok(())
    }

    async fn wait_for_scale_up(&self, size: u32) -> Result<(), DeployError> {
        info!(
            "Waiting for scalable group {} to scale up to {} instance(s)",
            self.name, size
        );
        let size = size as usize;
        self.context
            .poller
            .await_instance_counts(&self.name, &self.context.config.resources.elb_name, |counts| {
                counts.in_service >= size
            })
            .await?;
        info!(
            "Scalable group {} has successfully scaled up to {} instance(s)",
            self.name, size
        );
        Ok(())
    }

    async fn suspend_automatic_scaling(&self) -> Result<(), DeployError> {
        self.context
            .control_plane
            .suspend_processes(&self.name, AUTOMATIC_SCALING)
            .await?;
        info!("Suspended {:?} processes for scalable group {}", AUTOMATIC_SCALING, self.name);
        Ok(())
    }

    async fn resume_automatic_scaling(&self) -> Result<(), DeployError> {
        self.context
            .control_plane
            .resume_processes(&self.name, AUTOMATIC_SCALING)
            .await?;
        info!("Resumed {:?} processes for scalable group {}", AUTOMATIC_SCALING, self.name);
        Ok(())
    }
}
