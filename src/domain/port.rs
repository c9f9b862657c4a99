use async_trait::async_trait;

use super::error::ControlPlaneError;
use super::model::{
    GroupSpec, GroupUpdate, InstanceHealth, LaunchTemplateSpec, MachineImage, MetricAlarm,
    ScalableGroup, ScalingPolicy, ScalingPolicySpec, SecurityGroup, Subnet, Vpc,
};

pub type CallResult<T> = Result<T, ControlPlaneError>;

/// Cloud control plane operations the orchestrator relies on.
///
/// Describe calls return every match so callers can tell "none" from "too many".
#[async_trait]
pub trait ControlPlane {
    async fn describe_group(&self, name: &str) -> CallResult<Vec<ScalableGroup>>;

    async fn list_groups(&self) -> CallResult<Vec<ScalableGroup>>;

    async fn create_group(&self, spec: &GroupSpec) -> CallResult<()>;

    async fn update_group(&self, update: &GroupUpdate) -> CallResult<()>;

    async fn set_desired_capacity(&self, group: &str, capacity: u32) -> CallResult<()>;

    async fn suspend_processes(&self, group: &str, processes: &[&str]) -> CallResult<()>;

    async fn resume_processes(&self, group: &str, processes: &[&str]) -> CallResult<()>;

    async fn delete_group(&self, name: &str) -> CallResult<()>;

    async fn describe_launch_templates(&self, name: &str) -> CallResult<Vec<String>>;

    async fn create_launch_template(&self, spec: &LaunchTemplateSpec) -> CallResult<()>;

    async fn delete_launch_template(&self, name: &str) -> CallResult<()>;

    async fn describe_policies(&self, group: &str) -> CallResult<Vec<ScalingPolicy>>;

    /// Returns the policy ARN.
    async fn put_scaling_policy(&self, spec: &ScalingPolicySpec) -> CallResult<String>;

    async fn delete_policy(&self, group: &str, policy_name: &str) -> CallResult<()>;

    async fn describe_alarms(&self, name_prefix: &str) -> CallResult<Vec<MetricAlarm>>;

    async fn put_metric_alarm(&self, alarm: &MetricAlarm) -> CallResult<()>;

    async fn delete_alarms(&self, names: &[String]) -> CallResult<()>;

    /// Creates the topic if needed and returns its ARN.
    async fn create_topic(&self, name: &str) -> CallResult<String>;

    async fn describe_security_groups(&self, name: &str) -> CallResult<Vec<SecurityGroup>>;

    async fn describe_vpcs(&self, name: &str) -> CallResult<Vec<Vpc>>;

    async fn describe_subnets(&self, vpc_id: &str) -> CallResult<Vec<Subnet>>;

    async fn describe_instance_health(&self, load_balancer: &str)
        -> CallResult<Vec<InstanceHealth>>;

    /// Available images carrying every given tag.
    async fn describe_images(&self, tags: &[(String, String)]) -> CallResult<Vec<MachineImage>>;
}

pub type SharedControlPlane = std::sync::Arc<dyn ControlPlane + Send + Sync + 'static>;
