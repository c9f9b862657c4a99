use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    #[default]
    Simple,
    Rolling,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResourceRefs {
    pub elb_name: String,
    pub app_security_group_name: String,
    pub iam_profile_name: String,
    pub vpc_name: String,
    pub app_subnet_name_prefix: String,
    pub sns_alert_name: String,
}

/// Everything one `deploy`/`delete` invocation needs to know about a stack.
#[derive(Clone, Debug, PartialEq)]
pub struct DeploymentConfig {
    pub stack_name: String,
    pub image_id: String,
    pub source_revision: String,
    pub keypair_name: String,
    pub instance_type: String,
    pub autoscaling_min: u32,
    pub autoscaling_max: u32,
    pub strategy: Strategy,
    /// Bootstrap script handed to every instance, already base64-encoded.
    pub user_data: Option<String>,
    pub resources: ResourceRefs,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlarmThresholds {
    pub cpu_up: f64,
    pub cpu_down: f64,
    pub credit: f64,
    /// Free memory, in MB.
    pub mem: f64,
    /// Free disk space, in GB.
    pub disk: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThresholdTable(pub HashMap<String, AlarmThresholds>);

impl Default for ThresholdTable {
    fn default() -> Self {
        let mut rows = HashMap::new();
        rows.insert(
            "t2.medium".to_string(),
            AlarmThresholds {
                cpu_up: 35.0,
                cpu_down: 10.0,
                credit: 55.0,
                mem: 500.0,
                disk: 1.5,
            },
        );
        Self(rows)
    }
}

impl ThresholdTable {
    pub fn get(&self, instance_type: &str) -> Option<AlarmThresholds> {
        self.0.get(instance_type).copied()
    }

    pub fn merge(mut self, overrides: HashMap<String, AlarmThresholds>) -> Self {
        self.0.extend(overrides);
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GroupInstance {
    pub instance_id: String,
    pub healthy: bool,
    pub in_service: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScalableGroup {
    pub name: String,
    pub min_size: u32,
    pub max_size: u32,
    pub desired_capacity: u32,
    pub launch_template_name: Option<String>,
    pub load_balancer_names: Vec<String>,
    pub instances: Vec<GroupInstance>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GroupTag {
    pub key: String,
    pub value: String,
    pub propagate_at_launch: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GroupSpec {
    pub name: String,
    pub min_size: u32,
    pub max_size: u32,
    pub launch_template_name: String,
    pub default_cooldown: u32,
    pub availability_zones: Vec<String>,
    pub subnet_ids: Vec<String>,
    pub load_balancer_names: Vec<String>,
    pub health_check_type: String,
    pub health_check_grace_period: u32,
    pub tags: Vec<GroupTag>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupUpdate {
    pub name: String,
    pub min_size: u32,
    pub max_size: u32,
    pub desired_capacity: Option<u32>,
    pub launch_template_name: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LaunchTemplateSpec {
    pub name: String,
    pub image_id: String,
    pub key_name: String,
    pub security_group_ids: Vec<String>,
    pub instance_type: String,
    pub iam_instance_profile: String,
    pub associate_public_ip_address: bool,
    #[serde(skip_serializing)]
    pub user_data: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScalingPolicySpec {
    pub group_name: String,
    pub policy_name: String,
    pub policy_type: String,
    pub adjustment_type: String,
    pub scaling_adjustment: i32,
    pub cooldown: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScalingPolicy {
    pub group_name: String,
    pub policy_name: String,
    pub policy_arn: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Dimension {
    pub name: String,
    pub value: String,
}

impl Dimension {
    pub fn new(name: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparison {
    GreaterThanThreshold,
    LessThanThreshold,
}

impl Comparison {
    pub fn as_str(&self) -> &'static str {
        match self {
            Comparison::GreaterThanThreshold => "GreaterThanThreshold",
            Comparison::LessThanThreshold => "LessThanThreshold",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricAlarm {
    pub name: String,
    pub description: String,
    pub actions: Vec<String>,
    pub comparison: Comparison,
    pub evaluation_periods: u32,
    pub metric_name: String,
    pub namespace: String,
    pub period: u32,
    pub statistic: String,
    pub threshold: f64,
    pub unit: Option<String>,
    pub dimensions: Vec<Dimension>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InstanceHealth {
    pub instance_id: String,
    pub in_service: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SecurityGroup {
    pub group_id: String,
    pub group_name: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Vpc {
    pub vpc_id: String,
    pub name: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Subnet {
    pub subnet_id: String,
    pub vpc_id: String,
    pub availability_zone: String,
    pub name: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MachineImage {
    pub image_id: String,
    pub name: Option<String>,
    pub creation_date: Option<String>,
}

/// Instance health of a scalable group cross-checked against its load balancer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InstanceCounts {
    pub in_service: usize,
    pub out_of_service: usize,
    pub total: usize,
}

impl std::fmt::Display for InstanceCounts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "InService: {} OutOfService: {}",
            self.in_service, self.out_of_service
        )
    }
}
