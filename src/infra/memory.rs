//! Scripted control plane for tests.
//!
//! Groups converge instantly to their desired capacity unless the plane is
//! "stuck", in which case instances exist but never report in service.
//! Every successful mutating call is written to a journal.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::domain::error::ControlPlaneError;
use crate::domain::model::{
    GroupInstance, GroupSpec, GroupUpdate, InstanceHealth, LaunchTemplateSpec, MachineImage,
    MetricAlarm, ScalableGroup, ScalingPolicy, ScalingPolicySpec, SecurityGroup, Subnet, Vpc,
};
use crate::domain::port::{CallResult, ControlPlane};

struct StoredImage {
    image: MachineImage,
    tags: Vec<(String, String)>,
    available: bool,
}

#[derive(Default)]
struct State {
    groups: Vec<ScalableGroup>,
    created_specs: HashMap<String, GroupSpec>,
    launch_templates: Vec<String>,
    policies: Vec<ScalingPolicy>,
    alarms: Vec<MetricAlarm>,
    topics: Vec<String>,
    security_groups: Vec<SecurityGroup>,
    vpcs: Vec<Vpc>,
    subnets: Vec<Subnet>,
    images: Vec<StoredImage>,
    balancer_overrides: HashMap<(String, String), bool>,
    suspended: HashMap<String, Vec<String>>,
    failures: HashMap<String, VecDeque<ControlPlaneError>>,
    collisions: u32,
    launch_template_lookups: u32,
    journal: Vec<String>,
    stuck: bool,
}

impl State {
    fn fail(&mut self, operation: &str) -> CallResult<()> {
        match self.failures.get_mut(operation).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn materialize(&self, group: &ScalableGroup) -> ScalableGroup {
        let mut group = group.clone();
        group.instances = (1..=group.desired_capacity)
            .map(|n| GroupInstance {
                instance_id: format!("{}-i-{}", group.name, n),
                healthy: !self.stuck,
                in_service: !self.stuck,
            })
            .collect();
        group
    }

    fn group_mut(&mut self, name: &str) -> CallResult<&mut ScalableGroup> {
        self.groups
            .iter_mut()
            .find(|group| group.name == name)
            .ok_or_else(|| not_found("scalable group", name))
    }
}

fn not_found(resource: &'static str, name: &str) -> ControlPlaneError {
    ControlPlaneError::NotFound {
        resource,
        name: name.to_string(),
    }
}

fn service(code: &str, message: String) -> ControlPlaneError {
    ControlPlaneError::Service {
        code: code.to_string(),
        message,
    }
}

#[derive(Default)]
pub struct InMemoryControlPlane {
    state: Mutex<State>,
}

impl InMemoryControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn seed_group(&self, name: &str, load_balancers: &[&str], desired: u32) {
        self.state().groups.push(ScalableGroup {
            name: name.to_string(),
            min_size: 0,
            max_size: desired,
            desired_capacity: desired,
            launch_template_name: None,
            load_balancer_names: load_balancers.iter().map(|lb| lb.to_string()).collect(),
            instances: vec![],
        });
    }

    pub fn seed_launch_template(&self, name: &str) {
        self.state().launch_templates.push(name.to_string());
    }

    pub fn seed_security_group(&self, id: &str, name: &str) {
        self.state().security_groups.push(SecurityGroup {
            group_id: id.to_string(),
            group_name: name.to_string(),
        });
    }

    pub fn seed_vpc(&self, id: &str, name: &str) {
        self.state().vpcs.push(Vpc {
            vpc_id: id.to_string(),
            name: Some(name.to_string()),
        });
    }

    pub fn seed_subnet(&self, id: &str, vpc_id: &str, zone: &str, name: Option<&str>) {
        self.state().subnets.push(Subnet {
            subnet_id: id.to_string(),
            vpc_id: vpc_id.to_string(),
            availability_zone: zone.to_string(),
            name: name.map(str::to_string),
        });
    }

    pub fn seed_image(&self, id: &str, created: &str, tags: &[(String, String)], available: bool) {
        self.state().images.push(StoredImage {
            image: MachineImage {
                image_id: id.to_string(),
                name: None,
                creation_date: Some(created.to_string()),
            },
            tags: tags.to_vec(),
            available,
        });
    }

    pub fn set_balancer_state(&self, load_balancer: &str, instance_id: &str, in_service: bool) {
        self.state().balancer_overrides.insert(
            (load_balancer.to_string(), instance_id.to_string()),
            in_service,
        );
    }

    pub fn set_stuck(&self, stuck: bool) {
        self.state().stuck = stuck;
    }

    pub fn set_desired_capacity_directly(&self, group: &str, capacity: u32) {
        if let Some(group) = self.state().groups.iter_mut().find(|g| g.name == group) {
            group.desired_capacity = capacity;
        }
    }

    /// The next call to `operation` fails with `err`. Queued per operation.
    pub fn fail_next(&self, operation: &str, err: ControlPlaneError) {
        self.state()
            .failures
            .entry(operation.to_string())
            .or_default()
            .push_back(err);
    }

    /// The next `count` launch template lookups report the name as taken.
    pub fn collide_launch_template_names(&self, count: u32) {
        self.state().collisions = count;
    }

    pub fn launch_template_lookups(&self) -> u32 {
        self.state().launch_template_lookups
    }

    pub fn journal(&self) -> Vec<String> {
        self.state().journal.clone()
    }

    pub fn group(&self, name: &str) -> Option<ScalableGroup> {
        let state = self.state();
        state
            .groups
            .iter()
            .find(|group| group.name == name)
            .map(|group| state.materialize(group))
    }

    pub fn group_names(&self) -> Vec<String> {
        let mut names = self
            .state()
            .groups
            .iter()
            .map(|group| group.name.clone())
            .collect::<Vec<_>>();
        names.sort();
        names
    }

    pub fn created_group_spec(&self, name: &str) -> Option<GroupSpec> {
        self.state().created_specs.get(name).cloned()
    }

    pub fn launch_template_names(&self) -> Vec<String> {
        self.state().launch_templates.clone()
    }

    pub fn alarms_named(&self, prefix: &str) -> Vec<MetricAlarm> {
        self.state()
            .alarms
            .iter()
            .filter(|alarm| alarm.name.starts_with(prefix))
            .cloned()
            .collect()
    }

    pub fn policy_names(&self, group: &str) -> Vec<String> {
        let mut names = self
            .state()
            .policies
            .iter()
            .filter(|policy| policy.group_name == group)
            .map(|policy| policy.policy_name.clone())
            .collect::<Vec<_>>();
        names.sort();
        names
    }

    pub fn topic_names(&self) -> Vec<String> {
        self.state().topics.clone()
    }

    pub fn suspended_processes(&self, group: &str) -> Vec<String> {
        self.state().suspended.get(group).cloned().unwrap_or_default()
    }

    pub fn balancer_instances(&self, load_balancer: &str) -> Vec<InstanceHealth> {
        let state = self.state();
        state
            .groups
            .iter()
            .filter(|group| group.load_balancer_names.iter().any(|lb| lb == load_balancer))
            .flat_map(|group| state.materialize(group).instances)
            .map(|instance| InstanceHealth {
                in_service: state
                    .balancer_overrides
                    .get(&(load_balancer.to_string(), instance.instance_id.clone()))
                    .copied()
                    .unwrap_or(!state.stuck),
                instance_id: instance.instance_id,
            })
            .collect()
    }
}

#[async_trait]
impl ControlPlane for InMemoryControlPlane {
    async fn describe_group(&self, name: &str) -> CallResult<Vec<ScalableGroup>> {
        let mut state = self.state();
        state.fail("describe_group")?;
        Ok(state
            .groups
            .iter()
            .filter(|group| group.name == name)
            .map(|group| state.materialize(group))
            .collect())
    }

    async fn list_groups(&self) -> CallResult<Vec<ScalableGroup>> {
        let mut state = self.state();
        state.fail("list_groups")?;
        Ok(state.groups.iter().map(|group| state.materialize(group)).collect())
    }

    async fn create_group(&self, spec: &GroupSpec) -> CallResult<()> {
        let mut state = self.state();
        state.fail("create_group")?;
        if state.groups.iter().any(|group| group.name == spec.name) {
            return Err(service("AlreadyExists", format!("{} already exists", spec.name)));
        }
        if !state.launch_templates.contains(&spec.launch_template_name) {
            return Err(service(
                "ValidationError",
                format!("launch template {} not found", spec.launch_template_name),
            ));
        }
        state.groups.push(ScalableGroup {
            name: spec.name.clone(),
            min_size: spec.min_size,
            max_size: spec.max_size,
            desired_capacity: spec.min_size,
            launch_template_name: Some(spec.launch_template_name.clone()),
            load_balancer_names: spec.load_balancer_names.clone(),
            instances: vec![],
        });
        state.created_specs.insert(spec.name.clone(), spec.clone());
        state.journal.push(format!("create_group {}", spec.name));
        Ok(())
    }

    async fn update_group(&self, update: &GroupUpdate) -> CallResult<()> {
        let mut state = self.state();
        state.fail("update_group")?;
        let group = state.group_mut(&update.name)?;
        group.min_size = update.min_size;
        group.max_size = update.max_size;
        if let Some(desired) = update.desired_capacity {
            group.desired_capacity = desired;
        }
        group.desired_capacity = group.desired_capacity.clamp(group.min_size, group.max_size);
        if let Some(template) = &update.launch_template_name {
            group.launch_template_name = Some(template.clone());
        }
        state.journal.push(format!(
            "update_group {} {} {}",
            update.name, update.min_size, update.max_size
        ));
        Ok(())
    }

    async fn set_desired_capacity(&self, name: &str, capacity: u32) -> CallResult<()> {
        let mut state = self.state();
        state.fail("set_desired_capacity")?;
        let group = state.group_mut(name)?;
        if capacity > group.max_size {
            return Err(service(
                "ValidationError",
                format!("desired capacity {capacity} above max size {}", group.max_size),
            ));
        }
        group.desired_capacity = capacity;
        state.journal.push(format!("set_desired_capacity {name} {capacity}"));
        Ok(())
    }

    async fn suspend_processes(&self, group: &str, processes: &[&str]) -> CallResult<()> {
        let mut state = self.state();
        state.fail("suspend_processes")?;
        state.group_mut(group)?;
        state
            .suspended
            .insert(group.to_string(), processes.iter().map(|p| p.to_string()).collect());
        state.journal.push(format!("suspend_processes {group}"));
        Ok(())
    }

    async fn resume_processes(&self, group: &str, _processes: &[&str]) -> CallResult<()> {
        let mut state = self.state();
        state.fail("resume_processes")?;
        state.group_mut(group)?;
        state.suspended.remove(group);
        state.journal.push(format!("resume_processes {group}"));
        Ok(())
    }

    async fn delete_group(&self, name: &str) -> CallResult<()> {
        let mut state = self.state();
        state.fail("delete_group")?;
        let index = state
            .groups
            .iter()
            .position(|group| group.name == name)
            .ok_or_else(|| not_found("scalable group", name))?;
        if state.groups[index].desired_capacity > 0 {
            return Err(ControlPlaneError::Transient {
                code: "ResourceInUse".to_string(),
                message: format!("{name} still has instances"),
            });
        }
        state.groups.remove(index);
        state.suspended.remove(name);
        state.journal.push(format!("delete_group {name}"));
        Ok(())
    }

    async fn describe_launch_templates(&self, name: &str) -> CallResult<Vec<String>> {
        let mut state = self.state();
        state.fail("describe_launch_templates")?;
        state.launch_template_lookups += 1;
        if state.collisions > 0 {
            state.collisions -= 1;
            return Ok(vec![name.to_string()]);
        }
        Ok(state
            .launch_templates
            .iter()
            .filter(|template| *template == name)
            .cloned()
            .collect())
    }

    async fn create_launch_template(&self, spec: &LaunchTemplateSpec) -> CallResult<()> {
        let mut state = self.state();
        state.fail("create_launch_template")?;
        if state.launch_templates.contains(&spec.name) {
            return Err(service("AlreadyExists", format!("{} already exists", spec.name)));
        }
        state.launch_templates.push(spec.name.clone());
        state.journal.push(format!("create_launch_template {}", spec.name));
        Ok(())
    }

    async fn delete_launch_template(&self, name: &str) -> CallResult<()> {
        let mut state = self.state();
        state.fail("delete_launch_template")?;
        if state
            .groups
            .iter()
            .any(|group| group.launch_template_name.as_deref() == Some(name))
        {
            return Err(service("ResourceInUse", format!("{name} is attached to a group")));
        }
        let index = state
            .launch_templates
            .iter()
            .position(|template| template == name)
            .ok_or_else(|| not_found("launch template", name))?;
        state.launch_templates.remove(index);
        state.journal.push(format!("delete_launch_template {name}"));
        Ok(())
    }

    async fn describe_policies(&self, group: &str) -> CallResult<Vec<ScalingPolicy>> {
        let mut state = self.state();
        state.fail("describe_policies")?;
        Ok(state
            .policies
            .iter()
            .filter(|policy| policy.group_name == group)
            .cloned()
            .collect())
    }

    async fn put_scaling_policy(&self, spec: &ScalingPolicySpec) -> CallResult<String> {
        let mut state = self.state();
        state.fail("put_scaling_policy")?;
        let policy = ScalingPolicy {
            group_name: spec.group_name.clone(),
            policy_name: spec.policy_name.clone(),
            policy_arn: format!("arn:policy:{}", spec.policy_name),
        };
        state
            .policies
            .retain(|existing| existing.policy_name != policy.policy_name);
        state.policies.push(policy.clone());
        state.journal.push(format!("put_scaling_policy {}", spec.policy_name));
        Ok(policy.policy_arn)
    }

    async fn delete_policy(&self, group: &str, policy_name: &str) -> CallResult<()> {
        let mut state = self.state();
        state.fail("delete_policy")?;
        let before = state.policies.len();
        state
            .policies
            .retain(|policy| !(policy.group_name == group && policy.policy_name == policy_name));
        if state.policies.len() == before {
            return Err(not_found("scaling policy", policy_name));
        }
        state.journal.push(format!("delete_policy {policy_name}"));
        Ok(())
    }

    async fn describe_alarms(&self, name_prefix: &str) -> CallResult<Vec<MetricAlarm>> {
        let mut state = self.state();
        state.fail("describe_alarms")?;
        Ok(state
            .alarms
            .iter()
            .filter(|alarm| alarm.name.starts_with(name_prefix))
            .cloned()
            .collect())
    }

    async fn put_metric_alarm(&self, alarm: &MetricAlarm) -> CallResult<()> {
        let mut state = self.state();
        state.fail("put_metric_alarm")?;
        state.alarms.retain(|existing| existing.name != alarm.name);
        state.alarms.push(alarm.clone());
        state.journal.push(format!("put_metric_alarm {}", alarm.name));
        Ok(())
    }

    async fn delete_alarms(&self, names: &[String]) -> CallResult<()> {
        let mut state = self.state();
        state.fail("delete_alarms")?;
        state.alarms.retain(|alarm| !names.contains(&alarm.name));
        state.journal.push(format!("delete_alarms {}", names.join(",")));
        Ok(())
    }

    async fn create_topic(&self, name: &str) -> CallResult<String> {
        let mut state = self.state();
        state.fail("create_topic")?;
        if !state.topics.iter().any(|topic| topic == name) {
            state.topics.push(name.to_string());
        }
        state.journal.push(format!("create_topic {name}"));
        Ok(format!("arn:topic:{name}"))
    }

    async fn describe_security_groups(&self, name: &str) -> CallResult<Vec<SecurityGroup>> {
        let mut state = self.state();
        state.fail("describe_security_groups")?;
        Ok(state
            .security_groups
            .iter()
            .filter(|group| group.group_name == name)
            .cloned()
            .collect())
    }

    async fn describe_vpcs(&self, name: &str) -> CallResult<Vec<Vpc>> {
        let mut state = self.state();
        state.fail("describe_vpcs")?;
        Ok(state
            .vpcs
            .iter()
            .filter(|vpc| vpc.name.as_deref() == Some(name))
            .cloned()
            .collect())
    }

    async fn describe_subnets(&self, vpc_id: &str) -> CallResult<Vec<Subnet>> {
        let mut state = self.state();
        state.fail("describe_subnets")?;
        Ok(state
            .subnets
            .iter()
            .filter(|subnet| subnet.vpc_id == vpc_id)
            .cloned()
            .collect())
    }

    async fn describe_instance_health(&self, load_balancer: &str) -> CallResult<Vec<InstanceHealth>> {
        self.state().fail("describe_instance_health")?;
        Ok(self.balancer_instances(load_balancer))
    }

    async fn describe_images(&self, tags: &[(String, String)]) -> CallResult<Vec<MachineImage>> {
        let mut state = self.state();
        state.fail("describe_images")?;
        Ok(state
            .images
            .iter()
            .filter(|stored| stored.available && tags.iter().all(|tag| stored.tags.contains(tag)))
            .map(|stored| stored.image.clone())
            .collect())
    }
}
