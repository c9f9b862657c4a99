use std::error::Error;
use std::fmt::Debug;

use async_trait::async_trait;
use aws_config::retry::RetryConfig;
use aws_config::sts::AssumeRoleProvider;
use aws_config::{BehaviorVersion, ConfigLoader, Region};
use aws_sdk_autoscaling::error::{BuildError, DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_autoscaling::types::{
    AutoScalingGroup, LaunchTemplateSpecification, LifecycleState, Tag as GroupTagRequest,
};
use aws_sdk_cloudwatch::types::{
    ComparisonOperator, Dimension as AlarmDimension, StandardUnit, Statistic,
};
use aws_sdk_ec2::types::{
    Filter, InstanceType, LaunchTemplateIamInstanceProfileSpecificationRequest,
    LaunchTemplateInstanceNetworkInterfaceSpecificationRequest, RequestLaunchTemplateData,
    Tag as Ec2Tag,
};
use log::{debug, info};

use crate::config::AwsSettings;
use crate::domain::error::ControlPlaneError;
use crate::domain::model::{
    Comparison, Dimension, GroupInstance, GroupSpec, GroupUpdate, InstanceHealth,
    LaunchTemplateSpec, MachineImage, MetricAlarm, ScalableGroup, ScalingPolicy,
    ScalingPolicySpec, SecurityGroup, Subnet, Vpc,
};
use crate::domain::port::{CallResult, ControlPlane};

/// [`ControlPlane`] backed by AutoScaling, EC2, CloudWatch, classic ELB and SNS.
pub struct AwsControlPlane {
    autoscaling: aws_sdk_autoscaling::Client,
    ec2: aws_sdk_ec2::Client,
    cloudwatch: aws_sdk_cloudwatch::Client,
    elb: aws_sdk_elasticloadbalancing::Client,
    sns: aws_sdk_sns::Client,
}

impl AwsControlPlane {
    /// Credentials come from the default provider chain, through `role_arn` when set.
    pub async fn connect(settings: &AwsSettings) -> Self {
        let mut loader = config_loader(settings);
        if let Some(role_arn) = &settings.role_arn {
            let session_name = settings.session_name();
            info!("Assuming role {} as session {}", role_arn, session_name);
            let base = loader.load().await;
            let provider = AssumeRoleProvider::builder(role_arn)
                .session_name(session_name)
                .configure(&base)
                .build()
                .await;
            loader = config_loader(settings).credentials_provider(provider);
        }
        let config = loader.load().await;
        info!(
            "Connected to AWS in region {}",
            config.region().map(|region| region.as_ref()).unwrap_or("<default>")
        );

        Self {
            autoscaling: aws_sdk_autoscaling::Client::new(&config),
            ec2: aws_sdk_ec2::Client::new(&config),
            cloudwatch: aws_sdk_cloudwatch::Client::new(&config),
            elb: aws_sdk_elasticloadbalancing::Client::new(&config),
            sns: aws_sdk_sns::Client::new(&config),
        }
    }
}

fn config_loader(settings: &AwsSettings) -> ConfigLoader {
    let loader = aws_config::defaults(BehaviorVersion::latest())
        .retry_config(RetryConfig::standard().with_max_attempts(settings.retry_limit));
    match &settings.region {
        Some(region) => loader.region(Region::new(region.clone())),
        None => loader,
    }
}

const IN_USE_CODES: &[&str] = &["ScalingActivityInProgress", "ResourceInUse"];

fn classify<E, R>(resource: &'static str, name: &str, err: SdkError<E, R>) -> ControlPlaneError
where
    E: ProvideErrorMetadata + Error + Send + Sync + 'static,
    R: Debug,
{
    if !matches!(err, SdkError::ServiceError(_)) {
        return ControlPlaneError::Transport(DisplayErrorContext(&err).to_string());
    }
    let code = err.code().unwrap_or("Unknown").to_string();
    let message = err.message().unwrap_or_default().to_string();
    debug!("{} {} failed with {}: {}", resource, name, code, message);

    if IN_USE_CODES.contains(&code.as_str()) {
        ControlPlaneError::Transient { code, message }
    } else if code.contains("NotFound") || message.to_lowercase().contains("not found") {
        ControlPlaneError::NotFound {
            resource,
            name: name.to_string(),
        }
    } else {
        ControlPlaneError::Service { code, message }
    }
}

trait Classify<T> {
    fn classify(self, resource: &'static str, name: &str) -> CallResult<T>;
}

impl<T, E, R> Classify<T> for Result<T, SdkError<E, R>>
where
    E: ProvideErrorMetadata + Error + Send + Sync + 'static,
    R: Debug,
{
    fn classify(self, resource: &'static str, name: &str) -> CallResult<T> {
        self.map_err(|err| classify(resource, name, err))
    }
}

/// Members the service model marks required come back bare, optional ones
/// wrapped in `Option`. Both read the same way here.
trait Member {
    type Value;

    fn member(self) -> Option<Self::Value>;
}

impl Member for &str {
    type Value = String;

    fn member(self) -> Option<String> {
        Some(self.to_string())
    }
}

impl Member for Option<&str> {
    type Value = String;

    fn member(self) -> Option<String> {
        self.map(str::to_string)
    }
}

impl Member for i32 {
    type Value = i32;

    fn member(self) -> Option<i32> {
        Some(self)
    }
}

impl Member for Option<i32> {
    type Value = i32;

    fn member(self) -> Option<i32> {
        self
    }
}

impl Member for &LifecycleState {
    type Value = String;

    fn member(self) -> Option<String> {
        Some(self.as_str().to_string())
    }
}

impl Member for Option<&LifecycleState> {
    type Value = String;

    fn member(self) -> Option<String> {
        self.map(|state| state.as_str().to_string())
    }
}

/// Builders with required members validate on `build()`, the others cannot fail.
trait Built<T> {
    fn built(self) -> CallResult<T>;
}

macro_rules! built {
    ($($ty:ty),*) => {
        $(
            impl Built<$ty> for $ty {
                fn built(self) -> CallResult<$ty> {
                    Ok(self)
                }
            }

            impl Built<$ty> for Result<$ty, BuildError> {
                fn built(self) -> CallResult<$ty> {
                    self.map_err(|err| ControlPlaneError::Transport(err.to_string()))
                }
            }
        )*
    };
}

built!(AlarmDimension, GroupTagRequest);

fn size(value: i32) -> u32 {
    u32::try_from(value).unwrap_or(0)
}

fn int(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

fn filter(name: &str, value: &str) -> Filter {
    Filter::builder().name(name).values(value).build()
}

fn name_tag(tags: &[Ec2Tag]) -> Option<String> {
    tags.iter()
        .find(|tag| tag.key() == Some("Name"))
        .and_then(|tag| tag.value())
        .map(str::to_string)
}

fn launch_template(name: &str) -> LaunchTemplateSpecification {
    LaunchTemplateSpecification::builder()
        .launch_template_name(name)
        .version("$Latest")
        .build()
}

fn scalable_group(group: &AutoScalingGroup) -> ScalableGroup {
    ScalableGroup {
        name: group.auto_scaling_group_name().member().unwrap_or_default(),
        min_size: size(group.min_size().member().unwrap_or_default()),
        max_size: size(group.max_size().member().unwrap_or_default()),
        desired_capacity: size(group.desired_capacity().member().unwrap_or_default()),
        launch_template_name: group
            .launch_template()
            .and_then(|template| template.launch_template_name())
            .map(str::to_string),
        load_balancer_names: group.load_balancer_names().to_vec(),
        instances: group
            .instances()
            .iter()
            .map(|instance| GroupInstance {
                instance_id: instance.instance_id().member().unwrap_or_default(),
                healthy: instance.health_status().member().as_deref() == Some("Healthy"),
                in_service: instance.lifecycle_state().member().as_deref() == Some("InService"),
            })
            .collect(),
    }
}

fn metric_alarm(alarm: &aws_sdk_cloudwatch::types::MetricAlarm) -> MetricAlarm {
    MetricAlarm {
        name: alarm.alarm_name().unwrap_or_default().to_string(),
        description: alarm.alarm_description().unwrap_or_default().to_string(),
        actions: alarm.alarm_actions().to_vec(),
        comparison: match alarm.comparison_operator() {
            Some(ComparisonOperator::GreaterThanThreshold) => Comparison::GreaterThanThreshold,
            _ => Comparison::LessThanThreshold,
        },
        evaluation_periods: size(alarm.evaluation_periods().unwrap_or_default()),
        metric_name: alarm.metric_name().unwrap_or_default().to_string(),
        namespace: alarm.namespace().unwrap_or_default().to_string(),
        period: size(alarm.period().unwrap_or_default()),
        statistic: alarm
            .statistic()
            .map(|statistic| statistic.as_str().to_string())
            .unwrap_or_default(),
        threshold: alarm.threshold().unwrap_or_default(),
        unit: alarm.unit().map(|unit| unit.as_str().to_string()),
        dimensions: alarm
            .dimensions()
            .iter()
            .map(|dimension| Dimension {
                name: dimension.name().member().unwrap_or_default(),
                value: dimension.value().member().unwrap_or_default(),
            })
            .collect(),
    }
}

#[async_trait]
impl ControlPlane for AwsControlPlane {
    async fn describe_group(&self, name: &str) -> CallResult<Vec<ScalableGroup>> {
        let output = self
            .autoscaling
            .describe_auto_scaling_groups()
            .auto_scaling_group_names(name)
            .send()
            .await
            .classify("scalable group", name)?;
        Ok(output.auto_scaling_groups().iter().map(scalable_group).collect())
    }

    async fn list_groups(&self) -> CallResult<Vec<ScalableGroup>> {
        let mut groups = Vec::new();
        let mut next_token = None;
        loop {
            let output = self
                .autoscaling
                .describe_auto_scaling_groups()
                .set_next_token(next_token.take())
                .send()
                .await
                .classify("scalable groups", "*")?;
            groups.extend(output.auto_scaling_groups().iter().map(scalable_group));
            match output.next_token() {
                Some(token) => next_token = Some(token.to_string()),
                None => break,
            }
        }
        Ok(groups)
    }

    async fn create_group(&self, spec: &GroupSpec) -> CallResult<()> {
        let mut request = self
            .autoscaling
            .create_auto_scaling_group()
            .auto_scaling_group_name(&spec.name)
            .min_size(int(spec.min_size))
            .max_size(int(spec.max_size))
            .launch_template(launch_template(&spec.launch_template_name))
            .default_cooldown(int(spec.default_cooldown))
            .vpc_zone_identifier(spec.subnet_ids.join(","))
            .set_availability_zones(Some(spec.availability_zones.clone()))
            .set_load_balancer_names(Some(spec.load_balancer_names.clone()))
            .health_check_type(&spec.health_check_type)
            .health_check_grace_period(int(spec.health_check_grace_period));
        for tag in &spec.tags {
            request = request.tags(
                GroupTagRequest::builder()
                    .resource_id(&spec.name)
                    .resource_type("auto-scaling-group")
                    .key(&tag.key)
                    .value(&tag.value)
                    .propagate_at_launch(tag.propagate_at_launch)
                    .build()
                    .built()?,
            );
        }
        request.send().await.classify("scalable group", &spec.name)?;
        Ok(())
    }

    async fn update_group(&self, update: &GroupUpdate) -> CallResult<()> {
        self.autoscaling
            .update_auto_scaling_group()
            .auto_scaling_group_name(&update.name)
            .min_size(int(update.min_size))
            .max_size(int(update.max_size))
            .set_desired_capacity(update.desired_capacity.map(int))
            .set_launch_template(update.launch_template_name.as_deref().map(launch_template))
            .send()
            .await
            .classify("scalable group", &update.name)?;
        Ok(())
    }

    async fn set_desired_capacity(&self, group: &str, capacity: u32) -> CallResult<()> {
        self.autoscaling
            .set_desired_capacity()
            .auto_scaling_group_name(group)
            .desired_capacity(int(capacity))
            .honor_cooldown(false)
            .send()
            .await
            .classify("scalable group", group)?;
        Ok(())
    }

    async fn suspend_processes(&self, group: &str, processes: &[&str]) -> CallResult<()> {
        self.autoscaling
            .suspend_processes()
            .auto_scaling_group_name(group)
            .set_scaling_processes(Some(processes.iter().map(|p| p.to_string()).collect()))
            .send()
            .await
            .classify("scalable group", group)?;
        Ok(())
    }

    async fn resume_processes(&self, group: &str, processes: &[&str]) -> CallResult<()> {
        self.autoscaling
            .resume_processes()
            .auto_scaling_group_name(group)
            .set_scaling_processes(Some(processes.iter().map(|p| p.to_string()).collect()))
            .send()
            .await
            .classify("scalable group", group)?;
        Ok(())
    }

    async fn delete_group(&self, name: &str) -> CallResult<()> {
        self.autoscaling
            .delete_auto_scaling_group()
            .auto_scaling_group_name(name)
            .force_delete(false)
            .send()
            .await
            .classify("scalable group", name)?;
        Ok(())
    }

    async fn describe_launch_templates(&self, name: &str) -> CallResult<Vec<String>> {
        // Filtering instead of naming the template: an unknown name is not an error then.
        let output = self
            .ec2
            .describe_launch_templates()
            .filters(filter("launch-template-name", name))
            .send()
            .await
            .classify("launch template", name)?;
        Ok(output
            .launch_templates()
            .iter()
            .filter_map(|template| template.launch_template_name())
            .map(str::to_string)
            .collect())
    }

    async fn create_launch_template(&self, spec: &LaunchTemplateSpec) -> CallResult<()> {
        let data = RequestLaunchTemplateData::builder()
            .image_id(&spec.image_id)
            .key_name(&spec.key_name)
            .instance_type(InstanceType::from(spec.instance_type.as_str()))
            .iam_instance_profile(
                LaunchTemplateIamInstanceProfileSpecificationRequest::builder()
                    .name(&spec.iam_instance_profile)
                    .build(),
            )
            .network_interfaces(
                LaunchTemplateInstanceNetworkInterfaceSpecificationRequest::builder()
                    .device_index(0)
                    .associate_public_ip_address(spec.associate_public_ip_address)
                    .set_groups(Some(spec.security_group_ids.clone()))
                    .build(),
            )
            .set_user_data(spec.user_data.clone())
            .build();
        self.ec2
            .create_launch_template()
            .launch_template_name(&spec.name)
            .launch_template_data(data)
            .send()
            .await
            .classify("launch template", &spec.name)?;
        Ok(())
    }

    async fn delete_launch_template(&self, name: &str) -> CallResult<()> {
        self.ec2
            .delete_launch_template()
            .launch_template_name(name)
            .send()
            .await
            .classify("launch template", name)?;
        Ok(())
    }

    async fn describe_policies(&self, group: &str) -> CallResult<Vec<ScalingPolicy>> {
        let mut policies = Vec::new();
        let mut next_token = None;
        loop {
            let output = self
                .autoscaling
                .describe_policies()
                .auto_scaling_group_name(group)
                .set_next_token(next_token.take())
                .send()
                .await
                .classify("scaling policies of", group)?;
            policies.extend(output.scaling_policies().iter().map(|policy| ScalingPolicy {
                group_name: policy
                    .auto_scaling_group_name()
                    .member()
                    .unwrap_or_else(|| group.to_string()),
                policy_name: policy.policy_name().member().unwrap_or_default(),
                policy_arn: policy.policy_arn().member().unwrap_or_default(),
            }));
            match output.next_token() {
                Some(token) => next_token = Some(token.to_string()),
                None => break,
            }
        }
        Ok(policies)
    }

    async fn put_scaling_policy(&self, spec: &ScalingPolicySpec) -> CallResult<String> {
        let output = self
            .autoscaling
            .put_scaling_policy()
            .auto_scaling_group_name(&spec.group_name)
            .policy_name(&spec.policy_name)
            .policy_type(&spec.policy_type)
            .adjustment_type(&spec.adjustment_type)
            .scaling_adjustment(spec.scaling_adjustment)
            .cooldown(int(spec.cooldown))
            .send()
            .await
            .classify("scaling policy", &spec.policy_name)?;
        Ok(output.policy_arn().member().unwrap_or_default())
    }

    async fn delete_policy(&self, group: &str, policy_name: &str) -> CallResult<()> {
        self.autoscaling
            .delete_policy()
            .auto_scaling_group_name(group)
            .policy_name(policy_name)
            .send()
            .await
            .classify("scaling policy", policy_name)?;
        Ok(())
    }

    async fn describe_alarms(&self, name_prefix: &str) -> CallResult<Vec<MetricAlarm>> {
        let mut alarms = Vec::new();
        let mut next_token = None;
        loop {
            let output = self
                .cloudwatch
                .describe_alarms()
                .alarm_name_prefix(name_prefix)
                .set_next_token(next_token.take())
                .send()
                .await
                .classify("alarms starting with", name_prefix)?;
            alarms.extend(output.metric_alarms().iter().map(metric_alarm));
            match output.next_token() {
                Some(token) => next_token = Some(token.to_string()),
                None => break,
            }
        }
        Ok(alarms)
    }

    async fn put_metric_alarm(&self, alarm: &MetricAlarm) -> CallResult<()> {
        let mut request = self
            .cloudwatch
            .put_metric_alarm()
            .alarm_name(&alarm.name)
            .alarm_description(&alarm.description)
            .set_alarm_actions(Some(alarm.actions.clone()))
            .comparison_operator(ComparisonOperator::from(alarm.comparison.as_str()))
            .evaluation_periods(int(alarm.evaluation_periods))
            .metric_name(&alarm.metric_name)
            .namespace(&alarm.namespace)
            .period(int(alarm.period))
            .statistic(Statistic::from(alarm.statistic.as_str()))
            .threshold(alarm.threshold)
            .set_unit(alarm.unit.as_deref().map(StandardUnit::from));
        for dimension in &alarm.dimensions {
            request = request.dimensions(
                AlarmDimension::builder()
                    .name(&dimension.name)
                    .value(&dimension.value)
                    .build()
                    .built()?,
            );
        }
        request.send().await.classify("alarm", &alarm.name)?;
        Ok(())
    }

    async fn delete_alarms(&self, names: &[String]) -> CallResult<()> {
        self.cloudwatch
            .delete_alarms()
            .set_alarm_names(Some(names.to_vec()))
            .send()
            .await
            .classify("alarms", &names.join(","))?;
        Ok(())
    }

    async fn create_topic(&self, name: &str) -> CallResult<String> {
        let output = self
            .sns
            .create_topic()
            .name(name)
            .send()
            .await
            .classify("topic", name)?;
        Ok(output.topic_arn().unwrap_or_default().to_string())
    }

    async fn describe_security_groups(&self, name: &str) -> CallResult<Vec<SecurityGroup>> {
        let output = self
            .ec2
            .describe_security_groups()
            .filters(filter("group-name", name))
            .send()
            .await
            .classify("security group", name)?;
        Ok(output
            .security_groups()
            .iter()
            .map(|group| SecurityGroup {
                group_id: group.group_id().unwrap_or_default().to_string(),
                group_name: group.group_name().unwrap_or_default().to_string(),
            })
            .collect())
    }

    async fn describe_vpcs(&self, name: &str) -> CallResult<Vec<Vpc>> {
        let output = self
            .ec2
            .describe_vpcs()
            .filters(filter("tag:Name", name))
            .send()
            .await
            .classify("VPC", name)?;
        Ok(output
            .vpcs()
            .iter()
            .map(|vpc| Vpc {
                vpc_id: vpc.vpc_id().unwrap_or_default().to_string(),
                name: name_tag(vpc.tags()),
            })
            .collect())
    }

    async fn describe_subnets(&self, vpc_id: &str) -> CallResult<Vec<Subnet>> {
        let mut subnets = Vec::new();
        let mut next_token = None;
        loop {
            let output = self
                .ec2
                .describe_subnets()
                .filters(filter("vpc-id", vpc_id))
                .set_next_token(next_token.take())
                .send()
                .await
                .classify("subnets of", vpc_id)?;
            subnets.extend(output.subnets().iter().map(|subnet| Subnet {
                subnet_id: subnet.subnet_id().unwrap_or_default().to_string(),
                vpc_id: subnet.vpc_id().unwrap_or_default().to_string(),
                availability_zone: subnet.availability_zone().unwrap_or_default().to_string(),
                name: name_tag(subnet.tags()),
            }));
            match output.next_token() {
                Some(token) => next_token = Some(token.to_string()),
                None => break,
            }
        }
        Ok(subnets)
    }

    async fn describe_instance_health(&self, load_balancer: &str) -> CallResult<Vec<InstanceHealth>> {
        let output = self
            .elb
            .describe_instance_health()
            .load_balancer_name(load_balancer)
            .send()
            .await
            .classify("load balancer", load_balancer)?;
        Ok(output
            .instance_states()
            .iter()
            .map(|state| InstanceHealth {
                instance_id: state.instance_id().unwrap_or_default().to_string(),
                in_service: state.state() == Some("InService"),
            })
            .collect())
    }

    async fn describe_images(&self, tags: &[(String, String)]) -> CallResult<Vec<MachineImage>> {
        let mut request = self.ec2.describe_images().filters(filter("state", "available"));
        for (key, value) in tags {
            request = request.filters(filter(&format!("tag:{key}"), value));
        }
        let output = request.send().await.classify("images tagged", &format!("{tags:?}"))?;
        Ok(output
            .images()
            .iter()
            .map(|image| MachineImage {
                image_id: image.image_id().unwrap_or_default().to_string(),
                name: image.name().map(str::to_string),
                creation_date: image.creation_date().map(str::to_string),
            })
            .collect())
    }
}
