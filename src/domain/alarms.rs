//! Scaling policies and CloudWatch-style alarms attached to a scalable group.

use log::info;

use super::error::DeployError;
use super::model::{AlarmThresholds, Comparison, Dimension, MetricAlarm, ScalingPolicySpec};
use super::port::SharedControlPlane;

const GROUP_DIMENSION: &str = "AutoScalingGroupName";

struct PolicyArns {
    up: String,
    down: String,
}

pub struct AlarmConfigurator {
    control_plane: SharedControlPlane,
    stack_name: String,
    alert_topic: String,
    thresholds: AlarmThresholds,
}

impl AlarmConfigurator {
    pub fn new(
        control_plane: SharedControlPlane,
        stack_name: &str,
        alert_topic: &str,
        thresholds: AlarmThresholds,
    ) -> Self {
        Self {
            control_plane,
            stack_name: stack_name.to_string(),
            alert_topic: alert_topic.to_string(),
            thresholds,
        }
    }

    pub async fn apply_configuration(&self, group: &str, alarm_prefix: &str) -> Result<(), DeployError> {
        info!("Setting up scaling alarms on scalable group {}", group);
        let policies = self.put_scaling_policies(group).await?;
        let alert_arn = self.control_plane.create_topic(&self.alert_topic).await?;
        for alarm in self.alarms(group, alarm_prefix, &policies, &alert_arn) {
            self.control_plane.put_metric_alarm(&alarm).await?;
        }
        info!("Configured scalable group alarms for {}", group);
        Ok(())
    }

    pub async fn remove_configuration(&self, group: &str, alarm_prefix: &str) -> Result<(), DeployError> {
        info!("Deleting scaling alarms on scalable group {}", group);
        self.delete_alarms(group, alarm_prefix).await?;
        self.delete_scaling_policies(group).await
    }

    async fn put_scaling_policies(&self, group: &str) -> Result<PolicyArns, DeployError> {
        let up = self.put_scaling_policy(group, "up", 1, 300).await?;
        let down = self.put_scaling_policy(group, "down", -1, 1800).await?;
        Ok(PolicyArns { up, down })
    }

    async fn put_scaling_policy(
        &self,
        group: &str,
        key: &str,
        adjustment: i32,
        cooldown: u32,
    ) -> Result<String, DeployError> {
        let spec = ScalingPolicySpec {
            group_name: group.to_string(),
            policy_name: format!("{group}-{key}"),
            policy_type: "SimpleScaling".to_string(),
            adjustment_type: "ChangeInCapacity".to_string(),
            scaling_adjustment: adjustment,
            cooldown,
        };
        let arn = self.control_plane.put_scaling_policy(&spec).await?;
        info!(
            "Configured scaling policy as {}",
            serde_json::to_string_pretty(&spec).unwrap_or_default()
        );
        Ok(arn)
    }

    fn alarms(
        &self,
        group: &str,
        prefix: &str,
        policies: &PolicyArns,
        alert_arn: &str,
    ) -> Vec<MetricAlarm> {
        let stack = &self.stack_name;
        let by_group = || vec![Dimension::new(GROUP_DIMENSION, group)];
        let alarm = |suffix: &str,
                     description: String,
                     action: &str,
                     comparison: Comparison,
                     (evaluation_periods, period): (u32, u32),
                     (namespace, metric_name, statistic): (&str, &str, &str),
                     threshold: f64| MetricAlarm {
            name: format!("{prefix}-{suffix}"),
            description,
            actions: vec![action.to_string()],
            comparison,
            evaluation_periods,
            metric_name: metric_name.to_string(),
            namespace: namespace.to_string(),
            period,
            statistic: statistic.to_string(),
            threshold,
            unit: None,
            dimensions: by_group(),
        };

        let up = Comparison::GreaterThanThreshold;
        let down = Comparison::LessThanThreshold;
        let t = &self.thresholds;

        let mut cpu_up = alarm(
            "cpu-up",
            format!("{stack} - Scale up alarm when CPU utilization is greater than a certain amount (based on instance type) for 3 periods of 1 minute"),
            &policies.up,
            up,
            (3, 60),
            ("AWS/EC2", "CPUUtilization", "Average"),
            t.cpu_up,
        );
        cpu_up.unit = Some("Percent".to_string());
        let mut cpu_down = alarm(
            "cpu-down",
            format!("{stack} - Scale down alarm when CPU utilization is less than a certain amount (based on instance type) for 6 periods of 5 minutes"),
            &policies.down,
            down,
            (6, 300),
            ("AWS/EC2", "CPUUtilization", "Average"),
            t.cpu_down,
        );
        cpu_down.unit = Some("Percent".to_string());
        let mut disk = alarm(
            "disk",
            format!("{stack} - Alarm when free disk space falls below a certain amount (in GB)"),
            alert_arn,
            down,
            (1, 300),
            ("System/Linux", "DiskSpaceAvailable", "Average"),
            t.disk,
        );
        disk.dimensions.push(Dimension::new("Filesystem", "/dev/xvda1"));
        disk.dimensions.push(Dimension::new("MountPath", "/"));

        vec![
            cpu_up,
            cpu_down,
            alarm(
                "network-out-down",
                format!("{stack} - Scale down alarm when NetworkOut is less than 750000 for 6 periods of 5 minute"),
                &policies.down,
                down,
                (6, 300),
                ("AWS/EC2", "NetworkOut", "Average"),
                750_000.0,
            ),
            alarm(
                "network-out-up",
                format!("{stack} - Scale up alarm when NetworkOut is more than 30000000 for 3 periods of 1 minute"),
                &policies.up,
                up,
                (3, 60),
                ("AWS/EC2", "NetworkOut", "Average"),
                30_000_000.0,
            ),
            alarm(
                "network-in-down",
                format!("{stack} - Scale down alarm when NetworkIn is less than 750000 for 6 periods of 5 minute"),
                &policies.down,
                down,
                (6, 300),
                ("AWS/EC2", "NetworkIn", "Average"),
                750_000.0,
            ),
            alarm(
                "network-in-up",
                format!("{stack} - Scale up alarm when NetworkIn is more than 30000000 for 3 periods of 1 minute"),
                &policies.up,
                up,
                (3, 60),
                ("AWS/EC2", "NetworkIn", "Average"),
                30_000_000.0,
            ),
            alarm(
                "credit-min",
                format!("{stack} - Alarm when credits fall below minimum"),
                alert_arn,
                down,
                (1, 120),
                ("AWS/EC2", "CPUCreditBalance", "Minimum"),
                t.credit,
            ),
            alarm(
                "credit-avg",
                format!("{stack} - Alarm when average credits fall below minimum"),
                alert_arn,
                down,
                (1, 120),
                ("AWS/EC2", "CPUCreditBalance", "Average"),
                t.credit,
            ),
            alarm(
                "mem",
                format!("{stack} - Alarm when RAM falls below a certain amount (in MB)"),
                alert_arn,
                down,
                (1, 300),
                ("System/Linux", "MemoryAvailable", "Average"),
                t.mem,
            ),
            disk,
        ]
    }

    /// Prefix matching alone could catch another stack's alarms, so each alarm
    /// must also carry the group dimension.
    async fn delete_alarms(&self, group: &str, alarm_prefix: &str) -> Result<(), DeployError> {
        let names = self
            .control_plane
            .describe_alarms(alarm_prefix)
            .await?
            .into_iter()
            .filter(|alarm| {
                alarm
                    .dimensions
                    .iter()
                    .any(|dimension| dimension.name == GROUP_DIMENSION && dimension.value == group)
            })
            .map(|alarm| alarm.name)
            .collect::<Vec<_>>();
        if names.is_empty() {
            info!("No alarms left for scalable group {}", group);
            return Ok(());
        }

        match self.control_plane.delete_alarms(&names).await {
            Err(err) if !err.is_not_found() => return Err(err.into()),
            _ => {}
        }
        info!("Deleted {} scalable group alarms: {:?}", names.len(), names);
        Ok(())
    }

    async fn delete_scaling_policies(&self, group: &str) -> Result<(), DeployError> {
        let policies = match self.control_plane.describe_policies(group).await {
            Ok(policies) => policies,
            Err(err) if err.is_not_found() => return Ok(()),
            Err(err) => return Err(err.into()),
        };
        for policy in policies {
            match self.control_plane.delete_policy(group, &policy.policy_name).await {
                Ok(()) => info!("Deleted scaling policy {}", policy.policy_name),
                Err(err) if err.is_not_found() => {
                    info!("Scaling policy {} already gone", policy.policy_name)
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }
}
