//! Deployment strategies.

use async_trait::async_trait;
use log::info;

use super::environment::Environment;
use super::error::DeployError;
use super::{DeployContext, Deployer};

/// One environment per stack, replaced in place on every deploy.
pub struct SimpleDeployer {
    context: DeployContext,
    environment: Environment,
}

impl SimpleDeployer {
    pub fn new(context: DeployContext) -> Self {
        let stack = &context.config.stack_name;
        let environment = Environment::new(
            &format!("{stack}-autoscaling"),
            &format!("{stack}-alarm-app"),
            context.clone(),
        );
        Self {
            context,
            environment,
        }
    }
}

#[async_trait]
impl Deployer for SimpleDeployer {
    async fn deploy(&self) -> Result<(), DeployError> {
        self.context
            .locator
            .only_these_groups(
                &self.context.config.resources.elb_name,
                &[self.environment.name().to_string()],
            )
            .await?;

        if self.environment.exists().await? {
            info!("Found {} - updating it in place", self.environment.name());
            self.environment.update().await
        } else {
            info!("Found nothing - creating {}", self.environment.name());
            self.environment.create().await
        }
    }

    async fn delete(&self) -> Result<(), DeployError> {
        if !self.environment.exists().await? {
            return Err(DeployError::NotFound {
                resource: "scalable group",
                name: self.environment.name().to_string(),
            });
        }
        self.environment.destroy(None).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    Blue,
    Green,
}

impl Color {
    pub fn as_str(&self) -> &'static str {
        match self {
            Color::Blue => "blue",
            Color::Green => "green",
        }
    }
}

/// Two alternating environments: the idle color is created and brought up to
/// the active color's size before the active one is destroyed.
pub struct RollingDeployer {
    context: DeployContext,
    blue: Environment,
    green: Environment,
}

impl RollingDeployer {
    pub fn new(context: DeployContext) -> Self {
        let blue = Self::environment(&context, Color::Blue);
        let green = Self::environment(&context, Color::Green);
        Self {
            context,
            blue,
            green,
        }
    }

    fn environment(context: &DeployContext, color: Color) -> Environment {
        let group = format!("{}-autoscaling-{}", context.config.stack_name, color.as_str());
        let alarm_prefix = format!("{group}-alarms");
        Environment::new(&group, &alarm_prefix, context.clone())
    }

    /// Which colors exist right now; both at once means someone else is mid-swap.
    async fn live_colors(&self) -> Result<(bool, bool), DeployError> {
        info!("Checking for existing blue scalable group '{}'", self.blue.name());
        info!("Checking for existing green scalable group '{}'", self.green.name());
        let blue = self.blue.exists().await?;
        let green = self.green.exists().await?;
        if blue && green {
            return Err(DeployError::BothColorsPresent {
                stack: self.context.config.stack_name.clone(),
            });
        }
        Ok((blue, green))
    }

    async fn swap(&self, from: &Environment, to: &Environment) -> Result<(), DeployError> {
        to.create().await?;
        to.scale_up(from.size().await?).await?;
        from.destroy(None).await
    }
}

#[async_trait]
impl Deployer for RollingDeployer {
    async fn deploy(&self) -> Result<(), DeployError> {
        self.context
            .locator
            .only_these_groups(
                &self.context.config.resources.elb_name,
                &[self.blue.name().to_string(), self.green.name().to_string()],
            )
            .await?;

        match self.live_colors().await? {
            (true, _) => {
                info!("Found blue - moving to green");
                self.swap(&self.blue, &self.green).await
            }
            (_, true) => {
                info!("Found green - moving to blue");
                self.swap(&self.green, &self.blue).await
            }
            (false, false) => {
                info!("Found nothing - moving to blue");
                self.blue.create().await
            }
        }
    }

    async fn delete(&self) -> Result<(), DeployError> {
        match self.live_colors().await? {
            (true, _) => self.blue.destroy(None).await,
            (_, true) => self.green.destroy(None).await,
            (false, false) => {
                info!(
                    "Neither blue nor green exists for {}, nothing to delete",
                    self.context.config.stack_name
                );
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::ControlPlaneError;
    use crate::domain::model::Strategy;
    use crate::domain::test_support::{context_with, seeded_control_plane};

    const BLUE: &str = "shop-autoscaling-blue";
    const GREEN: &str = "shop-autoscaling-green";

    #[tokio::test]
    async fn simple_creates_when_absent_and_updates_when_present() {
        let cp = seeded_control_plane();
        let deployer = SimpleDeployer::new(context_with(&cp, Strategy::Simple));

        deployer.deploy().await.unwrap();
        let first = cp.group("shop-autoscaling").unwrap().launch_template_name;

        deployer.deploy().await.unwrap();
        let second = cp.group("shop-autoscaling").unwrap().launch_template_name;
        assert_ne!(first, second);
        assert_eq!(cp.group_names(), vec!["shop-autoscaling"]);
    }

    #[tokio::test]
    async fn simple_refuses_a_shared_load_balancer() {
        let cp = seeded_control_plane();
        cp.seed_group("someone-else", &["shop-lb"], 1);
        let deployer = SimpleDeployer::new(context_with(&cp, Strategy::Simple));

        let err = deployer.deploy().await.unwrap_err();
        assert!(err.is_conflict());
        assert!(cp.journal().is_empty());
    }

    #[tokio::test]
    async fn simple_delete_of_absent_stack_fails() {
        let cp = seeded_control_plane();
        let deployer = SimpleDeployer::new(context_with(&cp, Strategy::Simple));

        let err = deployer.delete().await.unwrap_err();
        assert!(matches!(err, DeployError::NotFound { .. }));
    }

    #[tokio::test]
    async fn rolling_with_both_colors_is_a_conflict_without_mutation() {
        let cp = seeded_control_plane();
        cp.seed_group(BLUE, &["shop-lb"], 2);
        cp.seed_group(GREEN, &["shop-lb"], 2);
        let deployer = RollingDeployer::new(context_with(&cp, Strategy::Rolling));

        let err = deployer.deploy().await.unwrap_err();
        assert!(matches!(err, DeployError::BothColorsPresent { .. }));
        assert!(cp.journal().is_empty());

        let err = deployer.delete().await.unwrap_err();
        assert!(err.is_conflict());
        assert!(cp.journal().is_empty());
    }

    #[tokio::test]
    async fn rolling_from_nothing_creates_blue() {
        let cp = seeded_control_plane();
        let deployer = RollingDeployer::new(context_with(&cp, Strategy::Rolling));

        deployer.deploy().await.unwrap();
        assert_eq!(cp.group_names(), vec![BLUE]);
    }

    #[tokio::test]
    async fn rolling_from_blue_matches_capacity_then_retires_blue() {
        let cp = seeded_control_plane();
        let deployer = RollingDeployer::new(context_with(&cp, Strategy::Rolling));
        deployer.deploy().await.unwrap();
        cp.set_desired_capacity_directly(BLUE, 3);

        deployer.deploy().await.unwrap();

        assert_eq!(cp.group_names(), vec![GREEN]);
        assert_eq!(cp.group(GREEN).unwrap().desired_capacity, 3);
        let journal = cp.journal();
        let green_scaled = journal
            .iter()
            .position(|entry| entry == &format!("set_desired_capacity {GREEN} 3"))
            .unwrap();
        let blue_deleted = journal
            .iter()
            .position(|entry| entry == &format!("delete_group {BLUE}"))
            .unwrap();
        assert!(green_scaled < blue_deleted);
    }

    #[tokio::test]
    async fn rolling_scale_up_is_bounded_by_max_size() {
        let cp = seeded_control_plane();
        cp.seed_group(GREEN, &["shop-lb"], 6);
        let deployer = RollingDeployer::new(context_with(&cp, Strategy::Rolling));

        deployer.deploy().await.unwrap();

        assert_eq!(cp.group_names(), vec![BLUE]);
        assert_eq!(cp.group(BLUE).unwrap().desired_capacity, 4);
    }

    #[tokio::test]
    async fn rolling_keeps_old_color_when_new_color_fails() {
        let cp = seeded_control_plane();
        let deployer = RollingDeployer::new(context_with(&cp, Strategy::Rolling));
        deployer.deploy().await.unwrap();
        cp.fail_next(
            "create_group",
            ControlPlaneError::Service {
                code: "LimitExceeded".to_string(),
                message: "quota".to_string(),
            },
        );

        assert!(deployer.deploy().await.is_err());
        assert_eq!(cp.group_names(), vec![BLUE]);
        assert_eq!(cp.launch_template_names().len(), 1);
    }

    #[tokio::test]
    async fn rolling_delete_destroys_the_live_color() {
        let cp = seeded_control_plane();
        let deployer = RollingDeployer::new(context_with(&cp, Strategy::Rolling));
        deployer.deploy().await.unwrap();
        deployer.deploy().await.unwrap();

        deployer.delete().await.unwrap();
        assert!(cp.group_names().is_empty());
        assert!(cp.launch_template_names().is_empty());

        // Nothing left: a no-op.
        deployer.delete().await.unwrap();
    }
}
