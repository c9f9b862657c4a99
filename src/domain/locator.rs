//! Name based lookup of cloud resources.
//!
//! `find_*` methods return `None` when nothing matches; their `*_required`
//! counterparts turn that into [`DeployError::NotFound`]. More than one
//! match for a name that should be unique is always an error.

use itertools::Itertools;
use log::info;

use super::error::DeployError;
use super::model::{ScalableGroup, SecurityGroup, Subnet, Vpc};
use super::port::SharedControlPlane;

#[derive(Clone)]
pub struct ResourceLocator {
    control_plane: SharedControlPlane,
}

fn at_most_one<T>(
    mut found: Vec<T>,
    resource: &'static str,
    name: &str,
) -> Result<Option<T>, DeployError> {
    if found.len() > 1 {
        return Err(DeployError::Ambiguous {
            resource,
            name: name.to_string(),
            count: found.len(),
        });
    }
    Ok(found.pop())
}

fn required<T>(found: Option<T>, resource: &'static str, name: &str) -> Result<T, DeployError> {
    found.ok_or_else(|| DeployError::NotFound {
        resource,
        name: name.to_string(),
    })
}

impl ResourceLocator {
    pub fn new(control_plane: SharedControlPlane) -> Self {
        Self { control_plane }
    }

    pub async fn find_group(&self, name: &str) -> Result<Option<ScalableGroup>, DeployError> {
        let groups = self.control_plane.describe_group(name).await?;
        at_most_one(groups, "scalable group", name)
    }

    pub async fn find_group_required(&self, name: &str) -> Result<ScalableGroup, DeployError> {
        required(self.find_group(name).await?, "scalable group", name)
    }

    pub async fn find_security_group(
        &self,
        name: &str,
    ) -> Result<Option<SecurityGroup>, DeployError> {
        let groups = self.control_plane.describe_security_groups(name).await?;
        at_most_one(groups, "security group", name)
    }

    pub async fn find_security_group_required(
        &self,
        name: &str,
    ) -> Result<SecurityGroup, DeployError> {
        required(self.find_security_group(name).await?, "security group", name)
    }

    pub async fn find_vpc(&self, name: &str) -> Result<Option<Vpc>, DeployError> {
        let vpcs = self.control_plane.describe_vpcs(name).await?;
        at_most_one(vpcs, "VPC", name)
    }

    pub async fn find_vpc_required(&self, name: &str) -> Result<Vpc, DeployError> {
        required(self.find_vpc(name).await?, "VPC", name)
    }

    /// Subnets of `vpc_id` whose `Name` tag starts with `prefix`.
    pub async fn find_subnets(&self, vpc_id: &str, prefix: &str) -> Result<Vec<Subnet>, DeployError> {
        Ok(self
            .control_plane
            .describe_subnets(vpc_id)
            .await?
            .into_iter()
            .filter(|subnet| {
                subnet
                    .name
                    .as_deref()
                    .is_some_and(|name| name.starts_with(prefix))
            })
            .collect())
    }

    pub async fn find_subnets_required(
        &self,
        vpc_id: &str,
        prefix: &str,
    ) -> Result<Vec<Subnet>, DeployError> {
        let subnets = self.find_subnets(vpc_id, prefix).await?;
        if subnets.is_empty() {
            return Err(DeployError::NotFound {
                resource: "subnets starting with",
                name: prefix.to_string(),
            });
        }
        Ok(subnets)
    }

    /// Names of every scalable group attached to `load_balancer`.
    pub async fn groups_on_load_balancer(
        &self,
        load_balancer: &str,
    ) -> Result<Vec<String>, DeployError> {
        Ok(self
            .control_plane
            .list_groups()
            .await?
            .into_iter()
            .filter(|group| group.load_balancer_names.iter().any(|lb| lb == load_balancer))
            .map(|group| group.name)
            .collect())
    }

    /// Fails when a group outside `whitelist` shares `load_balancer`.
    pub async fn only_these_groups(
        &self,
        load_balancer: &str,
        whitelist: &[String],
    ) -> Result<(), DeployError> {
        let foreign = self
            .groups_on_load_balancer(load_balancer)
            .await?
            .into_iter()
            .filter(|name| !whitelist.contains(name))
            .sorted()
            .collect::<Vec<_>>();
        if !foreign.is_empty() {
            return Err(DeployError::ForeignGroups {
                load_balancer: load_balancer.to_string(),
                groups: foreign,
            });
        }
        info!(
            "Load balancer {} only serves groups from {:?}",
            load_balancer, whitelist
        );
        Ok(())
    }
}
