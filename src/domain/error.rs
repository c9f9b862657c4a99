use thiserror::Error;

/// Failure reported by a [`ControlPlane`](super::port::ControlPlane) call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ControlPlaneError {
    #[error("{resource} {name} does not exist")]
    NotFound { resource: &'static str, name: String },

    /// The control plane is busy with the resource (scaling activity, resource in use).
    #[error("{code}: {message}")]
    Transient { code: String, message: String },

    #[error("{code}: {message}")]
    Service { code: String, message: String },

    #[error("request could not be dispatched: {0}")]
    Transport(String),
}

impl ControlPlaneError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ControlPlaneError::Transient { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ControlPlaneError::NotFound { .. })
    }
}

#[derive(Debug, Error)]
pub enum DeployError {
    #[error("cannot find {resource} {name}")]
    NotFound { resource: &'static str, name: String },

    #[error("more than 1 {resource} with the name {name} ({count} matches)")]
    Ambiguous {
        resource: &'static str,
        name: String,
        count: usize,
    },

    #[error("both blue and green scalable groups of {stack} exist. Is another deployment in progress?")]
    BothColorsPresent { stack: String },

    #[error("the groups {groups:?} are not in the whitelist for load balancer {load_balancer}")]
    ForeignGroups {
        load_balancer: String,
        groups: Vec<String>,
    },

    #[error("{operation} still failing after {attempts} attempts")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        #[source]
        source: ControlPlaneError,
    },

    #[error("{group} did not converge after {attempts} attempts (last seen {last})")]
    ConvergenceTimeout {
        group: String,
        attempts: u32,
        last: String,
    },

    #[error(transparent)]
    ControlPlane(#[from] ControlPlaneError),

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("interrupted by operator")]
    Interrupted,
}

impl DeployError {
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            DeployError::BothColorsPresent { .. } | DeployError::ForeignGroups { .. }
        )
    }
}
