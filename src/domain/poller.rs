//! Waiting for the control plane to converge, and retrying calls that fail transiently.

use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use serde::Deserialize;

use super::error::{ControlPlaneError, DeployError};
use super::locator::ResourceLocator;
use super::model::InstanceCounts;
use super::port::{CallResult, SharedControlPlane};

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PollSettings {
    pub max_attempts: u32,
    pub interval_secs: u64,
    pub delete_attempts: u32,
    pub delete_interval_secs: u64,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            max_attempts: 40,
            interval_secs: 10,
            delete_attempts: 20,
            delete_interval_secs: 15,
        }
    }
}

impl PollSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn delete_interval(&self) -> Duration {
        Duration::from_secs(self.delete_interval_secs)
    }
}

/// Raised by the operator (Ctrl-C); every polling loop gives up on its next attempt.
#[derive(Debug, Clone, Default)]
pub struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
    /// Returns whether the interrupt had already been raised.
    pub fn raise(&self) -> bool {
        self.0.swap(true, Ordering::SeqCst)
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), DeployError> {
        if self.is_raised() {
            return Err(DeployError::Interrupted);
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct ConvergencePoller {
    control_plane: SharedControlPlane,
    locator: ResourceLocator,
    settings: PollSettings,
    interrupt: Interrupt,
}

impl ConvergencePoller {
    pub fn new(
        control_plane: SharedControlPlane,
        locator: ResourceLocator,
        settings: PollSettings,
        interrupt: Interrupt,
    ) -> Self {
        Self {
            control_plane,
            locator,
            settings,
            interrupt,
        }
    }

    pub fn settings(&self) -> &PollSettings {
        &self.settings
    }

    pub fn interrupt(&self) -> &Interrupt {
        &self.interrupt
    }

    /// Same poller, deaf to operator interrupts. Used while rolling back.
    pub fn uninterruptible(&self) -> Self {
        Self {
            interrupt: Interrupt::default(),
            ..self.clone()
        }
    }

    /// Calls `describe` until `predicate` accepts its result, sleeping `interval`
    /// between attempts.
    pub async fn await_condition<S, D, Fut, P>(
        &self,
        what: &str,
        mut describe: D,
        predicate: P,
        max_attempts: u32,
        interval: Duration,
    ) -> Result<S, DeployError>
    where
        S: Display,
        D: FnMut() -> Fut,
        Fut: Future<Output = Result<S, DeployError>>,
        P: Fn(&S) -> bool,
    {
        let mut last = None;
        for attempt in 0..max_attempts {
            self.interrupt.check()?;
            if attempt > 0 {
                if let Some(status) = &last {
                    info!("Attempt #{} but state unmatched: {}", attempt, status);
                }
                tokio::time::sleep(interval).await;
                self.interrupt.check()?;
            }
            let status = describe().await?;
            if predicate(&status) {
                return Ok(status);
            }
            last = Some(status);
        }
        Err(DeployError::ConvergenceTimeout {
            group: what.to_string(),
            attempts: max_attempts,
            last: last.map(|status| status.to_string()).unwrap_or_default(),
        })
    }

    /// Waits until the instance counts of `group`, as seen through `load_balancer`,
    /// satisfy `predicate`.
    pub async fn await_instance_counts<P>(
        &self,
        group: &str,
        load_balancer: &str,
        predicate: P,
    ) -> Result<InstanceCounts, DeployError>
    where
        P: Fn(&InstanceCounts) -> bool,
    {
        self.await_condition(
            group,
            || self.instance_counts(group, load_balancer),
            predicate,
            self.settings.max_attempts,
            self.settings.interval(),
        )
        .await
    }

    pub async fn instance_counts(
        &self,
        group: &str,
        load_balancer: &str,
    ) -> Result<InstanceCounts, DeployError> {
        let instances = self.locator.find_group_required(group).await?.instances;
        let balancer_health = self
            .control_plane
            .describe_instance_health(load_balancer)
            .await?
            .into_iter()
            .map(|health| (health.instance_id, health.in_service))
            .collect::<HashMap<_, _>>();

        let in_service = instances
            .iter()
            .filter(|instance| {
                instance.healthy
                    && instance.in_service
                    && balancer_health
                        .get(&instance.instance_id)
                        .copied()
                        .unwrap_or(false)
            })
            .count();
        Ok(InstanceCounts {
            in_service,
            out_of_service: instances.len() - in_service,
            total: instances.len(),
        })
    }

    /// Runs `call` until it succeeds, retrying up to `tries` times while `retryable`
    /// accepts the error. `call` receives the zero based attempt number.
    pub async fn retry_on<T, F, Fut, R>(
        &self,
        operation: &str,
        tries: u32,
        interval: Duration,
        retryable: R,
        mut call: F,
    ) -> Result<T, DeployError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = CallResult<T>>,
        R: Fn(&ControlPlaneError) -> bool,
    {
        let mut last = None;
        for attempt in 0..tries {
            self.interrupt.check()?;
            match call(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if retryable(&err) => {
                    info!("Attempt #{} of {} but: {}", attempt, operation, err);
                    last = Some(err);
                    if attempt + 1 < tries {
                        tokio::time::sleep(interval).await;
                    }
                }
                Err(err) => return Err(err.into()),
            }
        }
        warn!("Giving up on {} after {} attempts", operation, tries);
        Err(match last {
            Some(source) => DeployError::RetriesExhausted {
                operation: operation.to_string(),
                attempts: tries,
                source,
            },
            None => DeployError::Configuration(format!("{operation} was given no attempts")),
        })
    }
}
