use dynrpc_common::{env, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::instance::InstanceRegistration;
use crate::naming::NamingRegistry;

/// Registration lifecycle configuration.
#[derive(Debug, Clone)]
pub struct RegistrationConfig {
    /// Time between heartbeats sent to the registry.
    pub heartbeat_interval: Duration,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(10),
        }
    }
}

impl RegistrationConfig {
    /// Reads `HEARTBEAT_INTERVAL` (whole seconds).
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Some(secs) = env::parse::<u64>("HEARTBEAT_INTERVAL")? {
            config.heartbeat_interval = Duration::from_secs(secs.max(1));
        }
        Ok(config)
    }

    /// Sets the heartbeat period, clamped to at least one second.
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval.max(Duration::from_secs(1));
        self
    }
}

/// Keeps the local service registered for as long as it runs.
///
/// [`start`](Self::start) registers and spawns the heartbeat task;
/// [`stop`](Self::stop) cancels the heartbeat and deregisters.
pub struct RegistrationLifecycle {
    registry: Arc<dyn NamingRegistry>,
    registration: InstanceRegistration,
    config: RegistrationConfig,
    heartbeat: Option<JoinHandle<()>>,
}

impl RegistrationLifecycle {
    pub fn new(
        registry: Arc<dyn NamingRegistry>,
        registration: InstanceRegistration,
        config: RegistrationConfig,
    ) -> Self {
        Self {
            registry,
            registration,
            config,
            heartbeat: None,
        }
    }

    pub fn registration(&self) -> &InstanceRegistration {
        &self.registration
    }

    pub fn is_running(&self) -> bool {
        self.heartbeat.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Registers the instance and starts heartbeating. Calling it again
    /// while running does nothing.
    pub async fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }

        self.registry.register_instance(&self.registration).await?;
        self.heartbeat = Some(self.spawn_heartbeat());
        info!(
            service = %self.registration.service,
            interval_secs = self.config.heartbeat_interval.as_secs(),
            "Registration lifecycle started"
        );
        Ok(())
    }

    fn spawn_heartbeat(&self) -> JoinHandle<()> {
        let registry = Arc::clone(&self.registry);
        let registration = self.registration.clone();
        let period = self.config.heartbeat_interval;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // The first tick completes immediately; registration just happened.
            interval.tick().await;

            loop {
                interval.tick().await;
                if let Err(e) = registry.send_heartbeat(&registration).await {
                    warn!(service = %registration.service, error = %e, "Heartbeat failed");
                }
            }
        })
    }

    /// Stops heartbeating and removes the instance from the registry.
    pub async fn stop(&mut self) -> Result<()> {
        if let Some(task) = self.heartbeat.take() {
            task.abort();
            let _ = task.await;
        }
        self.registry.deregister_instance(&self.registration).await?;
        info!(service = %self.registration.service, "Registration lifecycle stopped");
        Ok(())
    }
}

impl Drop for RegistrationLifecycle {
    fn drop(&mut self) {
        if let Some(task) = self.heartbeat.take() {
            task.abort();
        }
    }
}
