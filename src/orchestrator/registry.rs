//! Instance registry: identifier-keyed routing of lifecycle commands.
//!
//! The map is built once and never mutated afterwards, so lookups need no
//! lock. Each instance serializes its own control operations; calls for
//! different instances proceed in parallel. The registry never spawns
//! tasks of its own.

use std::collections::HashMap;

use tracing::{error, info, info_span, warn, Instrument};

use super::instance::{LifecycleSettings, ManagedInstance};
use crate::config::{ensure_unique_ids, InstanceConfig};
use crate::models::instance::InstanceStatus;
use crate::{AppError, Result};

/// Identifier → instance mapping.
#[derive(Debug)]
pub struct InstanceRegistry {
    instances: HashMap<String, ManagedInstance>,
}

impl InstanceRegistry {
    /// Build a registry without starting anything.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if two records share an id.
    pub fn new(configs: Vec<InstanceConfig>, settings: LifecycleSettings) -> Result<Self> {
        ensure_unique_ids(&configs)?;
        let instances = configs
            .into_iter()
            .map(|config| {
                let id = config.id.clone();
                (id, ManagedInstance::new(config, settings))
            })
            .collect();
        Ok(Self { instances })
    }

    /// Build a registry and start every enabled instance.
    ///
    /// Start failures are logged and leave the instance stopped; they do
    /// not abort initialization.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if two records share an id.
    pub async fn initialize(
        configs: Vec<InstanceConfig>,
        settings: LifecycleSettings,
    ) -> Result<Self> {
        let span = info_span!("registry_initialize", records = configs.len());
        async move {
            let registry = Self::new(configs, settings)?;

            for id in registry.ids() {
                let Some(instance) = registry.instances.get(&id) else {
                    continue;
                };
                if !instance.config().enabled {
                    info!(id = %id, "instance disabled, not starting");
                    continue;
                }
                info!(id = %id, "auto-starting enabled instance");
                if let Err(err) = instance.start().await {
                    error!(id = %id, %err, "initial start failed");
                }
            }

            info!(
                total = registry.total_count(),
                running = registry.running_count(),
                "registry initialized"
            );
            Ok(registry)
        }
        .instrument(span)
        .await
    }

    /// Stop every instance that is still alive, in id order.
    ///
    /// Each stop can block for the full grace periods. Failures are logged
    /// and do not stop the sweep.
    pub async fn shutdown(&self) {
        let span = info_span!("registry_shutdown");
        async {
            for instance in self.instances().into_iter().filter(|i| i.is_alive()) {
                info!(id = %instance.id(), "stopping instance");
                if let Err(err) = instance.stop().await {
                    warn!(id = %instance.id(), %err, "instance did not stop cleanly");
                }
            }
            info!("registry shut down");
        }
        .instrument(span)
        .await;
    }

    /// Look up an instance.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&ManagedInstance> {
        self.instances.get(id)
    }

    /// All instances, ordered by id.
    #[must_use]
    pub fn instances(&self) -> Vec<&ManagedInstance> {
        let mut all: Vec<&ManagedInstance> = self.instances.values().collect();
        all.sort_by(|a, b| a.id().cmp(b.id()));
        all
    }

    /// All ids, sorted.
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.instances.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of instances with a live process.
    #[must_use]
    pub fn running_count(&self) -> usize {
        self.instances.values().filter(|i| i.is_alive()).count()
    }

    /// Number of registered instances.
    #[must_use]
    pub fn total_count(&self) -> usize {
        self.instances.len()
    }

    /// Status snapshots, ordered by id.
    #[must_use]
    pub fn statuses(&self) -> Vec<InstanceStatus> {
        self.instances()
            .into_iter()
            .map(ManagedInstance::status)
            .collect()
    }

    /// Status snapshot for one instance.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown id.
    pub fn status(&self, id: &str) -> Result<InstanceStatus> {
        Ok(self.lookup(id)?.status())
    }

    /// Console tail for one instance; `0` lines means everything retained.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown id.
    pub fn console(&self, id: &str, lines: usize) -> Result<Vec<String>> {
        Ok(self.lookup(id)?.console(lines))
    }

    /// Start one instance.
    ///
    /// # Errors
    ///
    /// `AppError::NotFound` for an unknown id, otherwise see
    /// [`ManagedInstance::start`].
    pub async fn start(&self, id: &str) -> Result<()> {
        self.lookup(id)?.start().await
    }

    /// Stop one instance.
    ///
    /// # Errors
    ///
    /// `AppError::NotFound` for an unknown id, otherwise see
    /// [`ManagedInstance::stop`].
    pub async fn stop(&self, id: &str) -> Result<()> {
        self.lookup(id)?.stop().await
    }

    /// Restart one instance.
    ///
    /// # Errors
    ///
    /// `AppError::NotFound` for an unknown id, otherwise see
    /// [`ManagedInstance::restart`].
    pub async fn restart(&self, id: &str) -> Result<()> {
        self.lookup(id)?.restart().await
    }

    /// Force kill one instance.
    ///
    /// # Errors
    ///
    /// `AppError::NotFound` for an unknown id, otherwise see
    /// [`ManagedInstance::kill`].
    pub async fn kill(&self, id: &str) -> Result<()> {
        self.lookup(id)?.kill().await
    }

    /// Permanently stop one instance.
    ///
    /// # Errors
    ///
    /// `AppError::NotFound` for an unknown id, otherwise see
    /// [`ManagedInstance::stop_permanently`].
    pub async fn stop_permanently(&self, id: &str) -> Result<()> {
        self.lookup(id)?.stop_permanently().await
    }

    /// Clear the permanently-stopped flag of one instance.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown id.
    pub fn resume(&self, id: &str) -> Result<()> {
        self.lookup(id)?.resume();
        Ok(())
    }

    fn lookup(&self, id: &str) -> Result<&ManagedInstance> {
        self.instances.get(id).ok_or_else(|| {
            error!(id, "instance not found");
            AppError::NotFound(format!("instance {id}"))
        })
    }
}
