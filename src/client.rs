//! Client orchestrator: catalog to registry, cap enforcement, routing
//!
//! Construction parses the profile catalog and schedules one background
//! thread that initializes every image entry in catalog order after a
//! short delay. Everything else runs synchronously on the caller's thread
//! and may block for the duration of a backend round-trip.

use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use crate::agent::{AgentDescription, InstanceUserData};
use crate::api::OpenstackApi;
use crate::catalog::parse_catalog;
use crate::image::CloudImage;
use crate::instance::CloudInstance;
use crate::{CloudErrorInfo, Error, Result};

/// Fixed delay before the one-shot initialization pass starts
const DEFAULT_INIT_DELAY: Duration = Duration::from_secs(1);

/// Default wait budget per image entry in [`CloudClient::is_initialized`]
const DEFAULT_INIT_BUDGET_PER_IMAGE: Duration = Duration::from_secs(3);

/// Construction parameters for [`CloudClient`]
#[derive(Debug, Clone)]
pub struct ClientParameters {
    /// Raw YAML profile catalog
    pub catalog: String,
    /// Global cap on concurrently tracked instances, `None` for unlimited
    pub instance_cap: Option<usize>,
    /// Directory user-script references are resolved against
    pub server_paths: PathBuf,
    /// Delay before background initialization starts
    pub init_delay: Duration,
    /// Wait budget per image entry in [`CloudClient::is_initialized`]
    pub init_budget_per_image: Duration,
}

impl ClientParameters {
    pub fn new(catalog: impl Into<String>) -> Self {
        Self {
            catalog: catalog.into(),
            instance_cap: None,
            server_paths: PathBuf::from("."),
            init_delay: DEFAULT_INIT_DELAY,
            init_budget_per_image: DEFAULT_INIT_BUDGET_PER_IMAGE,
        }
    }

    pub fn instance_cap(mut self, cap: usize) -> Self {
        self.instance_cap = Some(cap);
        self
    }

    pub fn server_paths(mut self, paths: impl Into<PathBuf>) -> Self {
        self.server_paths = paths.into();
        self
    }

    pub fn init_delay(mut self, delay: Duration) -> Self {
        self.init_delay = delay;
        self
    }

    pub fn init_budget_per_image(mut self, budget: Duration) -> Self {
        self.init_budget_per_image = budget;
        self
    }
}

/// Answer of [`CloudClient::can_start_new_instance_with_details`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CanStartResult {
    Yes,
    No(String),
}

impl CanStartResult {
    pub fn possible(&self) -> bool {
        matches!(self, CanStartResult::Yes)
    }
}

struct InitHandle {
    done_rx: Option<mpsc::Receiver<()>>,
    thread: Option<thread::JoinHandle<()>>,
}

/// Orchestrator owning every image registry entry
pub struct CloudClient {
    images: RwLock<Vec<Arc<CloudImage>>>,
    error_info: Option<CloudErrorInfo>,
    instance_cap: Option<usize>,
    init_budget_per_image: Duration,
    init: Mutex<InitHandle>,
}

impl CloudClient {
    /// Build the registry from a profile catalog.
    ///
    /// A structural catalog error never panics or escapes: it is recorded
    /// as the client-level error and the registry stays empty. Otherwise
    /// one entry per profile is created in catalog order and the one-shot
    /// initialization thread is scheduled.
    pub fn new(params: ClientParameters, api: Arc<dyn OpenstackApi>) -> Self {
        let profiles = match parse_catalog(&params.catalog) {
            Ok(profiles) => profiles,
            Err(e) => {
                tracing::error!(error = %e, "Catalog rejected");
                return Self {
                    images: RwLock::new(Vec::new()),
                    error_info: Some(CloudErrorInfo::from(&e)),
                    instance_cap: params.instance_cap,
                    init_budget_per_image: params.init_budget_per_image,
                    init: Mutex::new(InitHandle { done_rx: None, thread: None }),
                };
            }
        };

        let images: Vec<Arc<CloudImage>> = profiles
            .into_iter()
            .map(|profile| {
                tracing::info!(image = %profile.name, "Adding cloud image");
                Arc::new(CloudImage::new(profile, Arc::clone(&api), &params.server_paths))
            })
            .collect();

        let (done_tx, done_rx) = mpsc::channel();
        let init_images = images.clone();
        let delay = params.init_delay;
        let thread = thread::spawn(move || {
            thread::sleep(delay);
            for image in &init_images {
                image.initialize();
            }
            let _ = done_tx.send(());
        });

        Self {
            images: RwLock::new(images),
            error_info: None,
            instance_cap: params.instance_cap,
            init_budget_per_image: params.init_budget_per_image,
            init: Mutex::new(InitHandle { done_rx: Some(done_rx), thread: Some(thread) }),
        }
    }

    /// Block until the one-shot initialization pass finishes, bounded by
    /// a budget proportional to the number of entries.
    ///
    /// Always returns `true`: initialization is "attempted", not
    /// necessarily "succeeded". A timeout is logged and swallowed so the
    /// controller's startup path is never held hostage; entries that
    /// failed (or are still pending) carry their own state.
    pub fn is_initialized(&self) -> bool {
        let mut init = self.init.lock();
        if let Some(rx) = init.done_rx.as_ref() {
            let budget = self.init_budget_per_image * self.images.read().len().max(1) as u32;
            match rx.recv_timeout(budget) {
                Ok(()) => {
                    init.done_rx = None;
                    if let Some(handle) = init.thread.take() {
                        let _ = handle.join();
                    }
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    tracing::warn!(budget = ?budget, "Initialization still running, proceeding anyway");
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    tracing::error!("Initialization task ended without completing");
                    init.done_rx = None;
                    init.thread = None;
                }
            }
        }
        true
    }

    /// Catalog-level error, if construction rejected the catalog.
    /// Per-image errors are not surfaced here; inspect the entries.
    pub fn error_info(&self) -> Option<CloudErrorInfo> {
        self.error_info.clone()
    }

    /// Snapshot of the registry, in catalog order
    pub fn get_images(&self) -> Vec<Arc<CloudImage>> {
        self.images.read().clone()
    }

    pub fn find_image_by_id(&self, image_id: &str) -> Option<Arc<CloudImage>> {
        self.images.read().iter().find(|i| i.id() == image_id).cloned()
    }

    /// Pair a connected agent with the instance that spawned it.
    ///
    /// Matches only when the agent carries the cloud-type marker *and*
    /// its recorded instance id belongs to a registered instance.
    pub fn find_instance_by_agent(&self, agent: &AgentDescription) -> Option<Arc<CloudInstance>> {
        if !agent.has_cloud_marker() {
            return None;
        }
        let wanted = agent.instance_id()?;
        self.images
            .read()
            .iter()
            .find_map(|image| image.find_instance_by_id(wanted))
    }

    /// Sum of tracked instances across all entries
    pub fn total_instance_count(&self) -> usize {
        self.images.read().iter().map(|i| i.instance_count()).sum()
    }

    /// Whether the global cap leaves room for one more instance.
    ///
    /// Point-in-time check with no reservation: a concurrent caller can
    /// pass the same check and both starts can succeed, transiently
    /// exceeding the cap. Accepted trade-off, not an invariant.
    pub fn can_start_new_instance(&self) -> bool {
        match self.instance_cap {
            None => true,
            Some(cap) => self.total_instance_count() < cap,
        }
    }

    pub fn can_start_new_instance_with_details(&self) -> CanStartResult {
        if self.can_start_new_instance() {
            CanStartResult::Yes
        } else {
            CanStartResult::No("Instance cap exceeded".to_string())
        }
    }

    /// Route a start request to its image entry
    pub fn start_new_instance(
        &self,
        image_id: &str,
        user_data: &InstanceUserData,
    ) -> Result<Arc<CloudInstance>> {
        let image = self
            .find_image_by_id(image_id)
            .ok_or_else(|| Error::ImageNotFound(image_id.to_string()))?;
        image.start_new_instance(user_data)
    }

    /// Reboot an instance in place
    pub fn restart_instance(&self, instance: &CloudInstance) -> Result<()> {
        instance.restart()
    }

    /// Stop an instance and prune it from its owning entry on success
    pub fn terminate_instance(&self, instance: &CloudInstance) -> Result<()> {
        let image = self
            .find_image_by_id(instance.image_id())
            .ok_or_else(|| Error::ImageNotFound(instance.image_id().to_string()))?;
        image.terminate_instance(&instance.instance_id())
    }

    /// Dispose every entry and clear the registry.
    ///
    /// The initialization thread cannot be cancelled mid-call; it is
    /// detached and its remaining work acts on entries nobody references.
    pub fn dispose(&self) {
        let images = std::mem::take(&mut *self.images.write());
        for image in &images {
            image.dispose();
        }

        let mut init = self.init.lock();
        init.done_rx = None;
        init.thread = None;
        tracing::info!("Cloud client disposed");
    }
}
