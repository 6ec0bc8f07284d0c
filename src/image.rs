//! Image registry entry: one per catalog profile
//!
//! A `CloudImage` resolves its backend resources exactly once, then spawns
//! and owns the instances started from its profile. An entry is either
//! fully resolved or carries an error; an errored entry refuses every
//! start request for the rest of its life.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use base64::prelude::*;
use parking_lot::RwLock;

use crate::agent::InstanceUserData;
use crate::api::{CreateServerRequest, OpenstackApi};
use crate::catalog::ImageProfile;
use crate::instance::{CloudInstance, InstanceState};
use crate::resolver::{resolve, ResourceKind};
use crate::{CloudErrorInfo, Error, Result};

#[derive(Default)]
struct ImageState {
    network_id: Option<String>,
    error: Option<CloudErrorInfo>,
    initialized: bool,
}

/// Registry entry owning the instances spawned from one profile
pub struct CloudImage {
    profile: ImageProfile,
    api: Arc<dyn OpenstackApi>,
    server_paths: PathBuf,
    state: RwLock<ImageState>,
    instances: RwLock<HashMap<String, Arc<CloudInstance>>>,
    start_counter: AtomicU32,
}

impl CloudImage {
    pub(crate) fn new(
        profile: ImageProfile,
        api: Arc<dyn OpenstackApi>,
        server_paths: impl Into<PathBuf>,
    ) -> Self {
        Self {
            profile,
            api,
            server_paths: server_paths.into(),
            state: RwLock::new(ImageState::default()),
            instances: RwLock::new(HashMap::new()),
            start_counter: AtomicU32::new(0),
        }
    }

    /// Logical profile name, used as the external image id
    pub fn id(&self) -> &str {
        &self.profile.name
    }

    pub fn profile(&self) -> &ImageProfile {
        &self.profile
    }

    /// Resolved network id, `None` until initialization succeeds
    pub fn network_id(&self) -> Option<String> {
        self.state.read().network_id.clone()
    }

    /// Entry-level error, `None` while healthy
    pub fn error_info(&self) -> Option<CloudErrorInfo> {
        self.state.read().error.clone()
    }

    /// Whether the entry resolved successfully and accepts starts
    pub fn is_ready(&self) -> bool {
        let state = self.state.read();
        state.initialized && state.error.is_none()
    }

    /// Resolve backend resources for this entry, exactly once.
    ///
    /// Every failure is captured as entry-level error state; nothing
    /// escapes this boundary, so one bad entry cannot abort the
    /// initialization loop over its siblings. A second call after either
    /// outcome is a no-op.
    pub fn initialize(&self) {
        {
            let state = self.state.read();
            if state.initialized || state.error.is_some() {
                return;
            }
        }

        if let Err(e) = self.validate_profile() {
            self.record_error(CloudErrorInfo::from(&e));
            return;
        }

        match resolve(self.api.as_ref(), ResourceKind::Network, &self.profile.network) {
            Ok(Some(network_id)) => {
                tracing::info!(
                    image = %self.profile.name,
                    network = %self.profile.network,
                    network_id = %network_id,
                    "Image initialized"
                );
                let mut state = self.state.write();
                state.network_id = Some(network_id);
                state.initialized = true;
            }
            Ok(None) => {
                self.record_error(CloudErrorInfo::new(format!(
                    "no network named '{}' found in the backend",
                    self.profile.network
                )));
            }
            Err(e) => {
                self.record_error(CloudErrorInfo::new(format!(
                    "network resolution failed: {}",
                    e
                )));
            }
        }
    }

    /// Start a new server from this profile.
    ///
    /// Image and flavor names are resolved fresh on every start; only the
    /// network id is pinned at initialization. Floating-IP association is
    /// best effort: a failure leaves the instance running without one and
    /// records a warning on the handle.
    pub fn start_new_instance(&self, user_data: &InstanceUserData) -> Result<Arc<CloudInstance>> {
        let network_id = {
            let state = self.state.read();
            if let Some(ref error) = state.error {
                return Err(Error::ImageInError {
                    image: self.profile.name.clone(),
                    message: error.message.clone(),
                });
            }
            match state.network_id {
                Some(ref id) if state.initialized => id.clone(),
                _ => return Err(Error::ImageNotInitialized(self.profile.name.clone())),
            }
        };

        let image_id = resolve(self.api.as_ref(), ResourceKind::Image, &self.profile.image)?
            .ok_or_else(|| Error::ResourceNotFound {
                kind: "image",
                name: self.profile.image.clone(),
            })?;
        let flavor_id = resolve(self.api.as_ref(), ResourceKind::Flavor, &self.profile.flavor)?
            .ok_or_else(|| Error::ResourceNotFound {
                kind: "flavor",
                name: self.profile.flavor.clone(),
            })?;

        let (script, script_warning) = self.read_user_script();

        let seq = self.start_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let server_name = format!("{}-{}", self.profile.name, seq);
        let instance = Arc::new(CloudInstance::new(
            server_name.clone(),
            self.profile.name.clone(),
            Arc::clone(&self.api),
            user_data,
        ));
        instance.set_state(InstanceState::Starting);

        let request = CreateServerRequest {
            name: server_name.clone(),
            image_id,
            flavor_id,
            network_id,
            security_group: self.profile.security_group.clone(),
            key_pair: self.profile.key_pair.clone(),
            availability_zone: match self.profile.availability_zone.as_str() {
                "" => None,
                zone => Some(zone.to_string()),
            },
            volume_size: self.profile.volume_size,
            user_data: encode_user_data(user_data, &script)?,
        };

        tracing::info!(image = %self.profile.name, server = %server_name, "Creating server");
        let server_id = self.api.create_server(&request)?;

        instance.assign_server_id(&server_id);
        self.instances.write().insert(server_id.clone(), Arc::clone(&instance));
        if let Some(warning) = script_warning {
            instance.record_warning(warning);
        }

        if self.profile.auto_floating_ip {
            self.associate_floating_ip(&instance, &server_id);
        }

        instance.set_state(InstanceState::Running);
        tracing::info!(image = %self.profile.name, instance = %server_id, "Instance running");
        Ok(instance)
    }

    /// Snapshot of the owned instances
    pub fn instances(&self) -> Vec<Arc<CloudInstance>> {
        self.instances.read().values().cloned().collect()
    }

    pub fn instance_count(&self) -> usize {
        self.instances.read().len()
    }

    pub fn find_instance_by_id(&self, instance_id: &str) -> Option<Arc<CloudInstance>> {
        self.instances.read().get(instance_id).cloned()
    }

    /// Stop an owned instance and prune it from the registry on success.
    /// A failed stop leaves the handle registered in `Error` state.
    pub fn terminate_instance(&self, instance_id: &str) -> Result<()> {
        let instance = self
            .find_instance_by_id(instance_id)
            .ok_or_else(|| Error::InstanceNotFound(instance_id.to_string()))?;

        instance.stop()?;
        self.instances.write().remove(instance_id);
        Ok(())
    }

    /// Request stop on every owned instance and drop the registry
    pub fn dispose(&self) {
        let instances = {
            let mut map = self.instances.write();
            map.drain().collect::<Vec<_>>()
        };
        for (id, instance) in instances {
            if let Err(e) = instance.stop() {
                tracing::warn!(image = %self.profile.name, instance = %id, error = %e, "Stop on dispose failed");
            }
        }
    }

    fn validate_profile(&self) -> Result<()> {
        let p = &self.profile;
        for (field, value) in [
            ("image", &p.image),
            ("flavor", &p.flavor),
            ("network", &p.network),
            ("security_group", &p.security_group),
            ("key_pair", &p.key_pair),
        ] {
            if value.trim().is_empty() {
                return Err(Error::Catalog(format!(
                    "image '{}': missing required field '{}'",
                    p.name, field
                )));
            }
        }
        Ok(())
    }

    // Missing or unreadable script degrades to an empty one; leniency
    // for partially specified profiles, kept from the observed behavior.
    fn read_user_script(&self) -> (String, Option<String>) {
        if self.profile.user_script.is_empty() {
            return (String::new(), None);
        }
        let path = resolve_script_path(&self.server_paths, &self.profile.user_script);
        match std::fs::read_to_string(&path) {
            Ok(script) => (script, None),
            Err(e) => (
                String::new(),
                Some(format!("user script {:?} not readable: {}", path, e)),
            ),
        }
    }

    fn associate_floating_ip(&self, instance: &CloudInstance, server_id: &str) {
        match self.api.available_floating_ip() {
            Ok(Some(ip)) => match self.api.associate_floating_ip(server_id, &ip) {
                Ok(()) => {
                    tracing::info!(instance = %server_id, ip = %ip, "Floating IP associated");
                    instance.set_floating_ip(ip);
                }
                Err(e) => {
                    instance.record_warning(format!("floating IP association failed: {}", e));
                }
            },
            Ok(None) => {
                instance.record_warning("no floating IP available".to_string());
            }
            Err(e) => {
                instance.record_warning(format!("floating IP lookup failed: {}", e));
            }
        }
    }

    fn record_error(&self, error: CloudErrorInfo) {
        tracing::error!(image = %self.profile.name, "{}", error);
        self.state.write().error = Some(error);
    }
}

fn resolve_script_path(server_paths: &Path, script: &str) -> PathBuf {
    let path = Path::new(script);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        server_paths.join(path)
    }
}

fn encode_user_data(user_data: &InstanceUserData, script: &str) -> Result<Option<String>> {
    let payload = serde_json::json!({
        "parameters": user_data,
        "script": script,
    });
    Ok(Some(BASE64_STANDARD.encode(serde_json::to_string(&payload)?)))
}
