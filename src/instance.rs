//! Instance handle: one live (or terminating) server

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::agent::{InstanceUserData, CLOUD_TYPE, CLOUD_TYPE_PARAM, INSTANCE_ID_PARAM};
use crate::api::OpenstackApi;
use crate::{Error, Result};

/// Lifecycle state of an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    ScheduledToStart,
    Starting,
    Running,
    Restarting,
    Stopping,
    Stopped,
    Error,
}

impl std::fmt::Display for InstanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstanceState::ScheduledToStart => write!(f, "ScheduledToStart"),
            InstanceState::Starting => write!(f, "Starting"),
            InstanceState::Running => write!(f, "Running"),
            InstanceState::Restarting => write!(f, "Restarting"),
            InstanceState::Stopping => write!(f, "Stopping"),
            InstanceState::Stopped => write!(f, "Stopped"),
            InstanceState::Error => write!(f, "Error"),
        }
    }
}

/// Handle for one server spawned from an image profile.
///
/// Owned exclusively by the [`crate::CloudImage`] that started it; the
/// back-reference to that image is the image id, never a second owner.
/// Before the backend acknowledges creation the handle carries a
/// temporary `pending-` local id.
pub struct CloudInstance {
    instance_id: RwLock<String>,
    name: String,
    image_id: String,
    api: Arc<dyn OpenstackApi>,
    state: RwLock<InstanceState>,
    last_error: RwLock<Option<String>>,
    last_warning: RwLock<Option<String>>,
    floating_ip: RwLock<Option<String>>,
    agent_parameters: RwLock<HashMap<String, String>>,
    started_at: DateTime<Utc>,
}

impl std::fmt::Debug for CloudInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudInstance")
            .field("instance_id", &*self.instance_id.read())
            .field("name", &self.name)
            .field("image_id", &self.image_id)
            .field("state", &*self.state.read())
            .field("last_error", &*self.last_error.read())
            .field("last_warning", &*self.last_warning.read())
            .field("floating_ip", &*self.floating_ip.read())
            .field("agent_parameters", &*self.agent_parameters.read())
            .field("started_at", &self.started_at)
            .finish()
    }
}

impl CloudInstance {
    pub(crate) fn new(
        name: impl Into<String>,
        image_id: impl Into<String>,
        api: Arc<dyn OpenstackApi>,
        user_data: &InstanceUserData,
    ) -> Self {
        let mut agent_parameters = user_data.custom_parameters.clone();
        agent_parameters.insert(CLOUD_TYPE_PARAM.to_string(), CLOUD_TYPE.to_string());

        Self {
            instance_id: RwLock::new(format!("pending-{}", uuid::Uuid::new_v4())),
            name: name.into(),
            image_id: image_id.into(),
            api,
            state: RwLock::new(InstanceState::ScheduledToStart),
            last_error: RwLock::new(None),
            last_warning: RwLock::new(None),
            floating_ip: RwLock::new(None),
            agent_parameters: RwLock::new(agent_parameters),
            started_at: Utc::now(),
        }
    }

    /// Backend server id, or the temporary local id while pending
    pub fn instance_id(&self) -> String {
        self.instance_id.read().clone()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Id of the owning image entry (non-owning back-reference)
    pub fn image_id(&self) -> &str {
        &self.image_id
    }

    pub fn state(&self) -> InstanceState {
        *self.state.read()
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    /// Last best-effort degradation, e.g. a failed floating-IP attach
    pub fn last_warning(&self) -> Option<String> {
        self.last_warning.read().clone()
    }

    pub fn floating_ip(&self) -> Option<String> {
        self.floating_ip.read().clone()
    }

    /// Parameters stamped onto the agent booting on this instance
    pub fn agent_parameters(&self) -> HashMap<String, String> {
        self.agent_parameters.read().clone()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Stop the server. Failure transitions the handle to `Error` and is
    /// returned to the caller; no retry happens here.
    pub fn stop(&self) -> Result<()> {
        if self.state() == InstanceState::Stopped {
            return Ok(());
        }

        let id = self.instance_id();
        self.set_state(InstanceState::Stopping);
        tracing::info!(instance = %id, image = %self.image_id, "Stopping instance");

        match self.api.stop_server(&id) {
            Ok(()) => {
                self.set_state(InstanceState::Stopped);
                Ok(())
            }
            Err(e) => {
                self.record_error(format!("stop failed: {}", e));
                Err(e)
            }
        }
    }

    /// Reboot the server in place. Only valid from `Running`; failure
    /// leaves the handle in `Error`, it does not revert to `Running`.
    pub fn restart(&self) -> Result<()> {
        let current = self.state();
        if current != InstanceState::Running {
            return Err(Error::InvalidState {
                current: current.to_string(),
                expected: InstanceState::Running.to_string(),
            });
        }

        let id = self.instance_id();
        self.set_state(InstanceState::Restarting);
        tracing::info!(instance = %id, image = %self.image_id, "Restarting instance");

        match self.api.reboot_server(&id) {
            Ok(()) => {
                self.set_state(InstanceState::Running);
                Ok(())
            }
            Err(e) => {
                self.record_error(format!("restart failed: {}", e));
                Err(e)
            }
        }
    }

    pub(crate) fn set_state(&self, state: InstanceState) {
        *self.state.write() = state;
    }

    pub(crate) fn record_error(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::error!(instance = %self.instance_id(), image = %self.image_id, "{}", message);
        *self.last_error.write() = Some(message);
        self.set_state(InstanceState::Error);
    }

    pub(crate) fn record_warning(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(instance = %self.instance_id(), image = %self.image_id, "{}", message);
        *self.last_warning.write() = Some(message);
    }

    /// Promote the handle from its pending local id to the backend id
    pub(crate) fn assign_server_id(&self, server_id: &str) {
        *self.instance_id.write() = server_id.to_string();
        self.agent_parameters
            .write()
            .insert(INSTANCE_ID_PARAM.to_string(), server_id.to_string());
    }

    pub(crate) fn set_floating_ip(&self, ip: String) {
        *self.floating_ip.write() = Some(ip);
    }
}
