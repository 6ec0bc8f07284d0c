//! Agent bootstrap metadata and agent-to-instance matching
//!
//! Every started instance carries configuration parameters that the build
//! agent echoes back once it connects. [`crate::CloudClient::find_instance_by_agent`]
//! uses the cloud-type marker plus the recorded instance id to pair an
//! agent with the instance that spawned it.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Marker value identifying instances provisioned by this orchestrator
pub const CLOUD_TYPE: &str = "openstack";

/// Agent configuration parameter carrying the cloud-type marker
pub const CLOUD_TYPE_PARAM: &str = "openstack.cloud.type";

/// Agent configuration parameter carrying the backend server id
pub const INSTANCE_ID_PARAM: &str = "openstack.instance.id";

/// Per-start bootstrap metadata for the agent that will run on the
/// new instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceUserData {
    /// Name the agent should register under
    pub agent_name: String,
    /// One-time authorization token for the controller
    pub auth_token: String,
    /// Controller URL the agent connects back to
    pub server_url: String,
    /// Cloud profile the start request came from
    pub profile_id: String,
    /// Extra configuration parameters to stamp onto the agent
    pub custom_parameters: HashMap<String, String>,
}

impl InstanceUserData {
    pub fn new(
        agent_name: impl Into<String>,
        auth_token: impl Into<String>,
        server_url: impl Into<String>,
        profile_id: impl Into<String>,
    ) -> Self {
        Self {
            agent_name: agent_name.into(),
            auth_token: auth_token.into(),
            server_url: server_url.into(),
            profile_id: profile_id.into(),
            custom_parameters: HashMap::new(),
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_parameters.insert(key.into(), value.into());
        self
    }
}

/// Description of a connected agent, as reported by the controller
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentDescription {
    /// Configuration parameters the agent was stamped with at boot
    pub configuration_parameters: HashMap<String, String>,
}

impl AgentDescription {
    pub fn new(configuration_parameters: HashMap<String, String>) -> Self {
        Self { configuration_parameters }
    }

    /// Whether the agent carries this orchestrator's cloud-type marker
    pub fn has_cloud_marker(&self) -> bool {
        self.configuration_parameters.values().any(|v| v == CLOUD_TYPE)
    }

    /// Backend instance id recorded in the agent's parameters, if any
    pub fn instance_id(&self) -> Option<&str> {
        self.configuration_parameters.get(INSTANCE_ID_PARAM).map(String::as_str)
    }
}
