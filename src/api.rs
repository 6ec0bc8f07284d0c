//! Backend IaaS client boundary
//!
//! The orchestrator never talks to OpenStack directly; everything goes
//! through [`OpenstackApi`], implemented elsewhere over the real HTTP
//! client. All operations are region-scoped by the implementation and the
//! region is fixed for the lifetime of the client. Calls block for the
//! duration of the remote round-trip.

use serde::{Deserialize, Serialize};

use crate::Result;

/// A backend resource as returned by a listing call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedResource {
    /// Backend-native identifier
    pub id: String,
    /// Human-readable name
    pub name: String,
}

impl NamedResource {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self { id: id.into(), name: name.into() }
    }
}

/// Everything the backend needs to create one server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateServerRequest {
    /// Server name
    pub name: String,
    /// Resolved base image id
    pub image_id: String,
    /// Resolved flavor id
    pub flavor_id: String,
    /// Resolved network id
    pub network_id: String,
    /// Security group name
    pub security_group: String,
    /// Key pair name
    pub key_pair: String,
    /// Availability zone, when the profile pins one
    pub availability_zone: Option<String>,
    /// Boot volume size in GB, 0 for flavor default
    pub volume_size: u64,
    /// Base64-encoded user data handed to cloud-init
    pub user_data: Option<String>,
}

/// Blocking client for the OpenStack compute/network APIs.
///
/// Listing calls materialize the full (paginated) catalog; the catalogs
/// involved are small. A failed call is a transport/backend failure, not
/// a "not found" -- absence is expressed by the returned collections.
#[cfg_attr(test, mockall::automock)]
pub trait OpenstackApi: Send + Sync {
    /// List all base images visible in the region
    fn list_images(&self) -> Result<Vec<NamedResource>>;

    /// List all flavors visible in the region
    fn list_flavors(&self) -> Result<Vec<NamedResource>>;

    /// List all networks visible in the region
    fn list_networks(&self) -> Result<Vec<NamedResource>>;

    /// Create a server, returning its backend id
    fn create_server(&self, request: &CreateServerRequest) -> Result<String>;

    /// Stop a server by backend id
    fn stop_server(&self, server_id: &str) -> Result<()>;

    /// Reboot a server in place by backend id
    fn reboot_server(&self, server_id: &str) -> Result<()>;

    /// First floating IP with no fixed address, if any
    fn available_floating_ip(&self) -> Result<Option<String>>;

    /// Associate a floating IP with a server
    fn associate_floating_ip(&self, server_id: &str, ip: &str) -> Result<()>;
}
