//! Logical name to backend id resolution
//!
//! Each call is a fresh backend query; nothing is cached here. Callers
//! that need a stable id (the image registry does, for networks) store
//! the resolved value themselves.

use crate::api::OpenstackApi;
use crate::Result;

/// Kinds of backend resources that can be resolved by name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Image,
    Flavor,
    Network,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Image => "image",
            ResourceKind::Flavor => "flavor",
            ResourceKind::Network => "network",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolve a logical name to a backend id.
///
/// Returns `Ok(None)` when no resource of that kind carries the name
/// (including an empty backend listing); a miss is the caller's call to
/// judge, not an error. `Err` is reserved for backend failures.
pub fn resolve(api: &dyn OpenstackApi, kind: ResourceKind, name: &str) -> Result<Option<String>> {
    let resources = match kind {
        ResourceKind::Image => api.list_images()?,
        ResourceKind::Flavor => api.list_flavors()?,
        ResourceKind::Network => api.list_networks()?,
    };
    Ok(resources.into_iter().find(|r| r.name == name).map(|r| r.id))
}
