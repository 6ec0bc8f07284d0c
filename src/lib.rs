//! OpenStack instance orchestrator for build/test automation agents
//!
//! Given a YAML catalog of image profiles (base image, flavor, network,
//! security group, key pair, optional startup script and volume size),
//! this library resolves logical names to backend identifiers, launches
//! and terminates instances on demand, associates floating IPs
//! best-effort, enforces a global instance cap and keeps an in-memory
//! registry the automation controller can query at any time, including
//! mid-initialization.
//!
//! The backend itself is consumed through the [`OpenstackApi`] trait and
//! never implemented here.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use openstack_agents::{ClientParameters, CloudClient, InstanceUserData, OpenstackApi};
//!
//! # fn connect() -> Arc<dyn OpenstackApi> { unimplemented!() }
//! let api: Arc<dyn OpenstackApi> = connect();
//! let catalog = std::fs::read_to_string("images.yaml")?;
//!
//! let client = CloudClient::new(
//!     ClientParameters::new(catalog).instance_cap(10),
//!     api,
//! );
//! client.is_initialized();
//!
//! if client.can_start_new_instance() {
//!     let data = InstanceUserData::new("agent-1", "token", "https://ci.local", "web");
//!     let instance = client.start_new_instance("web", &data)?;
//!     println!("started {}", instance.instance_id());
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod agent;
pub mod api;
pub mod catalog;
pub mod client;
pub mod error;
pub mod image;
pub mod instance;
pub mod resolver;

pub use agent::{AgentDescription, InstanceUserData};
pub use api::{CreateServerRequest, NamedResource, OpenstackApi};
pub use catalog::{parse_catalog, ImageProfile};
pub use client::{CanStartResult, ClientParameters, CloudClient};
pub use error::{CloudErrorInfo, Error, Result};
pub use image::CloudImage;
pub use instance::{CloudInstance, InstanceState};
pub use resolver::{resolve, ResourceKind};
