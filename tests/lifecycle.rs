//! End-to-end lifecycle tests against an in-memory backend

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use openstack_agents::{
    agent, AgentDescription, CanStartResult, ClientParameters, CloudClient, CreateServerRequest,
    Error, InstanceState, InstanceUserData, NamedResource, OpenstackApi, Result,
};

/// In-memory stand-in for the OpenStack backend
#[derive(Default)]
struct FakeBackend {
    images: Vec<NamedResource>,
    flavors: Vec<NamedResource>,
    networks: Vec<NamedResource>,
    floating_ips: Mutex<Vec<String>>,
    servers: Mutex<HashMap<String, CreateServerRequest>>,
    stopped: Mutex<HashSet<String>>,
    rebooted: Mutex<Vec<String>>,
    counter: AtomicU32,
}

impl FakeBackend {
    fn standard() -> Self {
        Self {
            images: vec![NamedResource::new("img-1", "ubuntu-20.04")],
            flavors: vec![NamedResource::new("f-1", "m1.small")],
            networks: vec![NamedResource::new("net-abc123", "net1")],
            ..Default::default()
        }
    }

    fn with_floating_ips(self, ips: &[&str]) -> Self {
        *self.floating_ips.lock() = ips.iter().map(|s| s.to_string()).collect();
        self
    }

    fn stopped_servers(&self) -> HashSet<String> {
        self.stopped.lock().clone()
    }
}

impl OpenstackApi for FakeBackend {
    fn list_images(&self) -> Result<Vec<NamedResource>> {
        Ok(self.images.clone())
    }

    fn list_flavors(&self) -> Result<Vec<NamedResource>> {
        Ok(self.flavors.clone())
    }

    fn list_networks(&self) -> Result<Vec<NamedResource>> {
        Ok(self.networks.clone())
    }

    fn create_server(&self, request: &CreateServerRequest) -> Result<String> {
        let id = format!("srv-{}", self.counter.fetch_add(1, Ordering::SeqCst) + 1);
        self.servers.lock().insert(id.clone(), request.clone());
        Ok(id)
    }

    fn stop_server(&self, server_id: &str) -> Result<()> {
        if !self.servers.lock().contains_key(server_id) {
            return Err(Error::Backend(format!("no server {}", server_id)));
        }
        self.stopped.lock().insert(server_id.to_string());
        Ok(())
    }

    fn reboot_server(&self, server_id: &str) -> Result<()> {
        if !self.servers.lock().contains_key(server_id) {
            return Err(Error::Backend(format!("no server {}", server_id)));
        }
        self.rebooted.lock().push(server_id.to_string());
        Ok(())
    }

    fn available_floating_ip(&self) -> Result<Option<String>> {
        Ok(self.floating_ips.lock().first().cloned())
    }

    fn associate_floating_ip(&self, server_id: &str, ip: &str) -> Result<()> {
        if !self.servers.lock().contains_key(server_id) {
            return Err(Error::Backend(format!("no server {}", server_id)));
        }
        self.floating_ips.lock().retain(|candidate| candidate != ip);
        Ok(())
    }
}

const TWO_PROFILES: &str = "\
web:
  image: ubuntu-20.04
  flavor: m1.small
  network: net1
  security_group: default
  key_pair: kp1
worker:
  image: ubuntu-20.04
  flavor: m1.small
  network: net1
  security_group: default
  key_pair: kp1
";

fn client_with(catalog: &str, cap: Option<usize>, backend: Arc<FakeBackend>) -> CloudClient {
    let mut params = ClientParameters::new(catalog).init_delay(Duration::from_millis(0));
    if let Some(cap) = cap {
        params = params.instance_cap(cap);
    }
    let client = CloudClient::new(params, backend);
    assert!(client.is_initialized());
    client
}

fn user_data(profile: &str) -> InstanceUserData {
    InstanceUserData::new(
        format!("agent-{}", profile),
        "secret-token",
        "https://ci.local",
        profile,
    )
}

#[test]
fn resolves_catalog_against_backend() {
    let backend = Arc::new(FakeBackend::standard());
    let client = client_with(TWO_PROFILES, None, backend);

    let web = client.find_image_by_id("web").unwrap();
    assert!(web.error_info().is_none());
    assert_eq!(web.network_id().as_deref(), Some("net-abc123"));
}

#[test]
fn unknown_network_marks_entry_but_not_client() {
    let catalog = "\
web:
  image: ubuntu-20.04
  flavor: m1.small
  network: net1
  security_group: default
  key_pair: kp1
";
    let backend = Arc::new(FakeBackend {
        networks: vec![],
        ..FakeBackend::standard()
    });
    let client = client_with(catalog, None, backend);

    let web = client.find_image_by_id("web").unwrap();
    assert!(web.error_info().unwrap().message.contains("net1"));
    assert!(client.error_info().is_none());

    let err = client.start_new_instance("web", &user_data("web")).unwrap_err();
    assert!(matches!(err, Error::ImageInError { .. }));
}

#[test]
fn start_creates_server_with_resolved_ids() {
    let backend = Arc::new(FakeBackend::standard());
    let client = client_with(TWO_PROFILES, None, Arc::clone(&backend));

    let instance = client.start_new_instance("web", &user_data("web")).unwrap();
    assert_eq!(instance.state(), InstanceState::Running);

    let servers = backend.servers.lock();
    let request = servers.get(&instance.instance_id()).unwrap();
    assert_eq!(request.image_id, "img-1");
    assert_eq!(request.flavor_id, "f-1");
    assert_eq!(request.network_id, "net-abc123");
    assert_eq!(request.key_pair, "kp1");
}

#[test]
fn cap_counts_instances_across_entries() {
    let backend = Arc::new(FakeBackend::standard());
    let client = client_with(TWO_PROFILES, Some(2), Arc::clone(&backend));

    assert!(client.can_start_new_instance());
    let web = client.start_new_instance("web", &user_data("web")).unwrap();
    assert!(client.can_start_new_instance());
    let _worker = client.start_new_instance("worker", &user_data("worker")).unwrap();

    assert_eq!(client.total_instance_count(), 2);
    assert!(!client.can_start_new_instance());
    assert!(!client.can_start_new_instance_with_details().possible());
    assert_eq!(
        client.can_start_new_instance_with_details(),
        CanStartResult::No("Instance cap exceeded".to_string())
    );

    // disposing one instance frees capacity
    client.terminate_instance(&web).unwrap();
    assert_eq!(client.total_instance_count(), 1);
    assert!(client.can_start_new_instance());
}

#[test]
fn no_cap_is_always_startable() {
    let backend = Arc::new(FakeBackend::standard());
    let client = client_with(TWO_PROFILES, None, backend);

    for _ in 0..5 {
        client.start_new_instance("web", &user_data("web")).unwrap();
        assert!(client.can_start_new_instance());
    }
}

#[test]
fn agent_matching_needs_marker_and_instance_id() {
    let backend = Arc::new(FakeBackend::standard());
    let client = client_with(TWO_PROFILES, None, backend);
    let instance = client.start_new_instance("web", &user_data("web")).unwrap();

    // the parameters stamped at start match back to the same instance
    let matched = client
        .find_instance_by_agent(&AgentDescription::new(instance.agent_parameters()))
        .unwrap();
    assert_eq!(matched.instance_id(), instance.instance_id());

    // wrong instance id: no match
    let mut params = instance.agent_parameters();
    params.insert(agent::INSTANCE_ID_PARAM.to_string(), "srv-999".to_string());
    assert!(client.find_instance_by_agent(&AgentDescription::new(params)).is_none());

    // missing cloud marker: no match
    let mut params = instance.agent_parameters();
    params.remove(agent::CLOUD_TYPE_PARAM);
    assert!(client.find_instance_by_agent(&AgentDescription::new(params)).is_none());
}

#[test]
fn floating_ip_is_best_effort() {
    let catalog = "\
web:
  image: ubuntu-20.04
  flavor: m1.small
  network: net1
  security_group: default
  key_pair: kp1
  auto_floating_ip: true
";
    // one address available: first start gets it, second degrades
    let backend = Arc::new(FakeBackend::standard().with_floating_ips(&["203.0.113.7"]));
    let client = client_with(catalog, None, Arc::clone(&backend));

    let first = client.start_new_instance("web", &user_data("web")).unwrap();
    assert_eq!(first.floating_ip().as_deref(), Some("203.0.113.7"));

    let second = client.start_new_instance("web", &user_data("web")).unwrap();
    assert_eq!(second.state(), InstanceState::Running);
    assert!(second.floating_ip().is_none());
    assert!(second.last_warning().unwrap().contains("no floating IP"));
}

#[test]
fn restart_keeps_instance_running() {
    let backend = Arc::new(FakeBackend::standard());
    let client = client_with(TWO_PROFILES, None, Arc::clone(&backend));

    let instance = client.start_new_instance("web", &user_data("web")).unwrap();
    client.restart_instance(&instance).unwrap();

    assert_eq!(instance.state(), InstanceState::Running);
    assert_eq!(backend.rebooted.lock().as_slice(), [instance.instance_id()]);
}

#[test]
fn terminate_stops_and_prunes() {
    let backend = Arc::new(FakeBackend::standard());
    let client = client_with(TWO_PROFILES, None, Arc::clone(&backend));

    let instance = client.start_new_instance("web", &user_data("web")).unwrap();
    let id = instance.instance_id();
    client.terminate_instance(&instance).unwrap();

    assert_eq!(instance.state(), InstanceState::Stopped);
    assert!(backend.stopped_servers().contains(&id));
    assert_eq!(client.total_instance_count(), 0);
    assert!(client
        .find_instance_by_agent(&AgentDescription::new(instance.agent_parameters()))
        .is_none());
}

#[test]
fn dispose_stops_every_instance() {
    let backend = Arc::new(FakeBackend::standard());
    let client = client_with(TWO_PROFILES, None, Arc::clone(&backend));

    let a = client.start_new_instance("web", &user_data("web")).unwrap();
    let b = client.start_new_instance("worker", &user_data("worker")).unwrap();

    client.dispose();

    assert!(client.get_images().is_empty());
    let stopped = backend.stopped_servers();
    assert!(stopped.contains(&a.instance_id()));
    assert!(stopped.contains(&b.instance_id()));
}

#[test]
fn queries_are_safe_before_initialization_finishes() {
    let backend = Arc::new(FakeBackend::standard());
    // long delay: the registry is queried while initialization is pending
    let params = ClientParameters::new(TWO_PROFILES).init_delay(Duration::from_secs(30));
    let client = CloudClient::new(params, backend);

    assert_eq!(client.get_images().len(), 2);
    let web = client.find_image_by_id("web").unwrap();
    assert!(!web.is_ready());
    assert!(web.error_info().is_none());
    assert!(matches!(
        client.start_new_instance("web", &user_data("web")),
        Err(Error::ImageNotInitialized(_))
    ));

    client.dispose();
}
