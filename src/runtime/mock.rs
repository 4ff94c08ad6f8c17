//! In-memory daemon for tests. Records every call in order.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};

use super::{DaemonGateway, PullStream};
use crate::error::{Error, Operation, Result};
use bollard::models::{Mount, MountTypeEnum};

use crate::types::{
    InstanceDescriptor, InstanceState, InstanceSummary, NetworkAttachment, NetworkAttachmentSet,
    PullProgress,
};

#[derive(Debug, Clone)]
pub(crate) struct MockInstance {
    pub descriptor: InstanceDescriptor,
    pub running: bool,
}

impl MockInstance {
    pub fn running(id: &str, name: &str, image: &str) -> Self {
        let mut descriptor = InstanceDescriptor {
            id: id.to_string(),
            name: name.to_string(),
            image_id: format!("sha256:{image}"),
            ..Default::default()
        };
        descriptor.config.image = Some(image.to_string());
        descriptor.config.hostname = Some(name.trim_start_matches('/').to_string());
        descriptor.set_network_mode("bridge");
        descriptor.networks = NetworkAttachmentSet::new(["bridge"]);
        Self {
            descriptor,
            running: true,
        }
    }

    pub fn stopped(id: &str, name: &str, image: &str) -> Self {
        Self {
            running: false,
            ..Self::running(id, name, image)
        }
    }

    pub fn network_mode(mut self, mode: &str) -> Self {
        self.descriptor.set_network_mode(mode);
        self.descriptor.networks = NetworkAttachmentSet::default();
        self
    }

    pub fn networks(mut self, names: &[&str]) -> Self {
        self.descriptor.networks = NetworkAttachmentSet::new(names.iter().copied());
        self
    }

    pub fn attachment(mut self, attachment: NetworkAttachment) -> Self {
        self.descriptor.networks.insert(attachment);
        self
    }

    pub fn label(mut self, key: &str, value: &str) -> Self {
        self.descriptor
            .labels_mut()
            .insert(key.to_string(), value.to_string());
        self
    }

    /// Named volume mounted at `target`, plus a few host settings the
    /// orchestrator never reads.
    pub fn volume(mut self, source: &str, target: &str) -> Self {
        let host = &mut self.descriptor.host;
        host.mounts.get_or_insert_with(Vec::new).push(Mount {
            typ: Some(MountTypeEnum::VOLUME),
            source: Some(source.to_string()),
            target: Some(target.to_string()),
            ..Default::default()
        });
        host.shm_size = Some(64 * 1024 * 1024);
        host.sysctls = Some(HashMap::from([(
            "net.core.somaxconn".to_string(),
            "1024".to_string(),
        )]));
        self.descriptor.config.tty = Some(true);
        self
    }

    pub fn image_id(mut self, image_id: &str) -> Self {
        self.descriptor.image_id = image_id.to_string();
        self
    }
}

#[derive(Default)]
struct State {
    instances: BTreeMap<String, MockInstance>,
    images: HashMap<String, String>,
    pulls: HashMap<String, Vec<String>>,
    pulled_images: HashMap<String, String>,
    pull_fails: HashSet<String>,
    pull_breaks: HashSet<String>,
    create_fails: HashSet<String>,
    start_fails: HashSet<String>,
    connect_fails: HashSet<String>,
    stop_fails: bool,
    removal_lag: usize,
    tombstones: HashMap<String, (usize, MockInstance)>,
    pull_lines_read: usize,
    calls: Vec<String>,
    next_id: usize,
    offline: bool,
}

#[derive(Clone, Default)]
pub(crate) struct MockGateway {
    state: Arc<Mutex<State>>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn add_instance(&self, instance: MockInstance) {
        let mut state = self.state();
        state
            .images
            .entry(instance.descriptor.image().to_string())
            .or_insert_with(|| instance.descriptor.image_id.clone());
        state
            .instances
            .insert(instance.descriptor.id.clone(), instance);
    }

    /// Sets the local identity of `image`.
    pub fn set_image(&self, image: &str, image_id: &str) {
        self.state()
            .images
            .insert(image.to_string(), image_id.to_string());
    }

    /// Lines streamed when `image` is pulled. If the stream is read to the
    /// end, the local image becomes `pulled_id` when given.
    pub fn script_pull(&self, image: &str, lines: &[&str], pulled_id: Option<&str>) {
        let mut state = self.state();
        state.pulls.insert(
            image.to_string(),
            lines.iter().map(|l| l.to_string()).collect(),
        );
        if let Some(id) = pulled_id {
            state.pulled_images.insert(image.to_string(), id.to_string());
        }
    }

    pub fn fail_pull(&self, image: &str) {
        self.state().pull_fails.insert(image.to_string());
    }

    /// The scripted lines for `image` end in an error instead of completing.
    pub fn break_pull(&self, image: &str) {
        self.state().pull_breaks.insert(image.to_string());
    }

    pub fn fail_create(&self, image: &str) {
        self.state().create_fails.insert(image.to_string());
    }

    pub fn fail_start(&self, image: &str) {
        self.state().start_fails.insert(image.to_string());
    }

    pub fn fail_connect(&self, network: &str) {
        self.state().connect_fails.insert(network.to_string());
    }

    pub fn fail_stop(&self) {
        self.state().stop_fails = true;
    }

    /// Removed instances stay visible to inspect for `polls` more calls.
    pub fn set_removal_lag(&self, polls: usize) {
        self.state().removal_lag = polls;
    }

    pub fn set_offline(&self, offline: bool) {
        self.state().offline = offline;
    }

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    pub fn count_calls(&self, prefix: &str) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    pub fn pull_lines_read(&self) -> usize {
        self.state().pull_lines_read
    }

    pub fn instance_by_name(&self, name: &str) -> Option<MockInstance> {
        let wanted = name.trim_start_matches('/');
        self.state()
            .instances
            .values()
            .find(|i| i.descriptor.name.trim_start_matches('/') == wanted)
            .cloned()
    }

    pub fn instance_count(&self) -> usize {
        self.state().instances.len()
    }

    fn record(&self, call: String) -> Result<MutexGuard<'_, State>> {
        let mut state = self.state();
        state.calls.push(call);
        if state.offline {
            return Err(Error::Connection("daemon offline".into()));
        }
        Ok(state)
    }
}

fn not_found(id: &str) -> Error {
    Error::NotFound(format!("no such instance: {id}"))
}

#[async_trait]
impl DaemonGateway for MockGateway {
    async fn ping(&self) -> Result<()> {
        tokio::task::yield_now().await;
        self.record("ping".into()).map(|_| ())
    }

    async fn list_instances(&self, include_stopped: bool) -> Result<Vec<InstanceSummary>> {
        tokio::task::yield_now().await;
        let state = self.record("list".into())?;
        Ok(state
            .instances
            .values()
            .filter(|i| include_stopped || i.running)
            .map(|i| InstanceSummary {
                id: i.descriptor.id.clone(),
                name: i.descriptor.name.clone(),
                image: i.descriptor.image().to_string(),
                image_id: i.descriptor.image_id.clone(),
                state: if i.running {
                    InstanceState::Running
                } else {
                    InstanceState::Other
                },
            })
            .collect())
    }

    async fn inspect(&self, id: &str) -> Result<InstanceDescriptor> {
        tokio::task::yield_now().await;
        let mut state = self.record(format!("inspect:{id}"))?;
        if let Some(instance) = state.instances.get(id) {
            return Ok(instance.descriptor.clone());
        }
        if let Some((remaining, instance)) = state.tombstones.get_mut(id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Ok(instance.descriptor.clone());
            }
        }
        Err(not_found(id))
    }

    async fn stop(&self, id: &str) -> Result<()> {
        tokio::task::yield_now().await;
        let mut state = self.record(format!("stop:{id}"))?;
        if state.stop_fails {
            return Err(Error::daemon(Operation::Stop, id, "stop refused"));
        }
        match state.instances.get_mut(id) {
            Some(instance) => {
                instance.running = false;
                Ok(())
            }
            None => Err(not_found(id)),
        }
    }

    async fn remove(&self, id: &str) -> Result<()> {
        tokio::task::yield_now().await;
        let mut state = self.record(format!("remove:{id}"))?;
        match state.instances.remove(id) {
            Some(instance) => {
                let lag = state.removal_lag;
                if lag > 0 {
                    state.tombstones.insert(id.to_string(), (lag, instance));
                }
                Ok(())
            }
            None => Err(not_found(id)),
        }
    }

    async fn create(&self, name: &str, descriptor: &InstanceDescriptor) -> Result<String> {
        tokio::task::yield_now().await;
        let mut state = self.record(format!("create:{name}"))?;
        let image = descriptor.image().to_string();
        if state.create_fails.contains(&image) {
            return Err(Error::daemon(Operation::Create, name, "invalid config"));
        }
        let wanted = name.trim_start_matches('/');
        if state
            .instances
            .values()
            .any(|i| i.descriptor.name.trim_start_matches('/') == wanted)
        {
            return Err(Error::daemon(Operation::Create, name, "name already in use"));
        }

        state.next_id += 1;
        let id = format!("new-{}", state.next_id);
        let mut created = descriptor.clone();
        created.id = id.clone();
        created.name = format!("/{wanted}");
        created.image_id = state
            .images
            .get(&image)
            .cloned()
            .unwrap_or_else(|| format!("sha256:{image}"));
        // Only the primary network is joined at create, with the endpoint
        // settings the request carried for it.
        let mode = created.network_mode().to_string();
        created.networks = match mode.as_str() {
            "bridge" | "default" | "" => NetworkAttachmentSet::new(["bridge"]),
            "host" | "none" => NetworkAttachmentSet::default(),
            m if m.starts_with("container:") => NetworkAttachmentSet::default(),
            m => NetworkAttachmentSet::new([descriptor
                .networks
                .get(m)
                .cloned()
                .unwrap_or_else(|| NetworkAttachment::new(m))]),
        };
        state.instances.insert(
            id.clone(),
            MockInstance {
                descriptor: created,
                running: false,
            },
        );
        Ok(id)
    }

    async fn start(&self, id: &str) -> Result<()> {
        tokio::task::yield_now().await;
        let mut state = self.record(format!("start:{id}"))?;
        let start_fails = state.start_fails.clone();
        match state.instances.get_mut(id) {
            Some(instance) if start_fails.contains(instance.descriptor.image()) => {
                Err(Error::daemon(Operation::Start, id, "port is already allocated"))
            }
            Some(instance) => {
                instance.running = true;
                Ok(())
            }
            None => Err(not_found(id)),
        }
    }

    async fn kill(&self, id: &str) -> Result<()> {
        tokio::task::yield_now().await;
        let mut state = self.record(format!("kill:{id}"))?;
        match state.instances.get_mut(id) {
            Some(instance) => {
                instance.running = false;
                Ok(())
            }
            None => Err(not_found(id)),
        }
    }

    fn pull_image(&self, image: &str) -> PullStream {
        let image = image.to_string();
        let lines = {
            let mut state = self.state();
            state.calls.push(format!("pull:{image}"));
            if state.offline || state.pull_fails.contains(&image) {
                let err = Error::ImagePull {
                    image: image.clone(),
                    message: "manifest unknown".into(),
                };
                return stream::iter(vec![Err(err)]).boxed();
            }
            state.pulls.get(&image).cloned().unwrap_or_default()
        };

        let shared = Arc::clone(&self.state);
        stream::unfold(Some(0usize), move |index| {
            let shared = Arc::clone(&shared);
            let image = image.clone();
            let line = index.and_then(|i| lines.get(i).cloned());
            async move {
                let index = index?;
                let mut state = shared.lock().unwrap();
                match line {
                    Some(line) => {
                        state.pull_lines_read += 1;
                        Some((Ok(PullProgress::status(line)), Some(index + 1)))
                    }
                    None if state.pull_breaks.contains(&image) => {
                        let err = Error::ImagePull {
                            image,
                            message: "unexpected EOF".into(),
                        };
                        Some((Err(err), None))
                    }
                    None => {
                        if let Some(id) = state.pulled_images.get(&image).cloned() {
                            state.images.insert(image, id);
                        }
                        None
                    }
                }
            }
        })
        .boxed()
    }

    async fn inspect_image(&self, image: &str) -> Result<String> {
        tokio::task::yield_now().await;
        let state = self.record(format!("inspect_image:{image}"))?;
        state
            .images
            .get(image)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("no such image: {image}")))
    }

    async fn connect_network(&self, attachment: &NetworkAttachment, id: &str) -> Result<()> {
        tokio::task::yield_now().await;
        let network = attachment.name.as_str();
        let mut state = self.record(format!("connect:{network}:{id}"))?;
        if state.connect_fails.contains(network) {
            return Err(Error::daemon(
                Operation::ConnectNetwork,
                id,
                format!("network {network} not found"),
            ));
        }
        let instance = state.instances.get_mut(id).ok_or_else(|| not_found(id))?;
        if instance.descriptor.networks.contains(network) {
            return Err(Error::daemon(
                Operation::ConnectNetwork,
                id,
                format!("endpoint already exists in network {network}"),
            ));
        }
        instance.descriptor.networks.insert(attachment.clone());
        Ok(())
    }
}
