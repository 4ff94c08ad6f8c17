use super::{DaemonGateway, PullStream};
use crate::error::{Error, Operation, Result};
use crate::policy;
use crate::types::{
    InstanceDescriptor, InstanceState, InstanceSummary, NetworkAttachment, NetworkAttachmentSet,
    PullProgress,
};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, KillContainerOptions,
    ListContainersOptions, NetworkingConfig, RemoveContainerOptions, StartContainerOptions,
    StopContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{ContainerInspectResponse, EndpointIpamConfig, EndpointSettings};
use bollard::network::ConnectNetworkOptions;
use bollard::Docker;
use futures_util::stream::StreamExt;
use log::info;
use std::collections::HashMap;

/// Gateway to the local Docker daemon.
#[derive(Clone)]
pub struct DockerGateway {
    docker: Docker,
}

impl DockerGateway {
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    /// Connects with the local defaults (unix socket, or `DOCKER_HOST`).
    pub fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| Error::Connection(e.to_string()))?;
        info!("Docker client configured");
        Ok(Self::new(docker))
    }
}

/// Maps a bollard error, treating HTTP 404 as [`Error::NotFound`].
fn map_err(op: Operation, target: &str, err: bollard::errors::Error) -> Error {
    match err {
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            message,
        } => Error::NotFound(format!("{target}: {message}")),
        other => Error::daemon(op, target, other),
    }
}

#[async_trait]
impl DaemonGateway for DockerGateway {
    async fn ping(&self) -> Result<()> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| Error::Connection(format!("cannot ping daemon, is it running? {e}")))
    }

    async fn list_instances(&self, include_stopped: bool) -> Result<Vec<InstanceSummary>> {
        let opts = ListContainersOptions::<String> {
            all: include_stopped,
            ..Default::default()
        };
        let containers = self
            .docker
            .list_containers(Some(opts))
            .await
            .map_err(|e| map_err(Operation::List, "containers", e))?;

        Ok(containers
            .into_iter()
            .filter_map(|c| {
                let id = c.id?;
                let name = c
                    .names
                    .as_ref()
                    .and_then(|n| n.first())
                    .cloned()
                    .unwrap_or_else(|| id.clone());
                Some(InstanceSummary {
                    id,
                    name,
                    image: c.image.unwrap_or_default(),
                    image_id: c.image_id.unwrap_or_default(),
                    state: InstanceState::from_status(c.state.as_deref().unwrap_or_default()),
                })
            })
            .collect())
    }

    async fn inspect(&self, id: &str) -> Result<InstanceDescriptor> {
        let detail = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| map_err(Operation::Inspect, id, e))?;
        Ok(descriptor_from_inspect(detail))
    }

    async fn stop(&self, id: &str) -> Result<()> {
        self.docker
            .stop_container(id, None::<StopContainerOptions>)
            .await
            .map_err(|e| map_err(Operation::Stop, id, e))
    }

    async fn remove(&self, id: &str) -> Result<()> {
        self.docker
            .remove_container(id, None::<RemoveContainerOptions>)
            .await
            .map_err(|e| map_err(Operation::Remove, id, e))
    }

    async fn create(&self, name: &str, descriptor: &InstanceDescriptor) -> Result<String> {
        let options = CreateContainerOptions {
            name: name.to_string(),
            platform: None,
        };
        let response = self
            .docker
            .create_container(Some(options), create_config(descriptor))
            .await
            .map_err(|e| map_err(Operation::Create, name, e))?;
        for warning in response.warnings {
            info!("Create {}: {}", name, warning);
        }
        Ok(response.id)
    }

    async fn start(&self, id: &str) -> Result<()> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| map_err(Operation::Start, id, e))
    }

    async fn kill(&self, id: &str) -> Result<()> {
        self.docker
            .kill_container(id, None::<KillContainerOptions<String>>)
            .await
            .map_err(|e| map_err(Operation::Kill, id, e))
    }

    fn pull_image(&self, image: &str) -> PullStream {
        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };
        let image = image.to_string();
        self.docker
            .create_image(Some(options), None, None)
            .map(move |item| match item {
                Ok(info) => Ok(PullProgress {
                    status: info.status.unwrap_or_default(),
                    id: info.id,
                    progress: info.progress,
                }),
                Err(e) => Err(Error::ImagePull {
                    image: image.clone(),
                    message: e.to_string(),
                }),
            })
            .boxed()
    }

    async fn inspect_image(&self, image: &str) -> Result<String> {
        let detail = self
            .docker
            .inspect_image(image)
            .await
            .map_err(|e| map_err(Operation::InspectImage, image, e))?;
        detail
            .id
            .ok_or_else(|| Error::daemon(Operation::InspectImage, image, "image has no id"))
    }

    async fn connect_network(&self, attachment: &NetworkAttachment, id: &str) -> Result<()> {
        let options = ConnectNetworkOptions {
            container: id.to_string(),
            endpoint_config: endpoint_settings(attachment),
        };
        self.docker
            .connect_network(&attachment.name, options)
            .await
            .map_err(|e| map_err(Operation::ConnectNetwork, id, e))
    }
}

fn descriptor_from_inspect(detail: ContainerInspectResponse) -> InstanceDescriptor {
    let id = detail.id.unwrap_or_default();

    let mut attachments: Vec<NetworkAttachment> = detail
        .network_settings
        .and_then(|s| s.networks)
        .unwrap_or_default()
        .into_iter()
        .map(|(name, endpoint)| attachment_from_endpoint(name, endpoint, &id))
        .collect();
    attachments.sort_by(|a, b| a.name.cmp(&b.name));

    InstanceDescriptor {
        name: detail.name.unwrap_or_default(),
        image_id: detail.image.unwrap_or_default(),
        config: detail.config.unwrap_or_default(),
        host: detail.host_config.unwrap_or_default(),
        networks: NetworkAttachmentSet::new(attachments),
        id,
    }
}

/// Keeps the user-assigned endpoint settings. The daemon adds the short
/// container id as an alias by itself, so aliases that prefix `id` are dropped.
fn attachment_from_endpoint(
    name: String,
    endpoint: EndpointSettings,
    id: &str,
) -> NetworkAttachment {
    let ipam = endpoint.ipam_config.unwrap_or_default();
    NetworkAttachment {
        name,
        aliases: endpoint
            .aliases
            .unwrap_or_default()
            .into_iter()
            .filter(|alias| !alias.is_empty() && !id.starts_with(alias.as_str()))
            .collect(),
        ipv4_address: ipam.ipv4_address.filter(|ip| !ip.is_empty()),
        ipv6_address: ipam.ipv6_address.filter(|ip| !ip.is_empty()),
    }
}

fn endpoint_settings(attachment: &NetworkAttachment) -> EndpointSettings {
    let ipam_config = (attachment.ipv4_address.is_some() || attachment.ipv6_address.is_some())
        .then(|| EndpointIpamConfig {
            ipv4_address: attachment.ipv4_address.clone(),
            ipv6_address: attachment.ipv6_address.clone(),
            ..Default::default()
        });
    EndpointSettings {
        aliases: (!attachment.aliases.is_empty()).then(|| attachment.aliases.clone()),
        ipam_config,
        ..Default::default()
    }
}

/// A named network mode is joined at create, so its endpoint settings have
/// to be passed there; reconnecting later is refused by the daemon.
fn primary_endpoint(descriptor: &InstanceDescriptor) -> Option<NetworkingConfig<String>> {
    let mode = descriptor.network_mode();
    if policy::is_builtin_mode(mode) || mode.starts_with("container:") {
        return None;
    }
    let attachment = descriptor.networks.get(mode)?;
    let mut endpoints_config = HashMap::new();
    endpoints_config.insert(mode.to_string(), endpoint_settings(attachment));
    Some(NetworkingConfig { endpoints_config })
}

/// Builds the create request from the descriptor's daemon models, so every
/// setting the old instance had is handed back unchanged.
fn create_config(descriptor: &InstanceDescriptor) -> Config<String> {
    Config {
        host_config: Some(descriptor.host.clone()),
        networking_config: primary_endpoint(descriptor),
        ..Config::from(descriptor.config.clone())
    }
}
