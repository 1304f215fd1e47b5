//! Pull secrets for images in private registries.

use std::{collections::BTreeMap, fmt, sync::Arc};

use base64::{Engine, engine::general_purpose::STANDARD};
use k8s_openapi::{ByteString, api::core::v1::Secret};
use kube::api::ObjectMeta;
use serde::Serialize;
use snafu::{ResultExt, Snafu};
use tracing::{debug, info, instrument};

use crate::{
    cluster::{self, SecretApi},
    error::{ControllerError, ErrorKind},
    labels,
};

/// The auth endpoint registry clients use for Docker Hub.
pub const DOCKER_HUB_AUTH_ENDPOINT: &str = "https://index.docker.io/v1/";

pub const DOCKER_CONFIG_JSON_SECRET_TYPE: &str = "kubernetes.io/dockerconfigjson";
pub const DOCKER_CONFIG_JSON_KEY: &str = ".dockerconfigjson";

const DOCKER_HUB_HOSTS: &[&str] = &["docker.io", "index.docker.io"];

/// Hosts of cloud vendor registries contain one of these.
const VENDOR_REGISTRY_MARKERS: &[&str] = &["amazonaws", "gcr.io", "azurecr.io"];

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu, strum::EnumDiscriminants)]
#[strum_discriminants(derive(strum::IntoStaticStr))]
pub enum Error {
    #[snafu(display("invalid image reference {image:?}: unsupported registry {registry:?}"))]
    InvalidImageReference { image: String, registry: String },

    #[snafu(display("failed to serialize registry credentials for {server:?}"))]
    SerializeDockerConfig {
        source: serde_json::Error,
        server: String,
    },

    #[snafu(display("failed to create pull secret {name:?} in namespace {namespace:?}"))]
    CreatePullSecret {
        source: cluster::Error,
        name: String,
        namespace: String,
    },

    #[snafu(display("failed to look up pull secret {name:?} in namespace {namespace:?}"))]
    GetPullSecret {
        source: cluster::Error,
        name: String,
        namespace: String,
    },

    #[snafu(display("failed to delete pull secret {name:?} in namespace {namespace:?}"))]
    DeletePullSecret {
        source: cluster::Error,
        name: String,
        namespace: String,
    },
}

impl ControllerError for Error {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidImageReference { .. } => ErrorKind::Validation,
            Self::SerializeDockerConfig { .. } => ErrorKind::Upstream,
            Self::CreatePullSecret { source, .. }
            | Self::GetPullSecret { source, .. }
            | Self::DeletePullSecret { source, .. } => source.kind(),
        }
    }

    fn category(&self) -> &'static str {
        ErrorDiscriminants::from(self).into()
    }
}

/// Username and password for a private registry.
#[derive(Clone, PartialEq, Eq)]
pub struct RegistryCredentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for RegistryCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Derives the registry server the credentials for `image` have to be registered for.
///
/// Any scheme is stripped and the first path segment is taken as the registry host. Docker Hub
/// maps to its auth endpoint, cloud vendor registries to `https://<host>`. Other registries are
/// not supported.
pub fn registry_server(image: &str) -> Result<String> {
    let without_scheme = image
        .strip_prefix("https://")
        .or_else(|| image.strip_prefix("http://"))
        .unwrap_or(image);
    let registry = without_scheme.split('/').next().unwrap_or_default();

    if DOCKER_HUB_HOSTS.contains(&registry) {
        Ok(DOCKER_HUB_AUTH_ENDPOINT.to_owned())
    } else if VENDOR_REGISTRY_MARKERS
        .iter()
        .any(|marker| registry.contains(marker))
    {
        Ok(format!("https://{registry}"))
    } else {
        InvalidImageReferenceSnafu { image, registry }.fail()
    }
}

#[derive(Serialize)]
struct DockerConfig<'a> {
    auths: BTreeMap<&'a str, DockerAuth<'a>>,
}

#[derive(Serialize)]
struct DockerAuth<'a> {
    username: &'a str,
    password: &'a str,
    auth: String,
}

/// Renders the `.dockerconfigjson` document registry clients read credentials from.
pub fn docker_config_json(server: &str, credentials: &RegistryCredentials) -> Result<Vec<u8>> {
    let auth = STANDARD.encode(format!(
        "{}:{}",
        credentials.username, credentials.password
    ));
    let config = DockerConfig {
        auths: BTreeMap::from([(
            server,
            DockerAuth {
                username: &credentials.username,
                password: &credentials.password,
                auth,
            },
        )]),
    };

    serde_json::to_vec(&config).context(SerializeDockerConfigSnafu { server })
}

/// Builds the pull secret `name` holding `credentials` for the registry of `image`.
pub fn build_pull_secret(
    namespace: &str,
    name: &str,
    credentials: &RegistryCredentials,
    image: &str,
) -> Result<Secret> {
    let server = registry_server(image)?;
    let docker_config = docker_config_json(&server, credentials)?;

    Ok(Secret {
        metadata: ObjectMeta {
            name: Some(name.to_owned()),
            namespace: Some(namespace.to_owned()),
            labels: Some(labels::managed_by()),
            ..ObjectMeta::default()
        },
        type_: Some(DOCKER_CONFIG_JSON_SECRET_TYPE.to_owned()),
        data: Some(BTreeMap::from([(
            DOCKER_CONFIG_JSON_KEY.to_owned(),
            ByteString(docker_config),
        )])),
        ..Secret::default()
    })
}

/// Materializes registry credentials as pull secrets in tenant namespaces.
pub struct RegistryCredentialProvisioner {
    secrets: Arc<dyn SecretApi>,
}

impl RegistryCredentialProvisioner {
    pub fn new(secrets: Arc<dyn SecretApi>) -> Self {
        Self { secrets }
    }

    /// Creates the pull secret `secret_name` in `namespace`.
    ///
    /// An existing secret with the same name is reported as an error, it is not replaced.
    #[instrument(skip(self, credentials))]
    pub async fn provision_pull_secret(
        &self,
        namespace: &str,
        secret_name: &str,
        credentials: &RegistryCredentials,
        image: &str,
    ) -> Result<()> {
        let secret = build_pull_secret(namespace, secret_name, credentials, image)?;

        self.secrets
            .create_secret(namespace, &secret)
            .await
            .context(CreatePullSecretSnafu {
                name: secret_name,
                namespace,
            })?;

        info!("created pull secret");
        Ok(())
    }

    /// Deletes the pull secret `secret_name` from `namespace` if the controller created it, and
    /// returns whether it did.
    ///
    /// Absent secrets and secrets without the managed-by label are left alone.
    #[instrument(skip(self))]
    pub async fn remove_pull_secret(&self, namespace: &str, secret_name: &str) -> Result<bool> {
        let secret = self
            .secrets
            .get_secret(namespace, secret_name)
            .await
            .context(GetPullSecretSnafu {
                name: secret_name,
                namespace,
            })?;

        match secret {
            Some(secret) if labels::is_managed(secret.metadata.labels.as_ref()) => {}
            Some(_) => {
                debug!("pull secret was not created by the app-controller, keeping it");
                return Ok(false);
            }
            None => return Ok(false),
        }

        self.secrets
            .delete_secret(namespace, secret_name)
            .await
            .context(DeletePullSecretSnafu {
                name: secret_name,
                namespace,
            })?;

        info!("deleted pull secret");
        Ok(true)
    }
}
