//! The lifecycle of tenant workloads.
//!
//! A workload is either absent or present, the scheduler's object is its only state. The
//! [`WorkloadManager`] builds workload objects, enforces the quota, provisions pull secrets and
//! talks to the scheduler's workload API.

use std::{collections::BTreeSet, num::NonZeroU16, sync::Arc};

use k8s_openapi::api::core::v1::{Container, ContainerPort, EnvVar, LocalObjectReference};
use snafu::{ResultExt, Snafu, ensure};
use tracing::{debug, info, instrument, warn};

use crate::{
    cluster::{self, WorkloadApi},
    crd::knative::{
        KnativeService, KnativeServiceList, KnativeServiceSpec, MAX_SCALE_ANNOTATION,
        RevisionSpec, RevisionTemplateMetadata, RevisionTemplateSpec, USER_IMAGE_ANNOTATION,
    },
    error::{ControllerError, ErrorKind},
    labels,
    quota::{self, QuotaGuard},
    registry::{self, RegistryCredentialProvisioner, RegistryCredentials, registry_server},
    validation::{self, validate_workload_name},
};

/// Name of the single serving container of every workload.
pub const CONTAINER_NAME: &str = "user-container";

/// Default upper bound of replicas per workload.
pub const DEFAULT_MAX_SCALE: u32 = 1;

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu, strum::EnumDiscriminants)]
#[strum_discriminants(derive(strum::IntoStaticStr))]
pub enum Error {
    #[snafu(display("{name:?} is not a valid workload name"))]
    InvalidName {
        source: validation::Errors,
        name: String,
    },

    #[snafu(display("{port:?} is not a valid port number"))]
    InvalidPort {
        source: std::num::ParseIntError,
        port: String,
    },

    #[snafu(display("no image given for workload {name:?}"))]
    MissingImage { name: String },

    #[snafu(display("invalid registry for workload {name:?}"))]
    InvalidRegistry {
        source: registry::Error,
        name: String,
    },

    #[snafu(display("failed to check the workload quota"))]
    CheckQuota { source: quota::Error },

    #[snafu(display(
        "namespace {namespace:?} already runs the maximum number of {limit} workloads"
    ))]
    QuotaExceeded { namespace: String, limit: usize },

    #[snafu(display("workload {name:?} already exists in namespace {namespace:?}"))]
    AlreadyExists { name: String, namespace: String },

    #[snafu(display("workload {name:?} not found in namespace {namespace:?}"))]
    NotFound { name: String, namespace: String },

    #[snafu(display("failed to provision pull secret for workload {name:?}"))]
    ProvisionPullSecret {
        source: registry::Error,
        name: String,
    },

    #[snafu(display("failed to list workloads in namespace {namespace:?}"))]
    List {
        source: cluster::Error,
        namespace: String,
    },

    #[snafu(display("failed to get workload {name:?} in namespace {namespace:?}"))]
    Get {
        source: cluster::Error,
        name: String,
        namespace: String,
    },

    #[snafu(display("failed to create workload {name:?} in namespace {namespace:?}"))]
    Create {
        source: cluster::Error,
        name: String,
        namespace: String,
    },

    #[snafu(display("failed to delete workload {name:?} in namespace {namespace:?}"))]
    Delete {
        source: cluster::Error,
        name: String,
        namespace: String,
    },
}

impl ControllerError for Error {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidName { .. }
            | Self::InvalidPort { .. }
            | Self::MissingImage { .. }
            | Self::InvalidRegistry { .. } => ErrorKind::Validation,
            Self::QuotaExceeded { .. } => ErrorKind::QuotaExceeded,
            Self::AlreadyExists { .. } => ErrorKind::Conflict,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::CheckQuota { source } => source.kind(),
            Self::ProvisionPullSecret { source, .. } => source.kind(),
            Self::List { source, .. }
            | Self::Get { source, .. }
            | Self::Create { source, .. }
            | Self::Delete { source, .. } => source.kind(),
        }
    }

    fn category(&self) -> &'static str {
        ErrorDiscriminants::from(self).into()
    }
}

/// A request to deploy a workload.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CreateWorkload {
    pub name: String,
    pub image: String,

    /// Environment variables, in the order they are passed to the container.
    pub env: Vec<(String, String)>,

    /// The container port as given by the caller, parsed while building the spec.
    pub port: Option<String>,

    /// Name of the pull secret provisioned from `credentials`, defaults to the workload name.
    pub secret_name: Option<String>,

    /// Registry credentials, a pull secret is only provisioned if these are present.
    pub credentials: Option<RegistryCredentials>,
}

/// The validated description of a workload, from which the scheduler object is built.
///
/// It is constructed per request and never persisted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkloadSpec {
    pub name: String,
    pub namespace: String,
    pub image: String,
    pub env_vars: Vec<(String, String)>,
    pub port: Option<NonZeroU16>,
    pub pull_secret_ref: Option<String>,
}

impl WorkloadSpec {
    /// Validates the request, without consulting the cluster.
    pub fn from_request(namespace: &str, request: &CreateWorkload) -> Result<Self> {
        validate_workload_name(&request.name).context(InvalidNameSnafu {
            name: &request.name,
        })?;
        ensure!(
            !request.image.trim().is_empty(),
            MissingImageSnafu {
                name: &request.name
            }
        );

        let port = request
            .port
            .as_deref()
            .map(str::trim)
            .filter(|port| !port.is_empty())
            .map(|port| {
                port.parse::<NonZeroU16>()
                    .context(InvalidPortSnafu { port })
            })
            .transpose()?;

        if request.credentials.is_some() {
            registry_server(&request.image).context(InvalidRegistrySnafu {
                name: &request.name,
            })?;
        }

        // Without credentials there is no secret to provision, so none is referenced.
        let pull_secret_ref = request.credentials.as_ref().map(|_| {
            request
                .secret_name
                .clone()
                .unwrap_or_else(|| request.name.clone())
        });

        Ok(Self {
            name: request.name.clone(),
            namespace: namespace.to_owned(),
            image: request.image.clone(),
            env_vars: request.env.clone(),
            port,
            pull_secret_ref,
        })
    }

    /// Builds the scheduler object, scaled to at most `max_scale` replicas.
    pub fn build(&self, max_scale: u32) -> KnativeService {
        let container = Container {
            name: CONTAINER_NAME.to_owned(),
            image: Some(self.image.clone()),
            env: (!self.env_vars.is_empty()).then(|| {
                self.env_vars
                    .iter()
                    .map(|(name, value)| EnvVar {
                        name: name.clone(),
                        value: Some(value.clone()),
                        ..EnvVar::default()
                    })
                    .collect()
            }),
            ports: self.port.map(|port| {
                vec![ContainerPort {
                    container_port: i32::from(port.get()),
                    ..ContainerPort::default()
                }]
            }),
            ..Container::default()
        };

        let template = RevisionTemplateSpec {
            metadata: RevisionTemplateMetadata {
                annotations: [
                    (MAX_SCALE_ANNOTATION.to_owned(), max_scale.to_string()),
                    (USER_IMAGE_ANNOTATION.to_owned(), self.image.clone()),
                ]
                .into(),
                labels: labels::managed_by(),
                ..RevisionTemplateMetadata::default()
            },
            spec: RevisionSpec {
                containers: vec![container],
                image_pull_secrets: self.pull_secret_ref.as_ref().map(|name| {
                    vec![LocalObjectReference {
                        name: name.clone(),
                    }]
                }),
                ..RevisionSpec::default()
            },
            ..RevisionTemplateSpec::default()
        };

        let mut workload = KnativeService::new(
            &self.name,
            KnativeServiceSpec {
                template,
                ..KnativeServiceSpec::default()
            },
        );
        workload.metadata.namespace = Some(self.namespace.clone());
        workload.metadata.labels = Some(labels::managed_by());
        workload
    }
}

/// How workloads are created.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WorkloadSettings {
    pub max_scale: u32,

    /// Abort creation if the pull secret cannot be provisioned.
    pub strict_pull_secrets: bool,
}

impl Default for WorkloadSettings {
    fn default() -> Self {
        Self {
            max_scale: DEFAULT_MAX_SCALE,
            strict_pull_secrets: false,
        }
    }
}

pub struct WorkloadManager {
    workloads: Arc<dyn WorkloadApi>,
    quota: QuotaGuard,
    registry: RegistryCredentialProvisioner,
    settings: WorkloadSettings,
}

impl WorkloadManager {
    pub fn new(
        workloads: Arc<dyn WorkloadApi>,
        quota: QuotaGuard,
        registry: RegistryCredentialProvisioner,
        settings: WorkloadSettings,
    ) -> Self {
        Self {
            workloads,
            quota,
            registry,
            settings,
        }
    }

    /// Lists all workloads in `namespace`, in the scheduler's representation.
    #[instrument(skip(self))]
    pub async fn list(&self, namespace: &str) -> Result<KnativeServiceList> {
        let workloads = self
            .workloads
            .list_workloads(namespace)
            .await
            .context(ListSnafu { namespace })?;

        Ok(workloads.into())
    }

    #[instrument(skip(self))]
    pub async fn get_by_name(&self, namespace: &str, name: &str) -> Result<KnativeService> {
        self.workloads
            .get_workload(namespace, name)
            .await
            .context(GetSnafu { name, namespace })?
            .ok_or_else(|| {
                NotFoundSnafu { name, namespace }.build()
            })
    }

    /// Deploys a new workload into `namespace`.
    ///
    /// Nothing in the cluster is changed if the request is invalid, the quota is exhausted or a
    /// workload with the same name exists. Creation is not an upsert.
    #[instrument(skip(self, request), fields(workload = %request.name))]
    pub async fn create(
        &self,
        namespace: &str,
        request: &CreateWorkload,
    ) -> Result<KnativeService> {
        let spec = WorkloadSpec::from_request(namespace, request)?;

        let within_limit = self
            .quota
            .check_quota(namespace)
            .await
            .context(CheckQuotaSnafu)?;
        ensure!(
            within_limit,
            QuotaExceededSnafu {
                namespace,
                limit: self.quota.max_workloads(),
            }
        );

        let existing = self
            .workloads
            .get_workload(namespace, &spec.name)
            .await
            .context(GetSnafu {
                name: &spec.name,
                namespace,
            })?;
        ensure!(
            existing.is_none(),
            AlreadyExistsSnafu {
                name: &spec.name,
                namespace,
            }
        );

        if let (Some(credentials), Some(secret_name)) =
            (&request.credentials, &spec.pull_secret_ref)
        {
            self.provision_pull_secret(&spec, secret_name, credentials)
                .await?;
        }

        let workload = spec.build(self.settings.max_scale);
        let created = self
            .workloads
            .create_workload(namespace, &workload)
            .await
            .map_err(|source| match source {
                cluster::Error::AlreadyExists { .. } => AlreadyExistsSnafu {
                    name: &spec.name,
                    namespace,
                }
                .build(),
                source => Error::Create {
                    source,
                    name: spec.name.clone(),
                    namespace: namespace.to_owned(),
                },
            })?;

        info!("created workload");
        Ok(created)
    }

    async fn provision_pull_secret(
        &self,
        spec: &WorkloadSpec,
        secret_name: &str,
        credentials: &RegistryCredentials,
    ) -> Result<()> {
        let provisioned = self
            .registry
            .provision_pull_secret(&spec.namespace, secret_name, credentials, &spec.image)
            .await
            .context(ProvisionPullSecretSnafu { name: &spec.name });

        match provisioned {
            Err(err) if !self.settings.strict_pull_secrets => {
                warn!(
                    secret = secret_name,
                    error = &err as &dyn std::error::Error,
                    "failed to provision pull secret, creating workload anyway"
                );
                Ok(())
            }
            result => result,
        }
    }

    /// Deletes the workload without waiting for its teardown, then the pull secrets the
    /// controller provisioned for it.
    ///
    /// These are the secrets the workload references and the secret named after it, as far as
    /// they carry the managed-by label. Failing to delete them does not fail the delete.
    #[instrument(skip(self))]
    pub async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        let workload = self
            .workloads
            .get_workload(namespace, name)
            .await
            .context(GetSnafu { name, namespace })?
            .ok_or_else(|| NotFoundSnafu { name, namespace }.build())?;

        let mut pull_secrets: BTreeSet<&str> = workload.pull_secret_names().collect();
        pull_secrets.insert(name);

        self.workloads
            .delete_workload(namespace, name)
            .await
            .map_err(|source| match source {
                cluster::Error::NotFound { .. } => NotFoundSnafu { name, namespace }.build(),
                source => Error::Delete {
                    source,
                    name: name.to_owned(),
                    namespace: namespace.to_owned(),
                },
            })?;
        info!("deleted workload");

        for secret in pull_secrets {
            if let Err(err) = self.registry.remove_pull_secret(namespace, secret).await {
                debug!(
                    secret,
                    error = &err as &dyn std::error::Error,
                    "failed to delete pull secret"
                );
            }
        }

        Ok(())
    }
}
