use std::path::{Path, PathBuf};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, Secret};
use kube::{
    Api, Config,
    api::{DeleteParams, ListParams, PostParams},
    config::{KubeConfigOptions, Kubeconfig, KubeconfigError},
};
use snafu::{ResultExt, Snafu};
use tracing::instrument;

use crate::{
    cluster::{self, NamespaceApi, SecretApi, WorkloadApi},
    crd::knative::KnativeService,
    error::{ControllerError, ErrorKind},
};

/// The field manager recorded on every object the controller creates.
pub const FIELD_MANAGER: &str = "app-controller";

#[derive(Debug, Snafu, strum::EnumDiscriminants)]
#[strum_discriminants(derive(strum::IntoStaticStr))]
pub enum Error {
    #[snafu(display("failed to read kubeconfig from {path:?}"))]
    ReadKubeconfig {
        source: KubeconfigError,
        path: PathBuf,
    },

    #[snafu(display("failed to load client configuration from kubeconfig {path:?}"))]
    LoadKubeconfig {
        source: KubeconfigError,
        path: PathBuf,
    },

    #[snafu(display("failed to infer client configuration from the environment"))]
    InferConfig { source: kube::Error },

    #[snafu(display("failed to create cluster client"))]
    CreateClient { source: kube::Error },
}

impl ControllerError for Error {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Upstream
    }

    fn category(&self) -> &'static str {
        ErrorDiscriminants::from(self).into()
    }
}

/// This `Client` is used to access the cluster control API.
///
/// It wraps an underlying [`kube::Client`] and implements the [`cluster`] traits on top of it.
#[derive(Clone)]
pub struct Client {
    client: kube::Client,
    post_params: PostParams,
    delete_params: DeleteParams,
    workload_delete_params: DeleteParams,
}

impl Client {
    pub fn new(client: kube::Client) -> Self {
        Self {
            client,
            post_params: PostParams {
                field_manager: Some(FIELD_MANAGER.to_owned()),
                ..PostParams::default()
            },
            delete_params: DeleteParams::default(),
            // Workloads are torn down by the garbage collector, the controller does not wait.
            workload_delete_params: DeleteParams {
                grace_period_seconds: Some(0),
                ..DeleteParams::background()
            },
        }
    }

    /// Creates a client from the kubeconfig at `kubeconfig`, or from the in-cluster environment
    /// and the default kubeconfig locations if no path is given.
    pub async fn try_from_kubeconfig(kubeconfig: Option<&Path>) -> Result<Self, Error> {
        let client = match kubeconfig {
            Some(path) => {
                let kubeconfig = Kubeconfig::read_from(path).context(ReadKubeconfigSnafu { path })?;
                let config =
                    Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                        .await
                        .context(LoadKubeconfigSnafu { path })?;
                kube::Client::try_from(config).context(CreateClientSnafu)?
            }
            None => kube::Client::try_default()
                .await
                .context(InferConfigSnafu)?,
        };

        Ok(Self::new(client))
    }

    fn namespaced_api<T>(&self, namespace: &str) -> Api<T>
    where
        T: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <T as kube::Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// Sorts API errors with the status codes the controller reacts to into [`cluster::Error`].
fn request_error(source: kube::Error, kind: &'static str, name: &str) -> cluster::Error {
    let status_code = match &source {
        kube::Error::Api(response) => Some(response.code),
        _ => None,
    };

    match status_code {
        Some(404) => cluster::Error::NotFound {
            kind,
            name: name.to_owned(),
        },
        Some(409) => cluster::Error::AlreadyExists {
            kind,
            name: name.to_owned(),
        },
        _ => cluster::Error::Request {
            source,
            kind,
            name: name.to_owned(),
        },
    }
}

#[async_trait]
impl NamespaceApi for Client {
    #[instrument(skip(self))]
    async fn namespace_exists(&self, name: &str) -> cluster::Result<bool> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let namespace = api
            .get_opt(name)
            .await
            .map_err(|source| request_error(source, "Namespace", name))?;

        Ok(namespace.is_some())
    }

    #[instrument(skip_all, fields(namespace = namespace.metadata.name.as_deref()))]
    async fn create_namespace(&self, namespace: &Namespace) -> cluster::Result<Namespace> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let name = namespace.metadata.name.as_deref().unwrap_or_default();

        api.create(&self.post_params, namespace)
            .await
            .map_err(|source| request_error(source, "Namespace", name))
    }

    #[instrument(skip(self))]
    async fn delete_namespace(&self, name: &str) -> cluster::Result<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        api.delete(name, &self.delete_params)
            .await
            .map_err(|source| request_error(source, "Namespace", name))?;

        Ok(())
    }
}

#[async_trait]
impl SecretApi for Client {
    #[instrument(skip(self))]
    async fn get_secret(&self, namespace: &str, name: &str) -> cluster::Result<Option<Secret>> {
        self.namespaced_api::<Secret>(namespace)
            .get_opt(name)
            .await
            .map_err(|source| request_error(source, "Secret", name))
    }

    #[instrument(skip(self, secret), fields(secret = secret.metadata.name.as_deref()))]
    async fn create_secret(&self, namespace: &str, secret: &Secret) -> cluster::Result<Secret> {
        let name = secret.metadata.name.as_deref().unwrap_or_default();

        self.namespaced_api::<Secret>(namespace)
            .create(&self.post_params, secret)
            .await
            .map_err(|source| request_error(source, "Secret", name))
    }

    #[instrument(skip(self))]
    async fn delete_secret(&self, namespace: &str, name: &str) -> cluster::Result<()> {
        self.namespaced_api::<Secret>(namespace)
            .delete(name, &self.delete_params)
            .await
            .map_err(|source| request_error(source, "Secret", name))?;

        Ok(())
    }
}

#[async_trait]
impl WorkloadApi for Client {
    #[instrument(skip(self))]
    async fn list_workloads(&self, namespace: &str) -> cluster::Result<Vec<KnativeService>> {
        let list = self
            .namespaced_api::<KnativeService>(namespace)
            .list(&ListParams::default())
            .await
            .map_err(|source| request_error(source, "Service", namespace))?;

        Ok(list.items)
    }

    #[instrument(skip(self))]
    async fn get_workload(
        &self,
        namespace: &str,
        name: &str,
    ) -> cluster::Result<Option<KnativeService>> {
        self.namespaced_api::<KnativeService>(namespace)
            .get_opt(name)
            .await
            .map_err(|source| request_error(source, "Service", name))
    }

    #[instrument(skip(self, workload), fields(workload = workload.metadata.name.as_deref()))]
    async fn create_workload(
        &self,
        namespace: &str,
        workload: &KnativeService,
    ) -> cluster::Result<KnativeService> {
        let name = workload.metadata.name.as_deref().unwrap_or_default();

        self.namespaced_api::<KnativeService>(namespace)
            .create(&self.post_params, workload)
            .await
            .map_err(|source| request_error(source, "Service", name))
    }

    #[instrument(skip(self))]
    async fn delete_workload(&self, namespace: &str, name: &str) -> cluster::Result<()> {
        self.namespaced_api::<KnativeService>(namespace)
            .delete(name, &self.workload_delete_params)
            .await
            .map_err(|source| request_error(source, "Service", name))?;

        Ok(())
    }
}
