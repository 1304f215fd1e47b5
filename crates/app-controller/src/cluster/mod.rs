//! The slices of the cluster control API the controller consumes.
//!
//! [`crate::client::Client`] implements all of them against a live cluster. Components only ever
//! see the trait they need, which keeps them testable against [`memory::MemoryCluster`].

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, Secret};
use snafu::Snafu;

use crate::{
    crd::knative::KnativeService,
    error::{ControllerError, ErrorKind},
};

#[cfg(test)]
pub mod memory;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu, strum::EnumDiscriminants)]
#[strum_discriminants(derive(strum::IntoStaticStr))]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("{kind} {name:?} not found"))]
    NotFound { kind: &'static str, name: String },

    #[snafu(display("{kind} {name:?} already exists"))]
    AlreadyExists { kind: &'static str, name: String },

    #[snafu(display("request for {kind} {name:?} failed"))]
    Request {
        source: kube::Error,
        kind: &'static str,
        name: String,
    },
}

impl Error {
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }
}

impl ControllerError for Error {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::AlreadyExists { .. } => ErrorKind::Conflict,
            Self::Request { .. } => ErrorKind::Upstream,
        }
    }

    fn category(&self) -> &'static str {
        ErrorDiscriminants::from(self).into()
    }
}

/// Cluster-scoped namespace administration.
#[async_trait]
pub trait NamespaceApi: Send + Sync {
    async fn namespace_exists(&self, name: &str) -> Result<bool>;

    async fn create_namespace(&self, namespace: &Namespace) -> Result<Namespace>;

    async fn delete_namespace(&self, name: &str) -> Result<()>;
}

/// Secrets inside tenant namespaces.
#[async_trait]
pub trait SecretApi: Send + Sync {
    /// Returns [`None`] if no secret with this name exists.
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>>;

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<Secret>;

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<()>;
}

/// The workload API of the serverless scheduler.
#[async_trait]
pub trait WorkloadApi: Send + Sync {
    async fn list_workloads(&self, namespace: &str) -> Result<Vec<KnativeService>>;

    /// Returns [`None`] if no workload with this name exists.
    async fn get_workload(&self, namespace: &str, name: &str) -> Result<Option<KnativeService>>;

    async fn create_workload(
        &self,
        namespace: &str,
        workload: &KnativeService,
    ) -> Result<KnativeService>;

    /// Deletes the workload without waiting for its dependents to be torn down.
    async fn delete_workload(&self, namespace: &str, name: &str) -> Result<()>;
}
