//! An in-memory cluster for tests, which records every mutating call it receives.

use std::{
    collections::{BTreeMap, BTreeSet, HashSet},
    sync::Mutex,
};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, Secret};
use kube::ResourceExt;

use super::{AlreadyExistsSnafu, NamespaceApi, NotFoundSnafu, Result, SecretApi, WorkloadApi};
use crate::{crd::knative::KnativeService, labels};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    CreateNamespace(String),
    DeleteNamespace(String),
    CreateSecret { namespace: String, name: String },
    DeleteSecret { namespace: String, name: String },
    CreateWorkload { namespace: String, name: String },
    DeleteWorkload { namespace: String, name: String },
}

impl Call {
    pub fn is_create_workload(&self) -> bool {
        matches!(self, Self::CreateWorkload { .. })
    }
}

#[derive(Default)]
struct State {
    namespaces: BTreeMap<String, Namespace>,
    secrets: BTreeMap<(String, String), Secret>,
    workloads: BTreeMap<(String, String), KnativeService>,
    calls: Vec<Call>,

    /// Namespace names which report as absent when checked but collide on create, the way a
    /// namespace created concurrently by another request would.
    racing_namespaces: HashSet<String>,
}

#[derive(Default)]
pub struct MemoryCluster {
    state: Mutex<State>,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("memory cluster lock poisoned")
    }

    pub fn with_namespace(self, name: &str) -> Self {
        self.state().namespaces.insert(
            name.to_owned(),
            Namespace {
                metadata: kube::api::ObjectMeta {
                    name: Some(name.to_owned()),
                    ..Default::default()
                },
                ..Default::default()
            },
        );
        self
    }

    pub fn with_racing_namespace(self, name: &str) -> Self {
        self.state().racing_namespaces.insert(name.to_owned());
        self
    }

    /// Adds a secret as the controller would have created it.
    pub fn with_secret(self, namespace: &str, name: &str) -> Self {
        self.with_labelled_secret(namespace, name, Some(labels::managed_by()))
    }

    /// Adds a secret the controller did not create.
    pub fn with_foreign_secret(self, namespace: &str, name: &str) -> Self {
        self.with_labelled_secret(namespace, name, None)
    }

    fn with_labelled_secret(
        self,
        namespace: &str,
        name: &str,
        labels: Option<BTreeMap<String, String>>,
    ) -> Self {
        let secret = Secret {
            metadata: kube::api::ObjectMeta {
                name: Some(name.to_owned()),
                namespace: Some(namespace.to_owned()),
                labels,
                ..Default::default()
            },
            ..Default::default()
        };
        self.state()
            .secrets
            .insert((namespace.to_owned(), name.to_owned()), secret);
        self
    }

    pub fn with_workload(self, namespace: &str, workload: KnativeService) -> Self {
        self.state()
            .workloads
            .insert((namespace.to_owned(), workload.name_any()), workload);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn namespace_names(&self) -> BTreeSet<String> {
        self.state().namespaces.keys().cloned().collect()
    }

    pub fn secret(&self, namespace: &str, name: &str) -> Option<Secret> {
        self.state()
            .secrets
            .get(&(namespace.to_owned(), name.to_owned()))
            .cloned()
    }

    pub fn workload(&self, namespace: &str, name: &str) -> Option<KnativeService> {
        self.state()
            .workloads
            .get(&(namespace.to_owned(), name.to_owned()))
            .cloned()
    }
}

#[async_trait]
impl NamespaceApi for MemoryCluster {
    async fn namespace_exists(&self, name: &str) -> Result<bool> {
        Ok(self.state().namespaces.contains_key(name))
    }

    async fn create_namespace(&self, namespace: &Namespace) -> Result<Namespace> {
        let name = namespace.name_any();
        let mut state = self.state();
        state.calls.push(Call::CreateNamespace(name.clone()));

        if state.namespaces.contains_key(&name) || state.racing_namespaces.remove(&name) {
            return AlreadyExistsSnafu {
                kind: "Namespace",
                name,
            }
            .fail();
        }

        state.namespaces.insert(name, namespace.clone());
        Ok(namespace.clone())
    }

    async fn delete_namespace(&self, name: &str) -> Result<()> {
        let mut state = self.state();
        state.calls.push(Call::DeleteNamespace(name.to_owned()));

        match state.namespaces.remove(name) {
            Some(_) => Ok(()),
            None => NotFoundSnafu {
                kind: "Namespace",
                name,
            }
            .fail(),
        }
    }
}

#[async_trait]
impl SecretApi for MemoryCluster {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        Ok(self.secret(namespace, name))
    }

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<Secret> {
        let name = secret.name_any();
        let mut state = self.state();
        state.calls.push(Call::CreateSecret {
            namespace: namespace.to_owned(),
            name: name.clone(),
        });

        let key = (namespace.to_owned(), name);
        if state.secrets.contains_key(&key) {
            return AlreadyExistsSnafu {
                kind: "Secret",
                name: key.1,
            }
            .fail();
        }

        state.secrets.insert(key, secret.clone());
        Ok(secret.clone())
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<()> {
        let mut state = self.state();
        state.calls.push(Call::DeleteSecret {
            namespace: namespace.to_owned(),
            name: name.to_owned(),
        });

        match state
            .secrets
            .remove(&(namespace.to_owned(), name.to_owned()))
        {
            Some(_) => Ok(()),
            None => NotFoundSnafu {
                kind: "Secret",
                name,
            }
            .fail(),
        }
    }
}

#[async_trait]
impl WorkloadApi for MemoryCluster {
    async fn list_workloads(&self, namespace: &str) -> Result<Vec<KnativeService>> {
        Ok(self
            .state()
            .workloads
            .iter()
            .filter(|((workload_namespace, _), _)| workload_namespace == namespace)
            .map(|(_, workload)| workload.clone())
            .collect())
    }

    async fn get_workload(&self, namespace: &str, name: &str) -> Result<Option<KnativeService>> {
        Ok(self.workload(namespace, name))
    }

    async fn create_workload(
        &self,
        namespace: &str,
        workload: &KnativeService,
    ) -> Result<KnativeService> {
        let name = workload.name_any();
        let mut state = self.state();
        state.calls.push(Call::CreateWorkload {
            namespace: namespace.to_owned(),
            name: name.clone(),
        });

        let key = (namespace.to_owned(), name);
        if state.workloads.contains_key(&key) {
            return AlreadyExistsSnafu {
                kind: "Service",
                name: key.1,
            }
            .fail();
        }

        let mut created = workload.clone();
        created.metadata.namespace = Some(namespace.to_owned());
        state.workloads.insert(key, created.clone());
        Ok(created)
    }

    async fn delete_workload(&self, namespace: &str, name: &str) -> Result<()> {
        let mut state = self.state();
        state.calls.push(Call::DeleteWorkload {
            namespace: namespace.to_owned(),
            name: name.to_owned(),
        });

        match state
            .workloads
            .remove(&(namespace.to_owned(), name.to_owned()))
        {
            Some(_) => Ok(()),
            None => NotFoundSnafu {
                kind: "Service",
                name,
            }
            .fail(),
        }
    }
}
