//! Generation and provisioning of tenant namespaces.

use std::sync::Arc;

use k8s_openapi::api::core::v1::Namespace;
use kube::api::ObjectMeta;
use rand::Rng;
use snafu::{ResultExt, Snafu};
use tracing::{debug, info, instrument};

use crate::{
    cluster::{self, NamespaceApi},
    error::{ControllerError, ErrorKind},
    labels,
    validation::{self, DNS_LABEL_MAX_LENGTH, is_namespace_name, validate_namespace_name},
};

/// Length of the random suffix appended to every generated namespace name.
pub const SUFFIX_LENGTH: usize = 6;

/// Length of the additional suffix appended when a generated name is already taken.
pub const COLLISION_SUFFIX_LENGTH: usize = 4;

/// Number of names tried before giving up.
pub const MAX_NAMESPACE_ATTEMPTS: usize = 4;

/// Identity prefixes are cut to this length, so that all generated names fit into a DNS label
/// even after a collision suffix was appended.
const MAX_PREFIX_LENGTH: usize = DNS_LABEL_MAX_LENGTH - SUFFIX_LENGTH - COLLISION_SUFFIX_LENGTH;

const SUFFIX_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu, strum::EnumDiscriminants)]
#[strum_discriminants(derive(strum::IntoStaticStr))]
pub enum Error {
    #[snafu(display("{name:?} is not a valid namespace name"))]
    InvalidName {
        source: validation::Errors,
        name: String,
    },

    #[snafu(display("failed to check whether namespace {name:?} exists"))]
    CheckExists {
        source: cluster::Error,
        name: String,
    },

    #[snafu(display("failed to create namespace {name:?}"))]
    Create {
        source: cluster::Error,
        name: String,
    },

    #[snafu(display("failed to delete namespace {name:?}"))]
    Delete {
        source: cluster::Error,
        name: String,
    },

    #[snafu(display(
        "no free namespace name derived from {candidate:?} found after {attempts} attempts"
    ))]
    ExhaustedRetries { candidate: String, attempts: usize },
}

impl ControllerError for Error {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidName { .. } => ErrorKind::Validation,
            Self::CheckExists { source, .. }
            | Self::Create { source, .. }
            | Self::Delete { source, .. } => source.kind(),
            Self::ExhaustedRetries { .. } => ErrorKind::Upstream,
        }
    }

    fn category(&self) -> &'static str {
        ErrorDiscriminants::from(self).into()
    }
}

/// Returns `length` random lowercase alphanumeric characters.
pub fn random_suffix(length: usize) -> String {
    let mut rng = rand::rng();
    (0..length)
        .map(|_| char::from(SUFFIX_ALPHABET[rng.random_range(0..SUFFIX_ALPHABET.len())]))
        .collect()
}

/// Derives a candidate namespace name from an identity prefix.
///
/// If the prefix does not produce a valid name as is, every character outside `[a-zA-Z0-9]` is
/// dropped, the rest is lowercased and a fresh suffix is appended.
pub fn candidate_name(prefix: &str) -> String {
    let truncated: String = prefix.chars().take(MAX_PREFIX_LENGTH).collect();
    let candidate = format!("{truncated}{}", random_suffix(SUFFIX_LENGTH));
    if is_namespace_name(&candidate) {
        return candidate;
    }

    let normalized: String = prefix
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .take(MAX_PREFIX_LENGTH)
        .collect();
    format!("{normalized}{}", random_suffix(SUFFIX_LENGTH))
}

/// Ensures namespaces for tenants exist in the cluster.
#[derive(Clone)]
pub struct NamespaceProvisioner {
    namespaces: Arc<dyn NamespaceApi>,
}

impl NamespaceProvisioner {
    pub fn new(namespaces: Arc<dyn NamespaceApi>) -> Self {
        Self { namespaces }
    }

    /// Creates a namespace named `candidate`, or a variant of it if that name is taken, and
    /// returns the name actually created.
    ///
    /// A name is considered taken if the existence check finds it, or if the create call reports that it
    /// already exists. Every retry appends a fresh collision suffix to `candidate`.
    #[instrument(skip(self))]
    pub async fn ensure_namespace(&self, candidate: &str) -> Result<String> {
        validate_namespace_name(candidate).context(InvalidNameSnafu { name: candidate })?;

        let base: String = candidate
            .chars()
            .take(DNS_LABEL_MAX_LENGTH - COLLISION_SUFFIX_LENGTH)
            .collect();
        let mut name = candidate.to_owned();

        for attempt in 1..=MAX_NAMESPACE_ATTEMPTS {
            let exists = self
                .namespaces
                .namespace_exists(&name)
                .await
                .context(CheckExistsSnafu { name: &name })?;

            if !exists {
                match self.namespaces.create_namespace(&build_namespace(&name)).await {
                    Ok(_) => {
                        info!(namespace = %name, attempt, "created namespace");
                        return Ok(name);
                    }
                    Err(err) if err.is_already_exists() => {}
                    Err(err) => return Err(err).context(CreateSnafu { name }),
                }
            }

            debug!(namespace = %name, attempt, "namespace name is taken");
            name = format!("{base}{}", random_suffix(COLLISION_SUFFIX_LENGTH));
        }

        ExhaustedRetriesSnafu {
            candidate,
            attempts: MAX_NAMESPACE_ATTEMPTS,
        }
        .fail()
    }

    /// Deletes a namespace the controller created.
    #[instrument(skip(self))]
    pub async fn remove_namespace(&self, name: &str) -> Result<()> {
        self.namespaces
            .delete_namespace(name)
            .await
            .context(DeleteSnafu { name })
    }
}

fn build_namespace(name: &str) -> Namespace {
    Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_owned()),
            labels: Some(labels::managed_by()),
            ..ObjectMeta::default()
        },
        ..Namespace::default()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use rstest::rstest;

    use super::*;
    use crate::cluster::memory::{Call, MemoryCluster};

    /// Reports every namespace as present.
    struct EverythingTaken;

    #[async_trait]
    impl NamespaceApi for EverythingTaken {
        async fn namespace_exists(&self, _name: &str) -> cluster::Result<bool> {
            Ok(true)
        }

        async fn create_namespace(&self, namespace: &Namespace) -> cluster::Result<Namespace> {
            Ok(namespace.clone())
        }

        async fn delete_namespace(&self, _name: &str) -> cluster::Result<()> {
            Ok(())
        }
    }

    #[rstest]
    #[case("alice", "alice")]
    #[case("john.doe", "johndoe")]
    #[case("Alice_Smith", "alicesmith")]
    #[case("-leading-hyphen", "leadinghyphen")]
    #[case("", "")]
    fn candidate_name_prefix(#[case] prefix: &str, #[case] expected_prefix: &str) {
        let name = candidate_name(prefix);

        assert!(is_namespace_name(&name), "{name:?} must be valid");
        assert_eq!(name.len(), expected_prefix.len() + SUFFIX_LENGTH);
        assert!(name.starts_with(expected_prefix));
    }

    #[test]
    fn candidate_name_from_long_prefix_leaves_room_for_collisions() {
        let name = candidate_name(&"a".repeat(200));
        assert!(name.len() + COLLISION_SUFFIX_LENGTH <= DNS_LABEL_MAX_LENGTH);
    }

    #[test]
    fn random_suffix_alphabet() {
        let suffix = random_suffix(64);
        assert_eq!(suffix.len(), 64);
        assert!(
            suffix
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        );
    }

    #[tokio::test]
    async fn ensure_free_namespace() {
        let cluster = Arc::new(MemoryCluster::new());
        let provisioner = NamespaceProvisioner::new(cluster.clone());

        let name = provisioner
            .ensure_namespace("alice3k9x2a")
            .await
            .expect("namespace must be created");

        assert_eq!(name, "alice3k9x2a");
        assert_eq!(
            cluster.calls(),
            [Call::CreateNamespace("alice3k9x2a".to_owned())]
        );
    }

    #[tokio::test]
    async fn ensure_existing_namespace_picks_other_name() {
        let cluster = Arc::new(MemoryCluster::new().with_namespace("alice3k9x2a"));
        let provisioner = NamespaceProvisioner::new(cluster.clone());

        let name = provisioner
            .ensure_namespace("alice3k9x2a")
            .await
            .expect("namespace must be created");

        assert_ne!(name, "alice3k9x2a");
        assert!(name.starts_with("alice3k9x2a"));
        assert_eq!(name.len(), "alice3k9x2a".len() + COLLISION_SUFFIX_LENGTH);
        assert!(cluster.namespace_names().contains(&name));
        assert_eq!(cluster.calls(), [Call::CreateNamespace(name)]);
    }

    #[tokio::test]
    async fn concurrent_create_counts_as_collision() {
        let cluster = Arc::new(MemoryCluster::new().with_racing_namespace("alice3k9x2a"));
        let provisioner = NamespaceProvisioner::new(cluster.clone());

        let name = provisioner
            .ensure_namespace("alice3k9x2a")
            .await
            .expect("namespace must be created");

        assert_ne!(name, "alice3k9x2a");
        assert_eq!(cluster.calls().len(), 2);
    }

    #[tokio::test]
    async fn ensure_namespace_gives_up() {
        let provisioner = NamespaceProvisioner::new(Arc::new(EverythingTaken));

        let error = provisioner
            .ensure_namespace("alice3k9x2a")
            .await
            .expect_err("no name is free");

        assert!(matches!(
            error,
            Error::ExhaustedRetries {
                attempts: MAX_NAMESPACE_ATTEMPTS,
                ..
            }
        ));
        assert_eq!(error.kind(), ErrorKind::Upstream);
    }

    #[tokio::test]
    async fn ensure_invalid_namespace() {
        let cluster = Arc::new(MemoryCluster::new());
        let provisioner = NamespaceProvisioner::new(cluster.clone());

        let error = provisioner
            .ensure_namespace("John.Doe")
            .await
            .expect_err("name is invalid");

        assert_eq!(error.kind(), ErrorKind::Validation);
        assert!(cluster.calls().is_empty());
    }

    #[test]
    fn namespaces_are_labelled() {
        let namespace = build_namespace("alice3k9x2a");
        assert_eq!(namespace.metadata.labels, Some(labels::managed_by()));
    }
}
