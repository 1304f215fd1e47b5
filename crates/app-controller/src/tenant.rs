//! Maps identities to their namespaces, provisioning a namespace on first login.

use std::sync::Arc;

use serde::Serialize;
use snafu::{OptionExt, ResultExt, Snafu, ensure};
use tracing::{Instrument, info, instrument, warn};

use crate::{
    error::{ControllerError, ErrorKind},
    identity::Identity,
    namespace::{self, NamespaceProvisioner, candidate_name},
    store::{self, InsertOutcome, NewTenant, TenantKey, TenantRecord, TenantStore},
};

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu, strum::EnumDiscriminants)]
#[strum_discriminants(derive(strum::IntoStaticStr))]
pub enum Error {
    #[snafu(display("identity carries neither a nickname nor an email to key the tenant by"))]
    MissingNaturalKey,

    #[snafu(display("no tenant {key} is registered, log in first"))]
    NotRegistered { key: TenantKey },

    #[snafu(display("tenant {key} has no namespace assigned"))]
    EmptyNamespace { key: TenantKey },

    #[snafu(display("failed to look up tenant"))]
    Lookup { source: store::Error },

    #[snafu(display("failed to register tenant"))]
    Insert { source: store::Error },

    #[snafu(display("failed to provision namespace for tenant {key}"))]
    Provision {
        source: namespace::Error,
        key: TenantKey,
    },

    #[snafu(display("tenant {key} was registered concurrently but cannot be read back"))]
    VanishedTenant { key: TenantKey },

    #[snafu(display("registration of tenant {key} was aborted"))]
    RegistrationAborted {
        source: tokio::task::JoinError,
        key: TenantKey,
    },
}

impl ControllerError for Error {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingNaturalKey | Self::NotRegistered { .. } => ErrorKind::Auth,
            Self::Lookup { source } | Self::Insert { source } => source.kind(),
            Self::Provision { source, .. } => source.kind(),
            Self::EmptyNamespace { .. }
            | Self::VanishedTenant { .. }
            | Self::RegistrationAborted { .. } => ErrorKind::Upstream,
        }
    }

    fn category(&self) -> &'static str {
        ErrorDiscriminants::from(self).into()
    }
}

/// The namespace of a tenant, and whether this call created it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ResolvedNamespace {
    pub namespace: String,
    pub created: bool,
}

/// The Tenant Directory owns the tenant records and is the only component writing them.
pub struct TenantDirectory {
    store: Arc<dyn TenantStore>,
    provisioner: NamespaceProvisioner,
}

impl TenantDirectory {
    pub fn new(store: Arc<dyn TenantStore>, provisioner: NamespaceProvisioner) -> Self {
        Self { store, provisioner }
    }

    /// Returns the namespace of the tenant behind `identity`, registering the tenant and
    /// provisioning its namespace if it was never seen before.
    ///
    /// Registration runs as a task of its own and completes even if the returned future is
    /// dropped, so a provisioned namespace is always either recorded or released.
    ///
    /// Concurrent first logins of the same identity race on the unique natural key of the tenant
    /// record. The loser deletes the namespace it provisioned and returns the winner's namespace.
    #[instrument(skip_all, fields(tenant))]
    pub async fn resolve_namespace(&self, identity: &Identity) -> Result<ResolvedNamespace> {
        let key = natural_key(identity)?;
        tracing::Span::current().record("tenant", tracing::field::display(&key));

        if let Some(record) = self.store.find(&key).await.context(LookupSnafu)? {
            return Ok(ResolvedNamespace {
                namespace: assigned_namespace(key, record)?,
                created: false,
            });
        }

        let registration = Registration {
            store: self.store.clone(),
            provisioner: self.provisioner.clone(),
            identity: identity.clone(),
            key: key.clone(),
        };

        tokio::spawn(registration.run().in_current_span())
            .await
            .context(RegistrationAbortedSnafu { key })?
    }

    /// Returns the namespace of an already registered tenant.
    #[instrument(skip_all)]
    pub async fn lookup_namespace(&self, identity: &Identity) -> Result<String> {
        let key = natural_key(identity)?;
        let record = self
            .store
            .find(&key)
            .await
            .context(LookupSnafu)?
            .context(NotRegisteredSnafu { key: key.clone() })?;

        assigned_namespace(key, record)
    }
}

/// The first login of a tenant.
struct Registration {
    store: Arc<dyn TenantStore>,
    provisioner: NamespaceProvisioner,
    identity: Identity,
    key: TenantKey,
}

impl Registration {
    async fn run(self) -> Result<ResolvedNamespace> {
        let candidate = candidate_name(self.identity.namespace_prefix());
        let namespace = self
            .provisioner
            .ensure_namespace(&candidate)
            .await
            .context(ProvisionSnafu {
                key: self.key.clone(),
            })?;

        let outcome = self
            .store
            .insert(&NewTenant::for_identity(&self.identity, &namespace))
            .await;

        match outcome {
            Ok(InsertOutcome::Inserted(record)) => {
                info!(namespace = %record.namespace, "registered tenant");
                Ok(ResolvedNamespace {
                    namespace: record.namespace,
                    created: true,
                })
            }
            Ok(InsertOutcome::Conflict) => {
                info!(
                    %namespace,
                    "tenant was registered concurrently, releasing provisioned namespace"
                );
                self.release_namespace(&namespace).await;

                let winner = self
                    .store
                    .find(&self.key)
                    .await
                    .context(LookupSnafu)?
                    .context(VanishedTenantSnafu {
                        key: self.key.clone(),
                    })?;

                Ok(ResolvedNamespace {
                    namespace: assigned_namespace(self.key, winner)?,
                    created: false,
                })
            }
            Err(source) => {
                self.release_namespace(&namespace).await;
                Err(source).context(InsertSnafu)
            }
        }
    }

    async fn release_namespace(&self, namespace: &str) {
        if let Err(err) = self.provisioner.remove_namespace(namespace).await {
            warn!(
                namespace,
                error = &err as &dyn std::error::Error,
                "failed to delete unused namespace"
            );
        }
    }
}

fn natural_key(identity: &Identity) -> Result<TenantKey> {
    let key = TenantKey::for_identity(identity);
    match &key {
        TenantKey::Name(value) | TenantKey::Email(value) if value.is_empty() => {
            MissingNaturalKeySnafu.fail()
        }
        _ => Ok(key),
    }
}

/// The namespace of `record`, which must not be empty.
fn assigned_namespace(key: TenantKey, record: TenantRecord) -> Result<String> {
    ensure!(!record.namespace.is_empty(), EmptyNamespaceSnafu { key });
    Ok(record.namespace)
}
