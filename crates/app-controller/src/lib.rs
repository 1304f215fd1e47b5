//! A multi-tenant control plane which deploys serverless workloads into per-user namespaces.
//!
//! Callers authenticate with a token issued by an identity provider. On their first login, a
//! namespace is provisioned for them and recorded in the tenant store. All workload operations are
//! then scoped to that namespace:
//!
//! - [`tenant::TenantDirectory`] maps identities to namespaces.
//! - [`namespace::NamespaceProvisioner`] creates collision-free namespaces.
//! - [`workload::WorkloadManager`] deploys, lists and deletes Knative services, guarded by the
//!   [`quota::QuotaGuard`] and backed by the [`registry::RegistryCredentialProvisioner`] for
//!   private images.
//! - [`api`] exposes all of the above over HTTP.
pub mod api;
pub mod auth;
pub mod cli;
pub mod client;
pub mod cluster;
pub mod config;
pub mod crd;
pub mod error;
pub mod identity;
pub mod labels;
pub mod namespace;
pub mod quota;
pub mod registry;
pub mod store;
pub mod tenant;
pub mod validation;
pub mod workload;
