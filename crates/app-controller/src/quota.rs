//! The per-tenant limit on the number of deployed workloads.

use std::sync::Arc;

use snafu::{ResultExt, Snafu};
use tracing::{debug, instrument};

use crate::{
    cluster::{self, WorkloadApi},
    error::{ControllerError, ErrorKind},
};

/// Default number of workloads a tenant may run.
pub const DEFAULT_MAX_WORKLOADS: usize = 7;

#[derive(Debug, Snafu, strum::EnumDiscriminants)]
#[strum_discriminants(derive(strum::IntoStaticStr))]
pub enum Error {
    #[snafu(display("failed to count workloads in namespace {namespace:?}"))]
    CountWorkloads {
        source: cluster::Error,
        namespace: String,
    },
}

impl ControllerError for Error {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::CountWorkloads { source, .. } => source.kind(),
        }
    }

    fn category(&self) -> &'static str {
        ErrorDiscriminants::from(self).into()
    }
}

/// Workload usage of a namespace, computed on demand and never stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QuotaState {
    pub live: usize,
    pub limit: usize,
}

impl QuotaState {
    pub fn within_limit(&self) -> bool {
        self.live < self.limit
    }
}

/// Rejects deployments beyond the configured number of workloads per namespace.
///
/// The check is advisory, workloads created concurrently are not accounted for.
pub struct QuotaGuard {
    workloads: Arc<dyn WorkloadApi>,
    max_workloads: usize,
}

impl QuotaGuard {
    pub fn new(workloads: Arc<dyn WorkloadApi>, max_workloads: usize) -> Self {
        Self {
            workloads,
            max_workloads,
        }
    }

    pub fn max_workloads(&self) -> usize {
        self.max_workloads
    }

    #[instrument(skip(self))]
    pub async fn quota_state(&self, namespace: &str) -> Result<QuotaState, Error> {
        let live = self
            .workloads
            .list_workloads(namespace)
            .await
            .context(CountWorkloadsSnafu { namespace })?
            .len();

        let state = QuotaState {
            live,
            limit: self.max_workloads,
        };
        debug!(live = state.live, limit = state.limit, "computed quota state");

        Ok(state)
    }

    /// Returns whether another workload may be created in `namespace`.
    pub async fn check_quota(&self, namespace: &str) -> Result<bool, Error> {
        Ok(self.quota_state(namespace).await?.within_limit())
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::{
        cluster::memory::MemoryCluster,
        crd::knative::{KnativeService, KnativeServiceSpec},
    };

    fn cluster_with_workloads(namespace: &str, count: usize) -> MemoryCluster {
        (0..count).fold(MemoryCluster::new(), |cluster, index| {
            cluster.with_workload(
                namespace,
                KnativeService::new(&format!("app{index}"), KnativeServiceSpec::default()),
            )
        })
    }

    #[rstest]
    #[case(0, true)]
    #[case(6, true)]
    #[case(7, false)]
    #[case(9, false)]
    #[tokio::test]
    async fn check_quota_against_default(#[case] live: usize, #[case] within_limit: bool) {
        let guard = QuotaGuard::new(
            Arc::new(cluster_with_workloads("alice3k9x2a", live)),
            DEFAULT_MAX_WORKLOADS,
        );

        assert_eq!(
            guard
                .check_quota("alice3k9x2a")
                .await
                .expect("quota must be computable"),
            within_limit
        );
    }

    #[tokio::test]
    async fn other_namespaces_do_not_count() {
        let guard = QuotaGuard::new(Arc::new(cluster_with_workloads("bob8f7d6c", 3)), 2);

        let state = guard
            .quota_state("alice3k9x2a")
            .await
            .expect("quota must be computable");
        assert_eq!(state, QuotaState { live: 0, limit: 2 });
    }
}
