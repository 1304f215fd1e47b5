//! The Knative serving `Service`, which is the workload object of the serverless scheduler.
//!
//! Only the fields the app-controller writes or inspects are modelled. Every other field the
//! scheduler sets is kept in the `extra` map of the enclosing struct, so an object read from the
//! scheduler serializes back unchanged.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Container, LocalObjectReference};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const GROUP: &str = "serving.knative.dev";
pub const VERSION: &str = "v1";
pub const API_VERSION: &str = "serving.knative.dev/v1";
pub const LIST_KIND: &str = "ServiceList";

/// Upper bound of replicas the autoscaler may scale a revision to.
pub const MAX_SCALE_ANNOTATION: &str = "autoscaling.knative.dev/maxScale";

/// The image as requested by the user, before the scheduler resolves it to a digest.
pub const USER_IMAGE_ANNOTATION: &str = "client.knative.dev/user-image";

/// A serverless workload, which scales its revisions with the incoming requests.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[kube(
    group = "serving.knative.dev",
    version = "v1",
    kind = "Service",
    root = "KnativeService",
    plural = "services",
    shortname = "ksvc",
    status = "KnativeServiceStatus",
    derive = "PartialEq",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct KnativeServiceSpec {
    /// Template for the revisions created from this service.
    pub template: RevisionTemplateSpec,

    /// Traffic targets and other fields the controller does not interpret.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RevisionTemplateSpec {
    #[serde(default)]
    pub metadata: RevisionTemplateMetadata,

    pub spec: RevisionSpec,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RevisionTemplateMetadata {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RevisionSpec {
    /// Knative runs exactly one serving container per revision.
    pub containers: Vec<Container>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_secrets: Option<Vec<LocalObjectReference>>,

    /// Maximum number of in-flight requests per replica, `0` means unbounded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_concurrency: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<i64>,

    /// Service account, volumes and the remaining pod spec fields.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct KnativeServiceStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_created_revision_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_ready_revision_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<StatusCondition>,

    /// Address, traffic and the remaining status fields.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StatusCondition {
    #[serde(rename = "type")]
    pub type_: String,

    pub status: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// The list document returned to callers, shaped like the list the scheduler's API serves.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KnativeServiceList {
    pub api_version: String,
    pub kind: String,
    pub items: Vec<KnativeService>,
}

impl From<Vec<KnativeService>> for KnativeServiceList {
    fn from(items: Vec<KnativeService>) -> Self {
        Self {
            api_version: API_VERSION.to_owned(),
            kind: LIST_KIND.to_owned(),
            items,
        }
    }
}

impl KnativeService {
    /// The serving container, if the spec has one.
    pub fn container(&self) -> Option<&Container> {
        self.spec.template.spec.containers.first()
    }

    /// The names of all image pull secrets referenced by the revision template.
    pub fn pull_secret_names(&self) -> impl Iterator<Item = &str> {
        self.spec
            .template
            .spec
            .image_pull_secrets
            .iter()
            .flatten()
            .map(|reference| reference.name.as_str())
    }

    /// Whether the scheduler reports the service as ready to serve.
    pub fn is_ready(&self) -> bool {
        self.status.as_ref().is_some_and(|status| {
            status
                .conditions
                .iter()
                .any(|condition| condition.type_ == "Ready" && condition.status == "True")
        })
    }
}
