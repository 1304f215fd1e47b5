use axum::{
    Json,
    extract::{FromRequestParts, Path, State, rejection::JsonRejection},
    http::{header::AUTHORIZATION, request::Parts},
};
use serde::Deserialize;
use snafu::ResultExt;
use tracing::instrument;

use crate::{
    api::{
        AppState,
        error::{ApiError, AuthenticateSnafu, InvalidBodySnafu, ResolveTenantSnafu},
    },
    auth::bearer_token,
    crd::knative::{KnativeService, KnativeServiceList},
    identity::Identity,
    registry::RegistryCredentials,
    tenant::ResolvedNamespace,
    workload::CreateWorkload,
};

/// The verified identity of the caller.
pub struct Authenticated(pub Identity);

impl FromRequestParts<AppState> for Authenticated {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, ApiError> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok());
        let token = bearer_token(header).context(AuthenticateSnafu)?;
        let claims = state.verifier.verify(token).context(AuthenticateSnafu)?;

        Ok(Self(Identity::from(claims)))
    }
}

#[derive(Debug, Deserialize)]
pub struct EnvVarRequest {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAppRequest {
    pub name: String,
    pub image: String,

    #[serde(default)]
    pub port: Option<String>,

    #[serde(default)]
    pub envs: Vec<EnvVarRequest>,

    /// Name of the pull secret to create or reference.
    #[serde(default, alias = "secretName")]
    pub secret: Option<String>,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,
}

impl From<CreateAppRequest> for CreateWorkload {
    fn from(request: CreateAppRequest) -> Self {
        let credentials = match (request.username, request.password) {
            (Some(username), Some(password)) if !username.is_empty() && !password.is_empty() => {
                Some(RegistryCredentials { username, password })
            }
            _ => None,
        };

        Self {
            name: request.name,
            image: request.image,
            env: request
                .envs
                .into_iter()
                .map(|env| (env.key, env.value))
                .collect(),
            port: request.port,
            secret_name: request.secret.filter(|secret| !secret.is_empty()),
            credentials,
        }
    }
}

#[instrument(skip_all)]
pub async fn login(
    State(state): State<AppState>,
    Authenticated(identity): Authenticated,
) -> Result<Json<ResolvedNamespace>, ApiError> {
    let resolved = state
        .within_deadline(async {
            state
                .tenants
                .resolve_namespace(&identity)
                .await
                .context(ResolveTenantSnafu)
        })
        .await?;

    Ok(Json(resolved))
}

#[instrument(skip_all)]
pub async fn list_apps(
    State(state): State<AppState>,
    Authenticated(identity): Authenticated,
) -> Result<Json<KnativeServiceList>, ApiError> {
    let workloads = state
        .within_deadline(async {
            let namespace = state.namespace_of(&identity).await?;
            Ok(state.workloads.list(&namespace).await?)
        })
        .await?;

    Ok(Json(workloads))
}

#[instrument(skip_all, fields(workload = %name))]
pub async fn get_app(
    State(state): State<AppState>,
    Authenticated(identity): Authenticated,
    Path(name): Path<String>,
) -> Result<Json<KnativeService>, ApiError> {
    let workload = state
        .within_deadline(async {
            let namespace = state.namespace_of(&identity).await?;
            Ok(state.workloads.get_by_name(&namespace, &name).await?)
        })
        .await?;

    Ok(Json(workload))
}

#[instrument(skip_all)]
pub async fn create_app(
    State(state): State<AppState>,
    Authenticated(identity): Authenticated,
    payload: Result<Json<CreateAppRequest>, JsonRejection>,
) -> Result<Json<KnativeService>, ApiError> {
    let Json(request) = payload.context(InvalidBodySnafu)?;
    let request = CreateWorkload::from(request);

    let workload = state
        .within_deadline(async {
            let namespace = state.namespace_of(&identity).await?;
            Ok(state.workloads.create(&namespace, &request).await?)
        })
        .await?;

    Ok(Json(workload))
}

#[instrument(skip_all, fields(workload = %name))]
pub async fn delete_app(
    State(state): State<AppState>,
    Authenticated(identity): Authenticated,
    Path(name): Path<String>,
) -> Result<(), ApiError> {
    state
        .within_deadline(async {
            let namespace = state.namespace_of(&identity).await?;
            Ok(state.workloads.delete(&namespace, &name).await?)
        })
        .await
}
