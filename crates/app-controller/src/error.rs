//! Error classification shared by all app-controller components.
//!
//! Every module defines its own [`snafu`] error enum. To decide how an error surfaces to the
//! caller (for example which HTTP status code is returned), each of them implements
//! [`ControllerError`], which sorts it into one [`ErrorKind`].

/// The coarse classes of failures the app-controller distinguishes.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, strum::Display, strum::IntoStaticStr,
)]
pub enum ErrorKind {
    /// Bad, expired or absent token, or an identity without a tenant.
    Auth,

    /// Malformed input, such as a non-numeric port or an unknown registry.
    Validation,

    /// The referenced workload or namespace does not exist.
    NotFound,

    /// The workload or namespace already exists.
    Conflict,

    /// The tenant already runs the maximum number of workloads.
    QuotaExceeded,

    /// The cluster control API or the tenant store failed for infrastructural reasons.
    Upstream,
}

/// [`std::error::Error`] extensions used to report failures.
pub trait ControllerError: std::error::Error {
    /// The class of this failure.
    fn kind(&self) -> ErrorKind;

    /// `PascalCase`d name of the concrete error variant.
    ///
    /// This can typically be implemented by delegating to [`strum::EnumDiscriminants`] and
    /// [`strum::IntoStaticStr`].
    fn category(&self) -> &'static str;
}
