//! Converts verified token claims into the canonical [`Identity`] of a caller.

use jiff::Timestamp;
use serde::{Deserialize, Serialize};

/// Subjects issued through a source-control login carry this marker, e.g. `github|123`.
const SOURCE_CONTROL_SUBJECT_MARKER: &str = "github";

/// The claims consumed from a verified token.
///
/// Only these fields are extracted, every field except `exp` is optional and defaults to empty.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct Claims {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub email: String,

    #[serde(default)]
    pub nickname: String,

    #[serde(default)]
    pub sub: String,

    #[serde(default)]
    pub aud: Audience,

    pub exp: i64,
}

/// The `aud` claim, which is either a single string or a list of strings.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Audience {
    Single(String),
    Multiple(Vec<String>),
}

impl Default for Audience {
    fn default() -> Self {
        Self::Multiple(Vec::new())
    }
}

impl Audience {
    /// The first audience, which is the one the token was issued for.
    pub fn primary(&self) -> Option<&str> {
        match self {
            Self::Single(audience) => Some(audience),
            Self::Multiple(audiences) => audiences.first().map(String::as_str),
        }
    }
}

/// Where the identity was authenticated.
///
/// This decides which natural key identifies the tenant, because source-control logins do not
/// guarantee a stable email address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubjectSource {
    /// A source-control login, keyed by nickname.
    SourceControl { subject: String },

    /// Any other identity provider, keyed by email.
    Other { subject: String },
}

impl SubjectSource {
    pub fn from_subject(subject: impl Into<String>) -> Self {
        let subject = subject.into();
        if subject.contains(SOURCE_CONTROL_SUBJECT_MARKER) {
            Self::SourceControl { subject }
        } else {
            Self::Other { subject }
        }
    }

    pub fn subject(&self) -> &str {
        match self {
            Self::SourceControl { subject } | Self::Other { subject } => subject,
        }
    }

    pub fn is_source_control(&self) -> bool {
        matches!(self, Self::SourceControl { .. })
    }
}

/// The caller of a request, produced once per request from verified claims.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    pub display_name: String,
    pub email: String,
    pub nickname: String,
    pub subject_source: SubjectSource,
    pub audience: Option<String>,

    /// `None` if the `exp` claim is outside the representable range.
    pub expiry: Option<Timestamp>,
}

impl From<Claims> for Identity {
    fn from(claims: Claims) -> Self {
        let Claims {
            name,
            email,
            nickname,
            sub,
            aud,
            exp,
        } = claims;

        Self {
            display_name: name,
            email,
            nickname,
            subject_source: SubjectSource::from_subject(sub),
            audience: aud.primary().map(ToOwned::to_owned),
            expiry: Timestamp::from_second(exp).ok(),
        }
    }
}

impl Identity {
    /// The prefix namespace names of this identity are derived from: the nickname for
    /// source-control identities, the local part of the email otherwise.
    pub fn namespace_prefix(&self) -> &str {
        if self.subject_source.is_source_control() {
            &self.nickname
        } else {
            self.email
                .split_once('@')
                .map_or(self.email.as_str(), |(local_part, _)| local_part)
        }
    }
}
