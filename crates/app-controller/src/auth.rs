//! Token verification.
//!
//! Claims are never trusted before the signature, the audience and the expiry have been checked.
//! [`JwksVerifier`] does this with keys from a JSON Web Key Set.

use std::path::{Path, PathBuf};

use jsonwebtoken::{
    Algorithm, DecodingKey, Validation,
    errors::ErrorKind as JwtErrorKind,
    jwk::{Jwk, JwkSet},
};
use snafu::{OptionExt, ResultExt, Snafu};

use crate::{
    error::{ControllerError, ErrorKind},
    identity::Claims,
};

#[derive(Debug, Snafu, strum::EnumDiscriminants)]
#[strum_discriminants(derive(strum::IntoStaticStr))]
pub enum Error {
    #[snafu(display("no bearer token present in the Authorization header"))]
    MissingToken,

    #[snafu(display("token is expired"))]
    Expired,

    #[snafu(display("token header cannot be decoded"))]
    DecodeHeader { source: jsonwebtoken::errors::Error },

    #[snafu(display("token algorithm {algorithm:?} is not allowed"))]
    AlgorithmNotAllowed { algorithm: Algorithm },

    #[snafu(display("no signing key matches the token key id {kid:?}"))]
    UnknownKey { kid: Option<String> },

    #[snafu(display("signing key {kid:?} cannot be used for verification"))]
    InvalidKey {
        source: jsonwebtoken::errors::Error,
        kid: Option<String>,
    },

    #[snafu(display("token is invalid"))]
    InvalidToken { source: jsonwebtoken::errors::Error },
}

impl ControllerError for Error {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Auth
    }

    fn category(&self) -> &'static str {
        ErrorDiscriminants::from(self).into()
    }
}

#[derive(Debug, Snafu)]
pub enum KeySetError {
    #[snafu(display("failed to read JSON Web Key Set from {path:?}"))]
    ReadKeySet {
        source: std::io::Error,
        path: PathBuf,
    },

    #[snafu(display("failed to parse JSON Web Key Set from {path:?}"))]
    ParseKeySet {
        source: serde_json::Error,
        path: PathBuf,
    },
}

/// Verifies a token and returns the claims it carries.
pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<Claims, Error>;
}

/// Extracts the token from an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header_value: Option<&str>) -> Result<&str, Error> {
    header_value
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .context(MissingTokenSnafu)
}

/// A [`TokenVerifier`] backed by a JSON Web Key Set.
pub struct JwksVerifier {
    key_set: JwkSet,
    audience: String,
    algorithms: Vec<Algorithm>,
}

impl JwksVerifier {
    pub fn new(key_set: JwkSet, audience: impl Into<String>, algorithms: Vec<Algorithm>) -> Self {
        Self {
            key_set,
            audience: audience.into(),
            algorithms,
        }
    }

    /// Loads the key set from a JSON file, as served by the identity provider's
    /// `/.well-known/jwks.json` endpoint.
    pub async fn from_file(
        path: &Path,
        audience: impl Into<String>,
        algorithms: Vec<Algorithm>,
    ) -> Result<Self, KeySetError> {
        let content = tokio::fs::read(path)
            .await
            .context(ReadKeySetSnafu { path })?;
        let key_set = serde_json::from_slice(&content).context(ParseKeySetSnafu { path })?;

        Ok(Self::new(key_set, audience, algorithms))
    }

    fn find_key(&self, kid: Option<&str>) -> Option<&Jwk> {
        match kid {
            Some(kid) => self.key_set.find(kid),
            // Tokens without a key id are only accepted from single-key sets.
            None if self.key_set.keys.len() == 1 => self.key_set.keys.first(),
            None => None,
        }
    }
}

impl TokenVerifier for JwksVerifier {
    fn verify(&self, token: &str) -> Result<Claims, Error> {
        let header = jsonwebtoken::decode_header(token).context(DecodeHeaderSnafu)?;

        if !self.algorithms.contains(&header.alg) {
            return AlgorithmNotAllowedSnafu {
                algorithm: header.alg,
            }
            .fail();
        }

        let jwk = self
            .find_key(header.kid.as_deref())
            .context(UnknownKeySnafu {
                kid: header.kid.clone(),
            })?;
        let key = DecodingKey::from_jwk(jwk).context(InvalidKeySnafu {
            kid: header.kid.clone(),
        })?;

        let mut validation = Validation::new(header.alg);
        validation.set_audience(&[&self.audience]);
        validation.set_required_spec_claims(&["exp", "aud"]);

        match jsonwebtoken::decode::<Claims>(token, &key, &validation) {
            Ok(data) => Ok(data.claims),
            Err(error) if matches!(error.kind(), JwtErrorKind::ExpiredSignature) => {
                ExpiredSnafu.fail()
            }
            Err(error) => Err(error).context(InvalidTokenSnafu),
        }
    }
}
