//! Bearer credential verification.
//!
//! Tokens are HS256 JWTs signed with the secret shared with the identity
//! service. Verification is stateless: a valid signature and an unexpired
//! `exp` are enough, no user store is consulted.

use http::header::AUTHORIZATION;
use http::HeaderMap;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use thiserror::Error;
use threshold_core::{Claims, GatewayError, Identity};

/// Why a credential was not accepted.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No `Authorization` header.
    #[error("no credential provided")]
    Missing,

    /// The header is not `Bearer <token>`.
    #[error("malformed authorization header")]
    Malformed,

    /// The token's `exp` has passed.
    #[error("credential has expired")]
    Expired,

    /// Signature, algorithm or claim shape rejected.
    #[error("credential rejected: {0}")]
    Invalid(#[source] jsonwebtoken::errors::Error),
}

impl From<AuthError> for GatewayError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Missing => Self::MissingCredential,
            AuthError::Malformed => Self::MalformedCredential,
            AuthError::Expired => Self::ExpiredCredential,
            AuthError::Invalid(source) => {
                Self::invalid_credential_with_source("signature or claims rejected", source)
            }
        }
    }
}

/// Verifies bearer tokens against the shared signing secret.
#[derive(Clone)]
pub struct TokenVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    /// Creates a verifier for `secret`, tolerating `leeway_secs` of clock skew.
    #[must_use]
    pub fn new(secret: &str, leeway_secs: u64) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = leeway_secs;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Extracts the token from `Authorization: Bearer <token>`.
    pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
        let value = headers.get(AUTHORIZATION).ok_or(AuthError::Missing)?;
        let value = value.to_str().map_err(|_| AuthError::Malformed)?;

        let mut parts = value.trim().splitn(2, ' ');
        let scheme = parts.next().unwrap_or_default();
        let token = parts.next().map(str::trim).unwrap_or_default();

        if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
            return Err(AuthError::Malformed);
        }
        Ok(token)
    }

    /// Verifies a raw token and returns the caller it names.
    pub fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| Identity::from(data.claims))
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::Invalid(e),
            })
    }

    /// Extracts and verifies the bearer credential in `headers`.
    pub fn authenticate(&self, headers: &HeaderMap) -> Result<Identity, AuthError> {
        let token = Self::bearer_token(headers)?;
        self.verify(token)
    }
}

impl std::fmt::Debug for TokenVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenVerifier")
            .field("leeway", &self.validation.leeway)
            .finish_non_exhaustive()
    }
}

/// Signs `claims` with `secret` (HS256).
///
/// The gateway never issues tokens in production; this exists for local
/// tooling and tests that need a credential the verifier accepts.
pub fn sign_token(claims: &Claims, secret: &str) -> Result<String, AuthError> {
    encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(AuthError::Invalid)
}
