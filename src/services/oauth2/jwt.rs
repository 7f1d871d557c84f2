use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Serialize, de::DeserializeOwned};
use tracing::{error, warn};

use crate::error::AppError;

/// EdDSA (Ed25519) signer for broker-issued JWTs (registration access
/// tokens). Key material is never printable via Debug.
#[derive(Clone)]
pub struct JwtIssuer {
    issuer: String,
    encoding_key: EncodingKey,
}

impl std::fmt::Debug for JwtIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtIssuer")
            .field("issuer", &self.issuer)
            .finish()
    }
}

impl JwtIssuer {
    /// `private_key_pem` must be an Ed25519 private key in PKCS#8 PEM format.
    pub fn new(private_key_pem: &str, issuer: String) -> Result<Self, AppError> {
        let encoding_key = EncodingKey::from_ed_pem(private_key_pem.as_bytes()).map_err(|e| {
            warn!(error = %e, "failed to parse JWT private key PEM (expected Ed25519 PKCS#8 PEM)");
            AppError::Internal
        })?;

        Ok(Self {
            issuer,
            encoding_key,
        })
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn sign<T: Serialize>(&self, claims: &T) -> Result<String, AppError> {
        let mut header = Header::new(Algorithm::EdDSA);
        header.typ = Some("JWT".to_string());
        jsonwebtoken::encode(&header, claims, &self.encoding_key).map_err(|e| {
            error!(error = %e, "failed to sign JWT");
            AppError::Internal
        })
    }
}

/// Verifier counterpart: signature + `iss`/`aud`/`exp` via jsonwebtoken;
/// callers add their own claim-level checks on top.
#[derive(Clone)]
pub struct JwtVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl std::fmt::Debug for JwtVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtVerifier")
            .field("validation", &self.validation)
            .finish()
    }
}

impl JwtVerifier {
    pub fn new(public_key_pem: &str, issuer: &str, audience: &str) -> Result<Self, AppError> {
        let decoding_key = DecodingKey::from_ed_pem(public_key_pem.as_bytes()).map_err(|e| {
            warn!(error = %e, "failed to parse JWT public key PEM (expected Ed25519 PEM)");
            AppError::Internal
        })?;

        let mut validation = Validation::new(Algorithm::EdDSA);
        validation.set_issuer(&[issuer]);
        validation.set_audience(&[audience]);

        Ok(Self {
            decoding_key,
            validation,
        })
    }

    pub fn verify<T: DeserializeOwned>(&self, token: &str) -> Result<T, AppError> {
        let data = jsonwebtoken::decode::<T>(token, &self.decoding_key, &self.validation)
            .map_err(|_| AppError::Unauthorized)?;
        Ok(data.claims)
    }
}
