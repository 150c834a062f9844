// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Signed bearer tokens
//!
//! Tokens are HS256 JWTs. Only HS256 is accepted on verification; expiry
//! is checked against the caller's clock rather than the system time.

use std::time::Duration;

use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use ork_core::{AgentTokenId, Job, JobId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const ALGORITHM: Algorithm = Algorithm::HS256;

/// Default lifetime of job and dynamic credential tokens
pub const DEFAULT_TOKEN_EXPIRY: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("malformed token")]
    Malformed,

    #[error("invalid token signature")]
    BadSignature,

    #[error("token not signed with HS256")]
    WrongAlgorithm,

    #[error("token expired")]
    Expired,

    #[error("expected {expected:?} token, got {actual:?}")]
    WrongKind {
        expected: TokenKind,
        actual: TokenKind,
    },

    #[error("token no longer refers to a live {0}")]
    Revoked(&'static str),

    #[error("no signing key configured")]
    NoSigningKey,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Job,
    AgentToken,
    DynamicCredentials,
}

/// Token payload
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub kind: TokenKind,
    pub sub: String,
    pub iat: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_phase: Option<String>,
}

impl Claims {
    fn new(kind: TokenKind, sub: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            kind,
            sub: sub.into(),
            iat: now.timestamp(),
            exp: None,
            aud: None,
            organization: None,
            workspace_id: None,
            run_id: None,
            run_phase: None,
        }
    }

    fn expires_in(mut self, ttl: Duration, now: DateTime<Utc>) -> Self {
        self.exp = Some(now.timestamp().saturating_add(ttl.as_secs() as i64));
        self
    }
}

/// Mints and verifies tokens with one symmetric key
#[derive(Clone)]
pub struct TokenSigner {
    key: Vec<u8>,
    expiry: Duration,
}

impl std::fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSigner")
            .field("expiry", &self.expiry)
            .finish_non_exhaustive()
    }
}

impl TokenSigner {
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            expiry: DEFAULT_TOKEN_EXPIRY,
        }
    }

    pub fn with_expiry(mut self, expiry: Duration) -> Self {
        self.expiry = expiry;
        self
    }

    pub fn sign(&self, claims: &Claims) -> Result<String, TokenError> {
        jsonwebtoken::encode(
            &Header::new(ALGORITHM),
            claims,
            &EncodingKey::from_secret(&self.key),
        )
        .map_err(|_| TokenError::Malformed)
    }

    /// Check algorithm, signature and expiry, returning the claims
    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(ALGORITHM);
        // Agent tokens carry no `exp`; audiences are for relying parties.
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let claims = jsonwebtoken::decode::<Claims>(
            token,
            &DecodingKey::from_secret(&self.key),
            &validation,
        )
        .map_err(|e| match e.kind() {
            ErrorKind::InvalidSignature => TokenError::BadSignature,
            ErrorKind::InvalidAlgorithm => TokenError::WrongAlgorithm,
            _ => TokenError::Malformed,
        })?
        .claims;
        if claims.exp.is_some_and(|exp| now.timestamp() >= exp) {
            return Err(TokenError::Expired);
        }
        Ok(claims)
    }

    /// Verify and require a particular kind of token
    pub fn verify_kind(
        &self,
        token: &str,
        kind: TokenKind,
        now: DateTime<Utc>,
    ) -> Result<Claims, TokenError> {
        let claims = self.verify(token, now)?;
        if claims.kind != kind {
            return Err(TokenError::WrongKind {
                expected: kind,
                actual: claims.kind,
            });
        }
        Ok(claims)
    }

    /// Time-limited token authenticating calls made on behalf of a job
    pub fn job_token(&self, job: &JobId, now: DateTime<Utc>) -> Result<String, TokenError> {
        self.sign(&Claims::new(TokenKind::Job, job.as_str(), now).expires_in(self.expiry, now))
    }

    /// Long-lived token for pool runner registration
    pub fn agent_token(&self, id: &AgentTokenId, now: DateTime<Utc>) -> Result<String, TokenError> {
        self.sign(&Claims::new(TokenKind::AgentToken, id.as_str(), now))
    }

    /// Workload identity token bound to the job's run phase
    pub fn dynamic_credentials(
        &self,
        job: &Job,
        audience: &str,
        now: DateTime<Utc>,
    ) -> Result<String, TokenError> {
        let mut claims = Claims::new(
            TokenKind::DynamicCredentials,
            format!(
                "organization:{}:workspace:{}:run_phase:{}",
                job.organization, job.workspace_id, job.spec.phase
            ),
            now,
        )
        .expires_in(self.expiry, now);
        claims.aud = Some(audience.to_string());
        claims.organization = Some(job.organization.clone());
        claims.workspace_id = Some(job.workspace_id.to_string());
        claims.run_id = Some(job.spec.run_id.to_string());
        claims.run_phase = Some(job.spec.phase.to_string());
        self.sign(&claims)
    }
}

#[cfg(test)]
#[path = "tokens_tests.rs"]
mod tests;
