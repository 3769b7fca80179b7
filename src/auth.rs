//! Token Verifier (component A, §2): the sole authentication collaborator.
//! Everything downstream — the state machine's `authenticating -> active`
//! transition — depends only on this trait, never on how credentials are
//! actually issued (out of scope per §1).

use crate::error::{Error, Result};
use crate::types::UserId;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

/// Given an opaque credential, returns a user identity or an `authentication`
/// error. Implementations own whatever token format, signature check, or
/// session-store lookup their deployment uses.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, credential: &str) -> Result<UserId>;
}

/// A fixed credential → user map, for tests and local development. Never
/// suitable for production use: credentials are compared in plain text and
/// never expire.
#[derive(Default)]
pub struct StaticTokenVerifier {
    tokens: RwLock<HashMap<String, UserId>>,
}

impl StaticTokenVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issue(&self, credential: impl Into<String>, user: UserId) {
        self.tokens.write().unwrap().insert(credential.into(), user);
    }
}

#[async_trait]
impl TokenVerifier for StaticTokenVerifier {
    async fn verify(&self, credential: &str) -> Result<UserId> {
        self.tokens
            .read()
            .unwrap()
            .get(credential)
            .cloned()
            .ok_or_else(|| Error::authentication("credential not recognized"))
    }
}
