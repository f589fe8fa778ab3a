use std::{fmt, sync::RwLock};

use async_trait::async_trait;
use zeroize::Zeroize;

#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn bearer_header(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

impl Drop for Credential {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn credential(&self) -> Option<Credential>;
}

#[derive(Default)]
pub struct MemoryCredentialStore {
    token: RwLock<Option<Credential>>,
}

impl MemoryCredentialStore {
    pub fn new(credential: Option<Credential>) -> Self {
        Self {
            token: RwLock::new(credential),
        }
    }

    pub fn set(&self, credential: Credential) {
        let mut guard = self.token.write().unwrap_or_else(|e| e.into_inner());
        *guard = Some(credential);
    }

    pub fn clear(&self) {
        let mut guard = self.token.write().unwrap_or_else(|e| e.into_inner());
        guard.take();
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn credential(&self) -> Option<Credential> {
        self.token
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

pub struct EnvCredentialStore {
    var: String,
}

impl EnvCredentialStore {
    pub const DEFAULT_VAR: &'static str = "CHAT_TOKEN";

    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl Default for EnvCredentialStore {
    fn default() -> Self {
        Self::new(Self::DEFAULT_VAR)
    }
}

#[async_trait]
impl CredentialStore for EnvCredentialStore {
    async fn credential(&self) -> Option<Credential> {
        std::env::var(&self.var)
            .ok()
            .filter(|token| !token.trim().is_empty())
            .map(Credential::new)
    }
}
