use std::collections::BTreeMap;

/// The principal a request is made on behalf of. All pin records are
/// partitioned by `id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinningUser {
    pub id: String,
}

/// Resolves bearer tokens to users.
#[async_trait::async_trait]
pub trait AccessTokenValidator: Send + Sync + std::fmt::Debug {
    /// Returns `None` for unknown or expired tokens.
    async fn validate(&self, token: &str) -> anyhow::Result<Option<PinningUser>>;
}

/// Fixed token table, as configured in the node's `[users]` section.
#[derive(Debug, Clone, Default)]
pub struct StaticTokens {
    tokens: BTreeMap<String, String>,
}

impl StaticTokens {
    pub fn new(tokens: BTreeMap<String, String>) -> Self {
        Self { tokens }
    }

    pub fn with_token(mut self, token: impl Into<String>, owner: impl Into<String>) -> Self {
        self.tokens.insert(token.into(), owner.into());
        self
    }
}

#[async_trait::async_trait]
impl AccessTokenValidator for StaticTokens {
    async fn validate(&self, token: &str) -> anyhow::Result<Option<PinningUser>> {
        Ok(self
            .tokens
            .get(token)
            .map(|owner| PinningUser { id: owner.clone() }))
    }
}
