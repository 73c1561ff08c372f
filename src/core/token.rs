//! Shared-Secret Lookup
//!
//! v2 votes are signed with a token shared between the listing site and the
//! server. Sites identify themselves by service name, which lets a server
//! hold one token per site.

use rand::Rng;
use std::collections::BTreeMap;

/// Characters of a generated token.
const TOKEN_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Length of a generated token (about 134 bits).
pub const GENERATED_TOKEN_LEN: usize = 26;

/// Resolves the v2 token for a service.
pub trait TokenProvider: Send + Sync {
    /// Token for `service`.
    fn token(&self, service: &str) -> String;
}

impl<F> TokenProvider for F
where
    F: Fn(&str) -> String + Send + Sync,
{
    fn token(&self, service: &str) -> String {
        self(service)
    }
}

/// Same token for every service.
#[derive(Clone)]
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    /// Provider that always answers `token`.
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: token.into() }
    }
}

impl TokenProvider for StaticTokenProvider {
    fn token(&self, _service: &str) -> String {
        self.token.clone()
    }
}

impl std::fmt::Debug for StaticTokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticTokenProvider").field("token", &"<redacted>").finish()
    }
}

/// Per-service tokens with an optional fallback.
///
/// Unknown services without a fallback resolve to an empty token, which
/// never verifies a signature made with a real one.
#[derive(Clone, Default)]
pub struct ServiceTokens {
    tokens: BTreeMap<String, String>,
    fallback: Option<String>,
}

impl ServiceTokens {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the token for a service.
    pub fn insert(&mut self, service: impl Into<String>, token: impl Into<String>) {
        self.tokens.insert(service.into(), token.into());
    }

    /// Builder form of [`ServiceTokens::insert`].
    pub fn with(mut self, service: impl Into<String>, token: impl Into<String>) -> Self {
        self.insert(service, token);
        self
    }

    /// Token used for services not in the table.
    pub fn with_fallback(mut self, token: impl Into<String>) -> Self {
        self.fallback = Some(token.into());
        self
    }

    /// Number of registered services.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Whether no service is registered.
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl TokenProvider for ServiceTokens {
    fn token(&self, service: &str) -> String {
        self.tokens
            .get(service)
            .or(self.fallback.as_ref())
            .cloned()
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for ServiceTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceTokens")
            .field("services", &self.tokens.keys().collect::<Vec<_>>())
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

/// Random base-36 token for servers that were not given one.
pub fn generate_token() -> String {
    let mut rng = rand::thread_rng();
    (0..GENERATED_TOKEN_LEN)
        .map(|_| TOKEN_ALPHABET[rng.gen_range(0..TOKEN_ALPHABET.len())] as char)
        .collect()
}
