//! Bearer-token resolution for the chat broker connection.
//!
//! Tokens are looked up synchronously at connect time in a fixed order:
//! in-memory cache → token file → cookie file. The transport never refreshes
//! tokens; on an authentication failure it clears the cache and expects the
//! host application to re-authenticate and call `connect()` again.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// Default cookie name consulted by the cookie-file fallback.
pub const DEFAULT_COOKIE_NAME: &str = "access_token";

/// Token storage and resolution chain.
///
/// # Example
///
/// ```rust,no_run
/// use souq_link::TokenStore;
///
/// let tokens = TokenStore::new()
///     .with_token_path("/var/lib/souq/session.token")
///     .with_cookie_path("/var/lib/souq/cookies.txt");
///
/// if let Some(token) = tokens.resolve() {
///     println!("connecting with bearer token ({} chars)", token.len());
/// }
/// ```
pub struct TokenStore {
    cache: RwLock<Option<String>>,
    token_path: Option<PathBuf>,
    cookie_path: Option<PathBuf>,
    cookie_name: String,
}

impl TokenStore {
    pub fn new() -> Self {
        Self {
            cache: RwLock::new(None),
            token_path: None,
            cookie_path: None,
            cookie_name: DEFAULT_COOKIE_NAME.to_string(),
        }
    }

    /// Pre-seed the in-memory cache with a token.
    pub fn with_token(self, token: impl Into<String>) -> Self {
        *self.cache.write().unwrap() = Some(token.into());
        self
    }

    /// Set the persistent token file (first non-empty line, trimmed).
    pub fn with_token_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.token_path = Some(path.into());
        self
    }

    /// Set the cookie-jar file used as the last fallback.
    pub fn with_cookie_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cookie_path = Some(path.into());
        self
    }

    /// Set the cookie name looked up in the cookie file.
    pub fn with_cookie_name(mut self, name: impl Into<String>) -> Self {
        self.cookie_name = name.into();
        self
    }

    /// Resolve a bearer token: cache → token file → cookie file.
    ///
    /// A token found on disk is promoted into the cache so later lookups
    /// (and reconnect attempts) skip the filesystem.
    pub fn resolve(&self) -> Option<String> {
        if let Some(token) = self.cache.read().unwrap().clone() {
            return Some(token);
        }
        if let Some(token) = self.token_path.as_deref().and_then(read_token_file) {
            self.cache_token(token.clone());
            return Some(token);
        }
        if let Some(token) = self
            .cookie_path
            .as_deref()
            .and_then(|path| read_cookie_file(path, &self.cookie_name))
        {
            self.cache_token(token.clone());
            return Some(token);
        }
        None
    }

    /// Store a token in the in-memory cache.
    pub fn cache_token(&self, token: impl Into<String>) {
        *self.cache.write().unwrap() = Some(token.into());
    }

    /// Drop the cached token. Called on authentication failure so the next
    /// `connect()` re-reads whatever the host application wrote after
    /// re-authenticating.
    pub fn clear_cache(&self) {
        *self.cache.write().unwrap() = None;
    }
}

impl Default for TokenStore {
    fn default() -> Self {
        Self::new()
    }
}

fn read_token_file(path: &Path) -> Option<String> {
    let contents = fs::read_to_string(path).ok()?;
    contents
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}

/// Look up a cookie by name. Each line may hold one `name=value` pair or a
/// `Cookie`-header style `a=1; b=2` list.
fn read_cookie_file(path: &Path, name: &str) -> Option<String> {
    let contents = fs::read_to_string(path).ok()?;
    for line in contents.lines() {
        for pair in line.split(';') {
            let pair = pair.trim();
            if let Some((key, value)) = pair.split_once('=') {
                if key.trim() == name && !value.trim().is_empty() {
                    return Some(value.trim().to_string());
                }
            }
        }
    }
    None
}
