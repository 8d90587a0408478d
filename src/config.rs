use std::env;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

pub const CREDENTIALS_ENV: &str = "GMAIL_CLEANUP_CREDENTIALS";
pub const TOKEN_ENV: &str = "GMAIL_CLEANUP_TOKEN";
pub const KEY_ENV: &str = "GMAIL_CLEANUP_KEY";

pub const DEFAULT_LOG_FILTER: &str = "gmail_cleanup=info,tauri=info";

const CREDENTIALS_FILE: &str = "credentials.json";
const TOKEN_FILE: &str = "token.json";
const KEY_FILE: &str = "token.key";

/// File locations used by the authenticator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub credentials_path: PathBuf,
    pub token_path: PathBuf,
    pub key_path: PathBuf,
}

impl Settings {
    /// Client secret is looked up in the working directory; the token cache and
    /// its key live in `data_dir` when one is given.
    pub fn with_data_dir(data_dir: Option<&Path>) -> Self {
        let data_dir = data_dir.map(Path::to_path_buf).unwrap_or_default();
        Self {
            credentials_path: PathBuf::from(CREDENTIALS_FILE),
            token_path: data_dir.join(TOKEN_FILE),
            key_path: data_dir.join(KEY_FILE),
        }
    }

    pub fn from_env(data_dir: Option<&Path>) -> Self {
        Self::with_data_dir(data_dir).apply_overrides(|name| env::var_os(name).map(PathBuf::from))
    }

    fn apply_overrides(mut self, lookup: impl Fn(&str) -> Option<PathBuf>) -> Self {
        if let Some(path) = lookup(CREDENTIALS_ENV) {
            self.credentials_path = path;
        }
        if let Some(path) = lookup(TOKEN_ENV) {
            self.token_path = path;
        }
        if let Some(path) = lookup(KEY_ENV) {
            self.key_path = path;
        }
        self
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::with_data_dir(None)
    }
}

/// `RUST_LOG` when it parses, otherwise [`DEFAULT_LOG_FILTER`].
pub fn log_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}
