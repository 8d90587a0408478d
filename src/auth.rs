use crate::config::Settings;
use crate::models::Session;
use crate::token_store::{StoredToken, TokenStore, TokenStoreError};
use chrono::{DateTime, Duration, Utc};
use oauth2::basic::{BasicClient, BasicTokenResponse};
use oauth2::reqwest::async_http_client;
use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, PkceCodeChallenge,
    RedirectUrl, RefreshToken, Scope, TokenResponse, TokenUrl,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{info, warn};
use warp::Filter;

/// Full mailbox access; the narrower modify scope does not permit permanent deletes.
pub const GMAIL_SCOPE: &str = "https://mail.google.com/";

const GOOGLE_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";
const GOOGLE_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("{} not found", .0.display())]
    MissingClientSecret(PathBuf),
    #[error("invalid client secret: {0}")]
    InvalidClientSecret(String),
    #[error("token refresh failed: {0}")]
    Refresh(String),
    #[error("authorization code exchange failed: {0}")]
    Exchange(String),
    #[error("authorization redirect failed: {0}")]
    Redirect(String),
    #[error("failed to open browser: {0}")]
    Browser(String),
    #[error("token cache error: {0}")]
    TokenStore(#[from] TokenStoreError),
}

#[derive(Debug, Deserialize)]
struct ClientSecretFile {
    installed: Option<ClientSecretEntry>,
    web: Option<ClientSecretEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct ClientSecretEntry {
    client_id: String,
    client_secret: Option<String>,
    #[serde(default = "default_auth_uri")]
    auth_uri: String,
    #[serde(default = "default_token_uri")]
    token_uri: String,
}

fn default_auth_uri() -> String {
    GOOGLE_AUTH_URI.to_string()
}

fn default_token_uri() -> String {
    GOOGLE_TOKEN_URI.to_string()
}

/// OAuth client registration read from `credentials.json` or a cached token.
#[derive(Debug, Clone)]
struct OAuthApp {
    client_id: String,
    client_secret: Option<String>,
    auth_uri: String,
    token_uri: String,
}

impl OAuthApp {
    fn from_file(path: &Path) -> Result<Self, AuthError> {
        if !path.exists() {
            return Err(AuthError::MissingClientSecret(path.to_path_buf()));
        }
        let raw = fs::read_to_string(path)
            .map_err(|err| AuthError::InvalidClientSecret(err.to_string()))?;
        Self::parse(&raw)
    }

    fn parse(raw: &str) -> Result<Self, AuthError> {
        let file: ClientSecretFile = serde_json::from_str(raw)
            .map_err(|err| AuthError::InvalidClientSecret(err.to_string()))?;
        let entry = file.installed.or(file.web).ok_or_else(|| {
            AuthError::InvalidClientSecret("expected an `installed` or `web` section".into())
        })?;
        Ok(Self {
            client_id: entry.client_id,
            client_secret: entry.client_secret,
            auth_uri: entry.auth_uri,
            token_uri: entry.token_uri,
        })
    }

    fn from_stored(token: &StoredToken) -> Self {
        Self {
            client_id: token.client_id.clone(),
            client_secret: token.client_secret.clone(),
            auth_uri: GOOGLE_AUTH_URI.to_string(),
            token_uri: token.token_uri.clone(),
        }
    }

    fn client(&self) -> Result<BasicClient, AuthError> {
        let auth_url = AuthUrl::new(self.auth_uri.clone())
            .map_err(|err| AuthError::InvalidClientSecret(err.to_string()))?;
        let token_url = TokenUrl::new(self.token_uri.clone())
            .map_err(|err| AuthError::InvalidClientSecret(err.to_string()))?;
        Ok(BasicClient::new(
            ClientId::new(self.client_id.clone()),
            self.client_secret.clone().map(ClientSecret::new),
            auth_url,
            Some(token_url),
        ))
    }

    fn stored_token(
        &self,
        response: &BasicTokenResponse,
        previous_refresh: Option<String>,
        now: DateTime<Utc>,
    ) -> StoredToken {
        let lifetime = response
            .expires_in()
            .and_then(|expires_in| Duration::from_std(expires_in).ok())
            .unwrap_or_else(|| Duration::seconds(DEFAULT_TOKEN_LIFETIME_SECS));
        let scopes = response
            .scopes()
            .map(|scopes| scopes.iter().map(|scope| scope.to_string()).collect())
            .unwrap_or_else(|| vec![GMAIL_SCOPE.to_string()]);

        StoredToken {
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
            token_uri: self.token_uri.clone(),
            access_token: response.access_token().secret().clone(),
            refresh_token: response
                .refresh_token()
                .map(|token| token.secret().clone())
                .or(previous_refresh),
            expires_at: now + lifetime,
            scopes,
        }
    }
}

/// Produces a usable [`Session`], from the cache when possible.
pub struct SessionAuthenticator {
    settings: Settings,
    store: TokenStore,
}

impl SessionAuthenticator {
    pub fn new(settings: Settings) -> Self {
        let store = TokenStore::new(settings.token_path.clone(), settings.key_path.clone());
        Self { settings, store }
    }

    pub async fn authenticate(&self) -> Result<Session, AuthError> {
        let now = Utc::now();
        let cached = match self.store.load() {
            Ok(token) => token,
            Err(err) => {
                warn!(path = %self.store.token_path().display(), ?err, "ignoring unreadable token cache");
                None
            }
        };

        let token = match cached {
            Some(token) if token.is_valid_at(now) => {
                info!(expires_at = %token.expires_at, "using cached Gmail session");
                return Ok(token.session());
            }
            Some(token) if token.refresh_token.is_some() => {
                info!("cached Gmail session expired, refreshing");
                self.refresh(&token, now).await?
            }
            _ => {
                info!(cache_present = self.store.exists(), "requesting new Gmail authorization");
                self.issue_interactively(now).await?
            }
        };

        self.store.save(&token)?;
        Ok(token.session())
    }

    async fn refresh(&self, token: &StoredToken, now: DateTime<Utc>) -> Result<StoredToken, AuthError> {
        let refresh_token = token
            .refresh_token
            .clone()
            .ok_or_else(|| AuthError::Refresh("no refresh token cached".into()))?;
        let app = OAuthApp::from_stored(token);
        let response = app
            .client()?
            .exchange_refresh_token(&RefreshToken::new(refresh_token.clone()))
            .request_async(async_http_client)
            .await
            .map_err(|err| AuthError::Refresh(err.to_string()))?;

        Ok(app.stored_token(&response, Some(refresh_token), now))
    }

    async fn issue_interactively(&self, now: DateTime<Utc>) -> Result<StoredToken, AuthError> {
        let app = OAuthApp::from_file(&self.settings.credentials_path)?;
        let state = CsrfToken::new_random();
        let listener = RedirectListener::bind(state.secret().clone())?;
        let client = app.client()?.set_redirect_uri(
            RedirectUrl::new(listener.redirect_uri())
                .map_err(|err| AuthError::Redirect(err.to_string()))?,
        );

        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();
        let (auth_url, _state) = client
            .authorize_url(move || state)
            .add_scope(Scope::new(GMAIL_SCOPE.to_string()))
            .add_extra_param("access_type", "offline")
            .add_extra_param("prompt", "consent")
            .set_pkce_challenge(pkce_challenge)
            .url();

        info!(%auth_url, "waiting for Gmail consent in the browser");
        open_browser(auth_url.as_str())?;

        let code = listener.wait_for_code().await?;
        let response = client
            .exchange_code(AuthorizationCode::new(code))
            .set_pkce_verifier(pkce_verifier)
            .request_async(async_http_client)
            .await
            .map_err(|err| AuthError::Exchange(err.to_string()))?;

        Ok(app.stored_token(&response, None, now))
    }
}

type CodeSender = oneshot::Sender<Result<String, String>>;

/// One-shot loopback HTTP listener that receives the OAuth redirect.
struct RedirectListener {
    addr: SocketAddr,
    code_rx: oneshot::Receiver<Result<String, String>>,
    shutdown_tx: oneshot::Sender<()>,
}

impl RedirectListener {
    fn bind(expected_state: String) -> Result<Self, AuthError> {
        let (code_tx, code_rx) = oneshot::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let code_tx: Arc<parking_lot::Mutex<Option<CodeSender>>> =
            Arc::new(parking_lot::Mutex::new(Some(code_tx)));

        let routes = warp::path::end()
            .and(warp::get())
            .and(warp::query::<HashMap<String, String>>())
            .map(move |query: HashMap<String, String>| {
                let outcome = authorization_code_from_query(&query, &expected_state);
                let page = match &outcome {
                    Ok(_) => "Authorization successful! You can close this window.",
                    Err(_) => "Authorization failed. You can close this window.",
                };
                if let Some(sender) = code_tx.lock().take() {
                    let _ = sender.send(outcome);
                }
                warp::reply::html(page)
            });

        let (addr, server) = warp::serve(routes)
            .try_bind_with_graceful_shutdown(([127, 0, 0, 1], 0), async {
                let _ = shutdown_rx.await;
            })
            .map_err(|err| AuthError::Redirect(err.to_string()))?;
        tokio::spawn(server);

        Ok(Self {
            addr,
            code_rx,
            shutdown_tx,
        })
    }

    fn redirect_uri(&self) -> String {
        format!("http://{}", self.addr)
    }

    async fn wait_for_code(self) -> Result<String, AuthError> {
        let outcome = self
            .code_rx
            .await
            .map_err(|_| AuthError::Redirect("redirect listener stopped".into()))?;
        let _ = self.shutdown_tx.send(());
        outcome.map_err(AuthError::Redirect)
    }
}

fn authorization_code_from_query(
    query: &HashMap<String, String>,
    expected_state: &str,
) -> Result<String, String> {
    if let Some(error) = query.get("error") {
        return Err(format!("authorization denied: {error}"));
    }
    match query.get("state") {
        Some(state) if state == expected_state => {}
        _ => return Err("state parameter mismatch".into()),
    }
    query
        .get("code")
        .filter(|code| !code.is_empty())
        .cloned()
        .ok_or_else(|| "no authorization code in redirect".into())
}

/// The URL reaches the handler as a single argument; `cmd /C start` would
/// split it at every `&`.
fn browser_command(url: &str) -> Command {
    #[cfg(target_os = "macos")]
    let command = {
        let mut command = Command::new("open");
        command.arg(url);
        command
    };
    #[cfg(target_os = "windows")]
    let command = {
        let mut command = Command::new("rundll32");
        command.args(["url.dll,FileProtocolHandler", url]);
        command
    };
    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    let command = {
        let mut command = Command::new("xdg-open");
        command.arg(url);
        command
    };
    command
}

fn open_browser(url: &str) -> Result<(), AuthError> {
    browser_command(url)
        .spawn()
        .map(|_| ())
        .map_err(|err| AuthError::Browser(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings_in(dir: &Path) -> Settings {
        Settings {
            credentials_path: dir.join("credentials.json"),
            token_path: dir.join("token.json"),
            key_path: dir.join("token.key"),
        }
    }

    fn cached_token(expires_at: DateTime<Utc>, refresh_token: Option<&str>) -> StoredToken {
        StoredToken {
            client_id: "1234.apps.googleusercontent.com".into(),
            client_secret: Some("GOCSPX-secret".into()),
            token_uri: GOOGLE_TOKEN_URI.into(),
            access_token: "ya29.cached".into(),
            refresh_token: refresh_token.map(str::to_string),
            expires_at,
            scopes: vec![GMAIL_SCOPE.into()],
        }
    }

    #[tokio::test]
    async fn missing_client_secret_without_cache_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let authenticator = SessionAuthenticator::new(settings_in(dir.path()));

        let result = authenticator.authenticate().await;

        assert!(matches!(result, Err(AuthError::MissingClientSecret(_))));
        assert!(!dir.path().join("token.json").exists());
    }

    #[tokio::test]
    async fn valid_cache_is_used_without_client_secret() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = settings_in(dir.path());
        TokenStore::new(settings.token_path.clone(), settings.key_path.clone())
            .save(&cached_token(Utc::now() + Duration::hours(1), None))
            .expect("save");

        let session = SessionAuthenticator::new(settings)
            .authenticate()
            .await
            .expect("cached session");

        assert_eq!(session.bearer(), "ya29.cached");
    }

    #[tokio::test]
    async fn expired_cache_without_refresh_token_needs_client_secret() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = settings_in(dir.path());
        TokenStore::new(settings.token_path.clone(), settings.key_path.clone())
            .save(&cached_token(Utc::now() - Duration::hours(1), None))
            .expect("save");

        let result = SessionAuthenticator::new(settings).authenticate().await;

        assert!(matches!(result, Err(AuthError::MissingClientSecret(_))));
    }

    #[test]
    fn parses_installed_client_secret() {
        let raw = r#"{"installed": {"client_id": "abc.apps.googleusercontent.com",
            "project_id": "cleanup", "client_secret": "GOCSPX-xyz",
            "auth_uri": "https://accounts.google.com/o/oauth2/auth",
            "token_uri": "https://oauth2.googleapis.com/token",
            "redirect_uris": ["http://localhost"]}}"#;
        let app = OAuthApp::parse(raw).expect("parses");
        assert_eq!(app.client_id, "abc.apps.googleusercontent.com");
        assert_eq!(app.client_secret.as_deref(), Some("GOCSPX-xyz"));
        assert_eq!(app.token_uri, GOOGLE_TOKEN_URI);
    }

    #[test]
    fn rejects_client_secret_without_known_section() {
        let result = OAuthApp::parse(r#"{"other": {}}"#);
        assert!(matches!(result, Err(AuthError::InvalidClientSecret(_))));
    }

    #[test]
    fn browser_receives_consent_url_as_one_argument() {
        let url = "https://accounts.google.com/o/oauth2/auth?response_type=code&client_id=abc&state=xyz";
        let command = browser_command(url);
        let args: Vec<_> = command.get_args().collect();

        assert_eq!(args.last().copied(), Some(std::ffi::OsStr::new(url)));
        #[cfg(target_os = "windows")]
        assert_eq!(command.get_program(), "rundll32");
        #[cfg(not(any(target_os = "macos", target_os = "windows")))]
        assert_eq!(command.get_program(), "xdg-open");
    }

    #[test]
    fn redirect_query_requires_matching_state() {
        let mut query = HashMap::new();
        query.insert("code".to_string(), "4/0Aabc".to_string());
        query.insert("state".to_string(), "expected".to_string());
        assert_eq!(
            authorization_code_from_query(&query, "expected"),
            Ok("4/0Aabc".to_string())
        );
        assert!(authorization_code_from_query(&query, "other").is_err());

        let mut denied = HashMap::new();
        denied.insert("error".to_string(), "access_denied".to_string());
        assert_eq!(
            authorization_code_from_query(&denied, "expected"),
            Err("authorization denied: access_denied".to_string())
        );
    }
}
