//! # Earthdata Authentication
//!
//! Credential discovery and the session object handed to the catalog client
//! and the downloader. A session is created once per run; there is no ambient
//! login state.
//!
//! Credentials are looked up in this order:
//! 1. `EARTHDATA_TOKEN` (bearer token used as-is)
//! 2. `EARTHDATA_USERNAME` + `EARTHDATA_PASSWORD`
//! 3. the `urs.earthdata.nasa.gov` entry of `~/.netrc` (or `$NETRC`)

use crate::error::{PipelineError, PipelineResult};
use log::{debug, info};
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

pub const URS_HOST: &str = "urs.earthdata.nasa.gov";

const USER_AGENT: &str = concat!("nldas2parquet/", env!("CARGO_PKG_VERSION"));

/// Earthdata Login credentials.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// Pre-issued bearer token
    Token(String),
    /// Username and password, exchanged for a token at login
    Login { username: String, password: String },
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Token(_) => write!(f, "Credentials::Token(***)"),
            Credentials::Login { username, .. } => {
                write!(f, "Credentials::Login {{ username: {:?}, password: *** }}", username)
            }
        }
    }
}

impl Credentials {
    /// Reads credentials from the environment, then from the netrc file.
    pub fn discover() -> PipelineResult<Self> {
        if let Some(credentials) = Self::from_env() {
            debug!("Using Earthdata credentials from environment");
            return Ok(credentials);
        }

        if let Some(path) = netrc_path() {
            if let Ok(content) = fs::read_to_string(&path) {
                if let Some((username, password)) = parse_netrc(&content, URS_HOST) {
                    debug!("Using Earthdata credentials from {}", path.display());
                    return Ok(Credentials::Login { username, password });
                }
            }
        }

        Err(PipelineError::Auth(format!(
            "No credentials found: set EARTHDATA_TOKEN, EARTHDATA_USERNAME/EARTHDATA_PASSWORD, \
             or add a '{}' entry to ~/.netrc",
            URS_HOST
        )))
    }

    pub fn from_env() -> Option<Self> {
        if let Ok(token) = env::var("EARTHDATA_TOKEN") {
            if !token.trim().is_empty() {
                return Some(Credentials::Token(token.trim().to_string()));
            }
        }
        match (env::var("EARTHDATA_USERNAME"), env::var("EARTHDATA_PASSWORD")) {
            (Ok(username), Ok(password)) if !username.is_empty() && !password.is_empty() => {
                Some(Credentials::Login { username, password })
            }
            _ => None,
        }
    }

    pub fn from_netrc_file(path: &Path) -> PipelineResult<Self> {
        let content = fs::read_to_string(path)?;
        parse_netrc(&content, URS_HOST)
            .map(|(username, password)| Credentials::Login { username, password })
            .ok_or_else(|| {
                PipelineError::Auth(format!("No '{}' entry in {}", URS_HOST, path.display()))
            })
    }
}

fn netrc_path() -> Option<PathBuf> {
    if let Ok(path) = env::var("NETRC") {
        return Some(PathBuf::from(path));
    }
    dirs::home_dir().map(|home| home.join(".netrc"))
}

/// Extracts `(login, password)` for `host` from netrc content.
///
/// Falls back to a `default` entry when the host has none.
pub fn parse_netrc(content: &str, host: &str) -> Option<(String, String)> {
    let tokens: Vec<&str> = content.split_whitespace().collect();
    let mut matched: Option<(String, String)> = None;
    let mut default: Option<(String, String)> = None;

    let mut i = 0;
    while i < tokens.len() {
        let is_default = tokens[i] == "default";
        let is_machine = tokens[i] == "machine" && i + 1 < tokens.len();
        if !is_default && !is_machine {
            i += 1;
            continue;
        }

        let machine = if is_machine { Some(tokens[i + 1]) } else { None };
        i += if is_machine { 2 } else { 1 };

        let mut login = None;
        let mut password = None;
        while i < tokens.len() && tokens[i] != "machine" && tokens[i] != "default" {
            match tokens[i] {
                "login" if i + 1 < tokens.len() => {
                    login = Some(tokens[i + 1].to_string());
                    i += 2;
                }
                "password" if i + 1 < tokens.len() => {
                    password = Some(tokens[i + 1].to_string());
                    i += 2;
                }
                _ => i += 1,
            }
        }

        if let (Some(login), Some(password)) = (login, password) {
            match machine {
                Some(name) if name == host && matched.is_none() => {
                    matched = Some((login, password))
                }
                None if default.is_none() => default = Some((login, password)),
                _ => {}
            }
        }
    }

    matched.or(default)
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Short-lived S3 credentials issued by the archive for direct access.
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemporaryS3Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    #[serde(default)]
    pub expiration: Option<String>,
}

impl fmt::Debug for TemporaryS3Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemporaryS3Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("expiration", &self.expiration)
            .finish_non_exhaustive()
    }
}

/// An authenticated Earthdata session.
#[derive(Debug, Clone)]
pub struct EarthdataSession {
    client: Client,
    token: String,
}

impl EarthdataSession {
    /// Authenticates once; failure here is fatal to the run.
    pub async fn login(credentials: &Credentials, urs_url: &str) -> PipelineResult<Self> {
        let client = build_client()?;
        let token = match credentials {
            Credentials::Token(token) => token.clone(),
            Credentials::Login { username, password } => {
                let url = format!(
                    "{}/api/users/find_or_create_token",
                    urs_url.trim_end_matches('/')
                );
                info!("Requesting Earthdata token for user {}", username);
                let response = client
                    .post(&url)
                    .basic_auth(username, Some(password))
                    .send()
                    .await
                    .map_err(|e| PipelineError::Auth(format!("{}: {}", url, e)))?;
                if !response.status().is_success() {
                    return Err(PipelineError::Auth(format!(
                        "{} returned status {}",
                        url,
                        response.status()
                    )));
                }
                let body: TokenResponse = response
                    .json()
                    .await
                    .map_err(|e| PipelineError::Auth(format!("Malformed token response: {}", e)))?;
                body.access_token
            }
        };

        Ok(EarthdataSession { client, token })
    }

    /// Session from an existing bearer token, without contacting the server.
    pub fn with_token(token: impl Into<String>) -> PipelineResult<Self> {
        Ok(EarthdataSession {
            client: build_client()?,
            token: token.into(),
        })
    }

    /// GET request carrying the session's bearer token.
    pub fn authorized_get(&self, url: &str) -> RequestBuilder {
        self.client.get(url).bearer_auth(&self.token)
    }

    /// Fetches temporary credentials for the archive's direct-access bucket.
    pub async fn s3_credentials(&self, url: &str) -> PipelineResult<TemporaryS3Credentials> {
        debug!("Fetching temporary S3 credentials from {}", url);
        let response = self
            .authorized_get(url)
            .send()
            .await
            .map_err(|e| PipelineError::Auth(format!("{}: {}", url, e)))?;
        if !response.status().is_success() {
            return Err(PipelineError::Auth(format!(
                "{} returned status {}",
                url,
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| PipelineError::Auth(format!("Malformed S3 credentials response: {}", e)))
    }
}

fn build_client() -> PipelineResult<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| PipelineError::Auth(format!("Failed to create HTTP client: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_netrc_single_line() {
        let content = "machine urs.earthdata.nasa.gov login alice password s3cret\n";
        assert_eq!(
            parse_netrc(content, URS_HOST),
            Some(("alice".to_string(), "s3cret".to_string()))
        );
    }

    #[test]
    fn test_parse_netrc_multiple_machines() {
        let content = "\
machine example.com
    login bob
    password hunter2

machine urs.earthdata.nasa.gov
    login alice
    password s3cret
";
        assert_eq!(
            parse_netrc(content, URS_HOST),
            Some(("alice".to_string(), "s3cret".to_string()))
        );
        assert_eq!(
            parse_netrc(content, "example.com"),
            Some(("bob".to_string(), "hunter2".to_string()))
        );
    }

    #[test]
    fn test_parse_netrc_default_fallback() {
        let content = "machine example.com login bob password x\ndefault login anon password guest";
        assert_eq!(
            parse_netrc(content, URS_HOST),
            Some(("anon".to_string(), "guest".to_string()))
        );
    }

    #[test]
    fn test_parse_netrc_missing_host() {
        let content = "machine example.com login bob password x";
        assert_eq!(parse_netrc(content, URS_HOST), None);
        assert_eq!(parse_netrc("", URS_HOST), None);
    }

    #[test]
    fn test_credentials_debug_hides_secrets() {
        let creds = Credentials::Login {
            username: "alice".to_string(),
            password: "s3cret".to_string(),
        };
        let shown = format!("{:?}", creds);
        assert!(shown.contains("alice"));
        assert!(!shown.contains("s3cret"));

        let token = Credentials::Token("abc.def".to_string());
        assert!(!format!("{:?}", token).contains("abc.def"));
    }

    #[test]
    fn test_credentials_from_netrc_file() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("netrc");
        fs::write(&path, "machine urs.earthdata.nasa.gov login alice password s3cret")?;

        let creds = Credentials::from_netrc_file(&path)?;
        assert_eq!(
            creds,
            Credentials::Login {
                username: "alice".to_string(),
                password: "s3cret".to_string()
            }
        );

        fs::write(&path, "machine example.com login bob password x")?;
        assert!(matches!(
            Credentials::from_netrc_file(&path),
            Err(PipelineError::Auth(_))
        ));
        Ok(())
    }

    #[test]
    fn test_temporary_credentials_deserialize() {
        let json = r#"{
            "accessKeyId": "ASIA123",
            "secretAccessKey": "secret",
            "sessionToken": "session",
            "expiration": "2024-01-01 01:00:00+00:00"
        }"#;
        let creds: TemporaryS3Credentials = serde_json::from_str(json).unwrap();
        assert_eq!(creds.access_key_id, "ASIA123");
        assert_eq!(creds.session_token, "session");
        assert!(!format!("{:?}", creds).contains("secret\""));
    }

    #[tokio::test]
    #[ignore] // Requires real Earthdata credentials and network access
    async fn test_login_real_urs() -> Result<(), Box<dyn std::error::Error>> {
        let credentials = Credentials::discover()?;
        let session = EarthdataSession::login(&credentials, crate::input::DEFAULT_URS_URL).await?;
        assert!(!session.token.is_empty());
        Ok(())
    }
}
