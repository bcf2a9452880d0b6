//! Keystone v3 password authentication and service catalog lookup.

use cinderlite_shared::errors::{CinderliteError, CinderliteResult};
use serde::Deserialize;
use serde_json::{Value, json};

/// Catalog types accepted for block storage, in order of preference.
const BLOCK_STORAGE_TYPES: &[&str] = &["volumev3", "block-storage"];

const COMPUTE_TYPES: &[&str] = &["compute"];

const INTERFACE: &str = "public";

const TOKEN_HEADER: &str = "X-Subject-Token";

/// Credentials for Keystone v3 password authentication.
///
/// The project is scoped by ID when one is given, by name otherwise.
#[derive(Clone, Default)]
pub struct Credentials {
    pub auth_url: String,
    pub username: String,
    pub password: String,
    pub user_domain_name: String,
    pub project_id: Option<String>,
    pub project_name: Option<String>,
    pub project_domain_name: String,
    pub region: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("auth_url", &self.auth_url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("user_domain_name", &self.user_domain_name)
            .field("project_id", &self.project_id)
            .field("project_name", &self.project_name)
            .field("project_domain_name", &self.project_domain_name)
            .field("region", &self.region)
            .finish()
    }
}

impl Credentials {
    /// # Errors
    ///
    /// Returns error if a required field is empty.
    pub fn validate(&self) -> CinderliteResult<()> {
        let required = [
            ("auth URL (OS_AUTH_URL)", &self.auth_url),
            ("username (OS_USERNAME)", &self.username),
            ("password (OS_PASSWORD)", &self.password),
            ("region (OS_REGION_NAME)", &self.region),
        ];
        for (what, value) in required {
            if value.trim().is_empty() {
                return Err(CinderliteError::Config(format!("missing {}", what)));
            }
        }

        if self.project_id.is_none() && self.project_name.is_none() {
            return Err(CinderliteError::Config(
                "missing project (OS_PROJECT_ID or OS_PROJECT_NAME)".to_string(),
            ));
        }
        Ok(())
    }

    /// `{auth_url}/auth/tokens`, tolerating a trailing slash or a missing `/v3`.
    pub(crate) fn tokens_url(&self) -> String {
        let base = self.auth_url.trim_end_matches('/');
        if base.ends_with("/v3") {
            format!("{}/auth/tokens", base)
        } else {
            format!("{}/v3/auth/tokens", base)
        }
    }

    pub(crate) fn token_request(&self) -> Value {
        let project = match (&self.project_id, &self.project_name) {
            (Some(id), _) => json!({ "id": id }),
            (None, name) => json!({
                "name": name,
                "domain": { "name": self.project_domain_name },
            }),
        };

        json!({
            "auth": {
                "identity": {
                    "methods": ["password"],
                    "password": {
                        "user": {
                            "name": self.username,
                            "domain": { "name": self.user_domain_name },
                            "password": self.password,
                        }
                    }
                },
                "scope": { "project": project }
            }
        })
    }
}

/// A token with the endpoints it unlocks.
#[derive(Clone)]
pub struct Session {
    pub(crate) token: String,
    pub block_storage_url: String,
    pub compute_url: String,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("token", &"<redacted>")
            .field("block_storage_url", &self.block_storage_url)
            .field("compute_url", &self.compute_url)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: Token,
}

#[derive(Debug, Deserialize)]
struct Token {
    #[serde(default)]
    catalog: Vec<CatalogEntry>,
}

#[derive(Debug, Deserialize)]
struct CatalogEntry {
    #[serde(rename = "type")]
    service_type: String,
    #[serde(default)]
    endpoints: Vec<Endpoint>,
}

#[derive(Debug, Deserialize)]
struct Endpoint {
    interface: String,
    #[serde(default)]
    region: Option<String>,
    #[serde(default)]
    region_id: Option<String>,
    url: String,
}

/// Build a session from the token header and the token body.
pub(crate) fn session_from_response(
    token: String,
    body: &[u8],
    region: &str,
) -> CinderliteResult<Session> {
    let response: TokenResponse = serde_json::from_slice(body).map_err(|e| {
        CinderliteError::RemoteApi(format!("invalid token response: {}", e))
    })?;
    let catalog = &response.token.catalog;

    Ok(Session {
        token,
        block_storage_url: find_endpoint(catalog, BLOCK_STORAGE_TYPES, region)?,
        compute_url: find_endpoint(catalog, COMPUTE_TYPES, region)?,
    })
}

fn find_endpoint(
    catalog: &[CatalogEntry],
    types: &[&str],
    region: &str,
) -> CinderliteResult<String> {
    types
        .iter()
        .filter_map(|t| catalog.iter().find(|entry| entry.service_type == *t))
        .flat_map(|entry| entry.endpoints.iter())
        .find(|ep| {
            ep.interface == INTERFACE
                && (ep.region.as_deref() == Some(region) || ep.region_id.as_deref() == Some(region))
        })
        .map(|ep| ep.url.trim_end_matches('/').to_string())
        .ok_or_else(|| {
            CinderliteError::Config(format!(
                "no {} endpoint for {:?} in region {}",
                INTERFACE, types, region
            ))
        })
}

/// Authenticate and resolve the endpoints.
pub(crate) async fn authenticate(
    http: &reqwest::Client,
    credentials: &Credentials,
) -> CinderliteResult<Session> {
    let url = credentials.tokens_url();
    tracing::debug!(url = %url, user = %credentials.username, "Authenticating");

    let response = http
        .post(&url)
        .json(&credentials.token_request())
        .send()
        .await
        .map_err(|e| CinderliteError::RemoteApi(format!("POST {} failed: {}", url, e)))?;

    let status = response.status();
    let token = response
        .headers()
        .get(TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = response
        .bytes()
        .await
        .map_err(|e| CinderliteError::RemoteApi(format!("reading token response: {}", e)))?;

    if !status.is_success() {
        return Err(CinderliteError::RemoteApi(format!(
            "authentication failed with {}: {}",
            status,
            String::from_utf8_lossy(&body).trim()
        )));
    }

    let token = token.ok_or_else(|| {
        CinderliteError::RemoteApi(format!("token response has no {} header", TOKEN_HEADER))
    })?;

    let session = session_from_response(token, &body, &credentials.region)?;
    tracing::debug!(
        block_storage = %session.block_storage_url,
        compute = %session.compute_url,
        "Authenticated"
    );
    Ok(session)
}
