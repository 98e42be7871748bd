//! `reqwest` implementation of [`AlphaApi`] and session handling.

use reqwest::{Method, RequestBuilder, Response, StatusCode, header};
use url::Url;

use super::{AlphaApi, AlphaDetail, PollBody, PollHandle, PollStatus, SimulationRequest};
use crate::config::ApiConfig;
use crate::error::{ApiError, Error, Result};
use crate::types::JobSpec;

/// Longest slice of an error body kept in messages
const MAX_ERROR_BODY: usize = 200;

/// Credentials attached to every API request
///
/// Holds only what the API looks at: session cookies and an optional authorization
/// header. Produced by [`HttpAlphaApi::authenticate`] or by an external credential
/// loader.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct AuthContext {
    cookies: Vec<(String, String)>,
    authorization: Option<String>,
}

impl AuthContext {
    /// Context carrying a single session cookie
    pub fn from_cookie(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            cookies: vec![(name.into(), value.into())],
            authorization: None,
        }
    }

    /// Add or replace a cookie
    pub fn with_cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        self.cookies.retain(|(existing, _)| *existing != name);
        self.cookies.push((name, value.into()));
        self
    }

    /// Set the `Authorization` header value
    pub fn with_authorization(mut self, value: impl Into<String>) -> Self {
        self.authorization = Some(value.into());
        self
    }

    /// Whether the context carries no credentials at all
    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty() && self.authorization.is_none()
    }

    /// Value of the `Cookie` header, if any cookies are set
    pub fn cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        Some(
            self.cookies
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    fn apply(&self, mut request: RequestBuilder) -> RequestBuilder {
        if let Some(cookie) = self.cookie_header() {
            request = request.header(header::COOKIE, cookie);
        }
        if let Some(auth) = &self.authorization {
            request = request.header(header::AUTHORIZATION, auth);
        }
        request
    }

    /// Build a context from the `Set-Cookie` headers of a sign-in response
    fn from_set_cookie<'a>(values: impl Iterator<Item = &'a header::HeaderValue>) -> Self {
        let mut context = Self::default();
        for value in values {
            let Ok(raw) = value.to_str() else { continue };
            let pair = raw.split(';').next().unwrap_or_default();
            if let Some((name, value)) = pair.split_once('=') {
                context = context.with_cookie(name.trim(), value.trim());
            }
        }
        context
    }
}

impl std::fmt::Debug for AuthContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.cookies.iter().map(|(n, _)| n.as_str()).collect();
        f.debug_struct("AuthContext")
            .field("cookies", &names)
            .field("authorization", &self.authorization.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Production [`AlphaApi`] talking HTTP to the simulation service.
#[derive(Clone, Debug)]
pub struct HttpAlphaApi {
    client: reqwest::Client,
    base_url: Url,
    auth: AuthContext,
}

impl HttpAlphaApi {
    /// Create a client for `config.base_url` using the given session
    pub fn new(config: &ApiConfig, auth: AuthContext) -> Result<Self> {
        let base_url = parse_base_url(&config.base_url)?;
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            client,
            base_url,
            auth,
        })
    }

    /// Sign in with username and password and return the resulting session
    ///
    /// Only the session cookies are kept; nothing else of the sign-in response is
    /// carried into later requests.
    pub async fn authenticate(
        config: &ApiConfig,
        username: &str,
        password: &str,
    ) -> Result<AuthContext> {
        let base_url = parse_base_url(&config.base_url)?;
        let url = base_url
            .join("authentication")
            .map_err(|e| Error::config("api.base_url", e.to_string()))?;
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        let response = client
            .post(url)
            .basic_auth(username, Some(password))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Auth(format!(
                "sign-in returned {status}: {}",
                truncate(&body)
            )));
        }

        let auth = AuthContext::from_set_cookie(response.headers().get_all(header::SET_COOKIE).iter());
        if auth.is_empty() {
            return Err(Error::Auth("sign-in response carried no session cookie".to_string()));
        }
        tracing::info!(?auth, "Signed in to simulation API");
        Ok(auth)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.auth.apply(self.client.request(method, url))
    }

    fn endpoint(&self, path: &str) -> std::result::Result<Url, ApiError> {
        self.base_url
            .join(path)
            .map_err(|e| ApiError::MalformedResponse(format!("bad endpoint {path}: {e}")))
    }
}

#[async_trait::async_trait]
impl AlphaApi for HttpAlphaApi {
    async fn submit(&self, job: &JobSpec) -> std::result::Result<PollHandle, ApiError> {
        let url = self.endpoint("simulations")?;
        let response = self
            .request(Method::POST, url)
            .json(&SimulationRequest::from_job(job))
            .send()
            .await?;
        let response = check_status(response).await?;

        let location = response
            .headers()
            .get(header::LOCATION)
            .ok_or_else(|| ApiError::MalformedResponse("submit response has no Location".into()))?
            .to_str()
            .map_err(|e| ApiError::MalformedResponse(format!("unreadable Location: {e}")))?;

        // Location may be absolute or relative to the API root
        let handle = self
            .base_url
            .join(location)
            .map_err(|e| ApiError::MalformedResponse(format!("bad Location {location}: {e}")))?;
        tracing::debug!(correlation_id = %job.correlation_id, handle = %handle, "Simulation submitted");
        Ok(PollHandle(handle.to_string()))
    }

    async fn poll(&self, handle: &PollHandle) -> std::result::Result<PollStatus, ApiError> {
        let url = Url::parse(&handle.0)
            .map_err(|e| ApiError::MalformedResponse(format!("bad poll handle {handle}: {e}")))?;
        let response = self.request(Method::GET, url).send().await?;
        let response = check_status(response).await?;

        let body = response.text().await?;
        let parsed: PollBody = serde_json::from_str(&body)
            .map_err(|e| ApiError::MalformedResponse(format!("poll body: {e}")))?;
        parsed.into_status()
    }

    async fn fetch_alpha(&self, alpha_id: &str) -> std::result::Result<AlphaDetail, ApiError> {
        let url = self.endpoint(&format!("alphas/{alpha_id}"))?;
        let response = self.request(Method::GET, url).send().await?;
        let response = check_status(response).await?;

        let body = response.text().await?;
        serde_json::from_str(&body)
            .map_err(|e| ApiError::MalformedResponse(format!("alpha {alpha_id}: {e}")))
    }
}

/// Normalise the base URL so relative joins keep its path
fn parse_base_url(raw: &str) -> Result<Url> {
    let mut normalised = raw.to_string();
    if !normalised.ends_with('/') {
        normalised.push('/');
    }
    Url::parse(&normalised).map_err(|e| Error::config("api.base_url", format!("invalid URL: {e}")))
}

/// Map a non-success HTTP status to the matching [`ApiError`]
async fn check_status(response: Response) -> std::result::Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(classify_status(status, &body))
}

pub(crate) fn classify_status(status: StatusCode, body: &str) -> ApiError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => ApiError::RateLimited {
            status: status.as_u16(),
        },
        StatusCode::UNAUTHORIZED => ApiError::AuthExpired(format!(
            "HTTP {}: {}",
            status.as_u16(),
            truncate(body)
        )),
        s if s.is_server_error() || s == StatusCode::REQUEST_TIMEOUT => {
            ApiError::Transient(format!("HTTP {}: {}", s.as_u16(), truncate(body)))
        }
        s => ApiError::Rejected {
            status: s.as_u16(),
            message: truncate(body).to_string(),
        },
    }
}

fn truncate(body: &str) -> &str {
    match body.char_indices().nth(MAX_ERROR_BODY) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}
