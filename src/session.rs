//! Utility functions for creating authenticated http sessions and issuing requests through them
use crate::error::{HttpError, Result, SyncError};
use reqwest::header::{HeaderMap, LOCATION};
use reqwest::redirect::Policy;
use reqwest::{Client, RequestBuilder, Response};
use std::fmt;
use std::time::Duration;
use tracing::debug;
use url::Url;

pub const LOGIN_HOST: &str = "urs.earthdata.nasa.gov";
/// Host checked before any search to fail fast without a network connection
pub const ARCHIVE_HOST: &str = "https://lpdaac.usgs.gov";
pub const TIMEOUT: Duration = Duration::from_secs(20);
const MAX_REDIRECTS: usize = 10;

#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    Anonymous,
    Basic { username: String, password: String },
    Bearer(String),
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Anonymous => write!(f, "Anonymous"),
            Self::Basic { username, .. } => write!(f, "Basic({username}, ***)"),
            Self::Bearer(_) => write!(f, "Bearer(***)"),
        }
    }
}

/// Everything needed to open a session. Cheap to clone so that each parallel
/// worker can build its own `Session`.
#[derive(Clone, Debug)]
pub struct SessionBuilder {
    credentials: Credentials,
    login_host: String,
    timeout: Duration,
    authorization_header: bool,
}

impl SessionBuilder {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            login_host: LOGIN_HOST.to_string(),
            timeout: TIMEOUT,
            authorization_header: false,
        }
    }

    pub fn login_host(mut self, host: &str) -> Self {
        self.login_host = host.to_string();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Send credentials with every request instead of only to the login host
    /// and the host the request was addressed to.
    pub fn authorization_header(mut self, enabled: bool) -> Self {
        self.authorization_header = enabled;
        self
    }

    pub fn build(&self) -> Result<Session> {
        // Redirects are followed by hand so credentials only go to the login host
        let client = Client::builder()
            .cookie_store(true)
            .redirect(Policy::none())
            // Per connect and per read, so long transfers that keep streaming never expire
            .connect_timeout(self.timeout)
            .read_timeout(self.timeout)
            .build()
            .map_err(|e| SyncError::Configuration(format!("Unable to build http client: {e}")))?;

        Ok(Session {
            client,
            credentials: self.credentials.clone(),
            login_host: self.login_host.clone(),
            authorization_header: self.authorization_header,
        })
    }
}

/// A reusable http client bound to one set of credentials. Session cookies
/// persist for the lifetime of the value.
pub struct Session {
    client: Client,
    credentials: Credentials,
    login_host: String,
    authorization_header: bool,
}

impl Session {
    pub fn anonymous() -> Result<Self> {
        SessionBuilder::new(Credentials::Anonymous).build()
    }

    pub async fn get(self: &Self, url: &str) -> std::result::Result<Response, HttpError> {
        self.get_with_headers(url, HeaderMap::new()).await
    }

    pub async fn get_with_headers(
        self: &Self,
        url: &str,
        headers: HeaderMap,
    ) -> std::result::Result<Response, HttpError> {
        let origin = Url::parse(url).map_err(|_| HttpError::InvalidUrl(url.to_string()))?;
        let mut current = origin.clone();

        for _ in 0..=MAX_REDIRECTS {
            let request = self.client.get(current.clone()).headers(headers.clone());
            let response = self.authorize(request, &current, &origin).send().await?;

            if !response.status().is_redirection() {
                return Ok(response.error_for_status()?);
            }

            let next = response
                .headers()
                .get(LOCATION)
                .and_then(|location| location.to_str().ok())
                .and_then(|location| current.join(location).ok());

            match next {
                Some(next) => {
                    debug!(from = %current, to = %next, "Following redirect");
                    current = next;
                }
                None => return Err(HttpError::MissingLocation(current.to_string())),
            }
        }
        Err(HttpError::TooManyRedirects(url.to_string()))
    }

    pub async fn post_with_headers(
        self: &Self,
        url: &str,
        headers: HeaderMap,
        body: &serde_json::Value,
    ) -> std::result::Result<Response, HttpError> {
        let current = Url::parse(url).map_err(|_| HttpError::InvalidUrl(url.to_string()))?;
        let request = self.client.post(current.clone()).headers(headers).json(body);
        let response = self.authorize(request, &current, &current).send().await?;
        Ok(response.error_for_status()?)
    }

    /// Pre-flight reachability check against the archive host.
    pub async fn check_connection(self: &Self, host: &str) -> Result<()> {
        self.client
            .get(host)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| SyncError::Connectivity {
                host: host.to_string(),
                source: e.into(),
            })?;
        Ok(())
    }

    /// Bearer tokens go to the login host and the origin of the request, Basic
    /// credentials to the login host only. Third-party hosts reached through a
    /// redirect get neither unless `authorization_header` is set.
    fn authorize(self: &Self, request: RequestBuilder, url: &Url, origin: &Url) -> RequestBuilder {
        let trusted = self.authorization_header
            || url.host_str() == Some(self.login_host.as_str())
            || url.origin() == origin.origin();
        match &self.credentials {
            Credentials::Anonymous => request,
            Credentials::Bearer(token) if trusted => request.bearer_auth(token),
            Credentials::Basic { username, password }
                if self.authorization_header || url.host_str() == Some(self.login_host.as_str()) =>
            {
                request.basic_auth(username, Some(password))
            }
            _ => request,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{basic_auth, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn basic(username: &str, password: &str) -> Credentials {
        Credentials::Basic {
            username: username.to_string(),
            password: password.to_string(),
        }
    }

    #[tokio::test]
    async fn test_login_redirect_sets_cookie() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/data/granule.h5"))
            .and(header("cookie", "urs=ok"))
            .respond_with(ResponseTemplate::new(200).set_body_string("payload"))
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/data/granule.h5"))
            .respond_with(
                ResponseTemplate::new(302).insert_header("Location", "/oauth/authorize"),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/oauth/authorize"))
            .and(basic_auth("alice", "secret"))
            .respond_with(
                ResponseTemplate::new(302)
                    .insert_header("Location", "/data/granule.h5")
                    .insert_header("Set-Cookie", "urs=ok; Path=/"),
            )
            .mount(&server)
            .await;

        let session = SessionBuilder::new(basic("alice", "secret"))
            .login_host("127.0.0.1")
            .build()
            .unwrap();

        let url = format!("{}/data/granule.h5", server.uri());
        let body = session.get(&url).await.unwrap().text().await.unwrap();
        assert_eq!(body, "payload");
    }

    #[tokio::test]
    async fn test_credentials_withheld_from_other_hosts() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/file"))
            .and(basic_auth("alice", "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_string("leaked"))
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/file"))
            .respond_with(ResponseTemplate::new(200).set_body_string("clean"))
            .mount(&server)
            .await;

        let url = format!("{}/file", server.uri());

        let session = SessionBuilder::new(basic("alice", "secret")).build().unwrap();
        let body = session.get(&url).await.unwrap().text().await.unwrap();
        assert_eq!(body, "clean");

        let session = SessionBuilder::new(basic("alice", "secret"))
            .authorization_header(true)
            .build()
            .unwrap();
        let body = session.get(&url).await.unwrap().text().await.unwrap();
        assert_eq!(body, "leaked");
    }

    #[tokio::test]
    async fn test_bearer_token_stays_on_origin() {
        let origin = MockServer::start().await;
        let storage = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/f"))
            .and(header("authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(200).set_body_string("leaked"))
            .with_priority(1)
            .mount(&storage)
            .await;
        Mock::given(method("GET"))
            .and(path("/f"))
            .respond_with(ResponseTemplate::new(200).set_body_string("clean"))
            .mount(&storage)
            .await;
        Mock::given(method("GET"))
            .and(path("/granule.h5"))
            .and(header("authorization", "Bearer tok"))
            .respond_with(
                ResponseTemplate::new(302).insert_header("Location", format!("{}/f", storage.uri())),
            )
            .mount(&origin)
            .await;

        let url = format!("{}/granule.h5", origin.uri());

        let session = SessionBuilder::new(Credentials::Bearer("tok".to_string()))
            .build()
            .unwrap();
        let body = session.get(&url).await.unwrap().text().await.unwrap();
        assert_eq!(body, "clean");

        let session = SessionBuilder::new(Credentials::Bearer("tok".to_string()))
            .authorization_header(true)
            .build()
            .unwrap();
        let body = session.get(&url).await.unwrap().text().await.unwrap();
        assert_eq!(body, "leaked");
    }

    #[tokio::test]
    async fn test_redirect_without_location() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(302).set_body_string("<html>moved</html>"))
            .mount(&server)
            .await;

        let session = Session::anonymous().unwrap();
        let result = session.get(&format!("{}/moved", server.uri())).await;
        assert!(matches!(result, Err(HttpError::MissingLocation(_))));
    }

    #[tokio::test]
    async fn test_redirect_loop_is_bounded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/loop"))
            .respond_with(ResponseTemplate::new(302).insert_header("Location", "/loop"))
            .mount(&server)
            .await;

        let session = Session::anonymous().unwrap();
        let result = session.get(&format!("{}/loop", server.uri())).await;
        assert!(matches!(result, Err(HttpError::TooManyRedirects(_))));
    }

    #[tokio::test]
    async fn test_http_error_status_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let session = Session::anonymous().unwrap();
        let result = session.get(&format!("{}/missing", server.uri())).await;
        assert!(matches!(result, Err(HttpError::Request(_))));
    }

    #[tokio::test]
    async fn test_check_connection() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let session = Session::anonymous().unwrap();
        assert!(session.check_connection(&server.uri()).await.is_ok());

        let unreachable = session.check_connection("http://127.0.0.1:1").await;
        assert!(matches!(unreachable, Err(SyncError::Connectivity { .. })));
    }

    #[test]
    fn test_debug_hides_password() {
        let rendered = format!("{:?}", basic("alice", "secret"));
        assert_eq!(rendered.contains("secret"), false);
    }
}
