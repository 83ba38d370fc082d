//! Narrow HTTP transport used by the batch codec, the Partner Directory
//! engine and the tenant client. Everything above this layer talks in terms
//! of [`TenantTransport`] so tests can substitute a scripted fake.

use std::borrow::Cow;
use std::fmt;

use async_trait::async_trait;

use crate::error::{DeployerError, Result};

/// HTTP methods supported by tenant operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Patch,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Patch => "PATCH",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Credentials for the tenant API. `host` is mandatory; authentication is
/// either an OAuth bearer token or user/password Basic.
#[derive(Debug, Clone, Default)]
pub struct ServiceCredentials {
    pub host: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub token: Option<String>,
}

impl ServiceCredentials {
    /// Base URL with scheme, without a trailing slash.
    pub fn base_url(&self) -> String {
        let host = self.host.trim_end_matches('/');
        if host.starts_with("http://") || host.starts_with("https://") {
            host.to_string()
        } else {
            format!("https://{host}")
        }
    }
}

/// Raw response handed back by the transport.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn body_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

/// The one seam between this tool and the remote platform's HTTP stack.
#[async_trait]
pub trait TenantTransport: Send + Sync {
    /// Execute a single request against a tenant-relative path. Non-2xx
    /// responses are returned, not turned into errors; callers decide.
    async fn request(
        &self,
        method: Method,
        path: &str,
        headers: &[(String, String)],
        body: Option<Vec<u8>>,
    ) -> Result<HttpResponse>;
}

/// reqwest-backed transport talking to a real tenant.
pub struct HttpTenantClient {
    base: String,
    credentials: ServiceCredentials,
    client: reqwest::Client,
}

impl HttpTenantClient {
    pub fn new(credentials: ServiceCredentials) -> Result<Self> {
        if credentials.host.trim().is_empty() {
            return Err(DeployerError::Config(
                "tenant host is required (flag --host or IPAAS_HOST)".into(),
            ));
        }
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            base: credentials.base_url(),
            credentials,
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base, path.trim_start_matches('/'))
    }
}

#[async_trait]
impl TenantTransport for HttpTenantClient {
    async fn request(
        &self,
        method: Method,
        path: &str,
        headers: &[(String, String)],
        body: Option<Vec<u8>>,
    ) -> Result<HttpResponse> {
        let method = match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
            Method::Patch => reqwest::Method::PATCH,
        };
        let mut request = self.client.request(method, self.url(path));
        if let Some(token) = &self.credentials.token {
            request = request.bearer_auth(token);
        } else if let Some(user) = &self.credentials.user {
            request = request.basic_auth(user, self.credentials.password.as_deref());
        }
        for (name, value) in headers {
            request = request.header(name, value);
        }
        if let Some(body) = body {
            request = request.body(body);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(k, v)| {
                (
                    k.as_str().to_string(),
                    String::from_utf8_lossy(v.as_bytes()).to_string(),
                )
            })
            .collect();
        let body = response.bytes().await?.to_vec();
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_normalization() {
        let plain = ServiceCredentials {
            host: "tenant.example.com/".into(),
            ..Default::default()
        };
        assert_eq!(plain.base_url(), "https://tenant.example.com");

        let explicit = ServiceCredentials {
            host: "http://localhost:8080".into(),
            ..Default::default()
        };
        assert_eq!(explicit.base_url(), "http://localhost:8080");
    }

    #[test]
    fn response_header_lookup_is_case_insensitive() {
        let response = HttpResponse {
            status: 200,
            headers: vec![("Content-Type".into(), "application/json".into())],
            body: Vec::new(),
        };
        assert_eq!(response.header("content-type"), Some("application/json"));
        assert!(response.is_success());
    }
}
