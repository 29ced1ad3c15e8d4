//! HTTP endpoint prober.
//!
//! `connect` measures TCP connection establishment to the URL's origin and
//! builds a fresh client (own cookie jar, own redirect policy). `run_once`
//! issues the request and reports response time, status and, over TLS, the
//! days left on the peer's leaf certificate.

use async_trait::async_trait;
use chrono::Utc;
use log::{debug, warn};
use reqwest::cookie::Jar;
use reqwest::redirect::Policy;
use reqwest::tls::TlsInfo;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::time::timeout;

use super::certificate::days_remaining;
use super::{Prober, ProberError, ProberIdentity, millis};
use crate::metrics::MetricsEmitter;
use crate::metrics::record::{CERTIFICATE_EXPIRATION, CONNECT_TIME, RESPONSE_TIME, STATUS};
use crate::target::ProberDescriptor;

/// Kind tag of the HTTP prober
pub const HTTP_PROBER_KIND: &str = "basic_http_prober";
/// Short alias accepted for the HTTP prober
pub const HTTP_PROBER_ALIAS: &str = "http";

/// Default request timeout in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Redirect hops followed when redirects are allowed
const MAX_REDIRECTS: usize = 10;

fn default_method() -> String {
    "GET".to_string()
}

fn default_allow_redirects() -> bool {
    true
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

/// HTTP methods the prober can issue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Head,
}

impl std::str::FromStr for HttpMethod {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "HEAD" => Ok(Self::Head),
            _ => Err(()),
        }
    }
}

impl From<HttpMethod> for reqwest::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Head => reqwest::Method::HEAD,
        }
    }
}

/// Settings of one HTTP probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpProbeContext {
    /// Target URL (HTTP or HTTPS)
    pub url: String,
    /// Request method (default: GET)
    #[serde(default = "default_method")]
    pub method: String,
    /// Query parameters appended to the URL
    #[serde(default, alias = "request_parameters")]
    pub parameters: BTreeMap<String, String>,
    /// Cookies sent with the first request
    #[serde(default)]
    pub cookies: BTreeMap<String, String>,
    /// Follow redirects (default: true, up to 10 hops)
    #[serde(default = "default_allow_redirects")]
    pub allow_redirects: bool,
    /// Timeout in seconds for connecting and for the request (default: 10)
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl HttpProbeContext {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: default_method(),
            parameters: BTreeMap::new(),
            cookies: BTreeMap::new(),
            allow_redirects: default_allow_redirects(),
            timeout: DEFAULT_TIMEOUT_SECS,
        }
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    pub fn with_cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.insert(name.into(), value.into());
        self
    }

    pub fn with_allow_redirects(mut self, allow: bool) -> Self {
        self.allow_redirects = allow;
        self
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout = seconds;
        self
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout.max(1))
    }
}

/// Single-use HTTP prober
pub struct HttpProber {
    context: HttpProbeContext,
    url: Url,
    identity: Option<ProberIdentity>,
    client: Option<Client>,
}

impl HttpProber {
    /// Validate the context; performs no I/O
    pub fn new(context: HttpProbeContext) -> Result<Self, ProberError> {
        let url = Url::parse(&context.url).map_err(|e| ProberError::InvalidDescriptor {
            prober: context.url.clone(),
            reason: format!("invalid url: {}", e),
        })?;

        if !matches!(url.scheme(), "http" | "https") || url.host().is_none() {
            return Err(ProberError::InvalidDescriptor {
                prober: context.url.clone(),
                reason: "url must be http(s) with a host".to_string(),
            });
        }

        Ok(Self {
            context,
            url,
            identity: None,
            client: None,
        })
    }

    /// Decode the descriptor's context and build the prober
    pub fn from_descriptor(descriptor: &ProberDescriptor) -> Result<Self, ProberError> {
        let context: HttpProbeContext = serde_json::from_value(descriptor.context.clone())
            .map_err(|e| ProberError::InvalidDescriptor {
                prober: descriptor.id.clone(),
                reason: e.to_string(),
            })?;

        Self::new(context).map_err(|e| match e {
            ProberError::InvalidDescriptor { reason, .. } => ProberError::InvalidDescriptor {
                prober: descriptor.id.clone(),
                reason,
            },
            other => other,
        })
    }

    pub fn context(&self) -> &HttpProbeContext {
        &self.context
    }

    fn identity_for(&self, stage: &'static str) -> Result<&ProberIdentity, ProberError> {
        self.identity.as_ref().ok_or(ProberError::InvalidState {
            stage,
            state: super::ProberState::Created,
        })
    }

    /// `host:port` of the URL's origin
    fn endpoint(&self) -> (String, u16) {
        // IPv6 literals come bracketed in the URL
        let host = self
            .url
            .host_str()
            .unwrap_or_default()
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        let port = self.url.port_or_known_default().unwrap_or(80);
        (host, port)
    }

    /// A fresh client whose cookie jar is seeded for the probed origin
    fn build_client(&self) -> Result<Client, reqwest::Error> {
        let jar = Arc::new(Jar::default());
        for (name, value) in &self.context.cookies {
            // Without an explicit path the cookie would be scoped to the URL's directory
            jar.add_cookie_str(&format!("{}={}; Path=/", name, value), &self.url);
        }

        let redirect = if self.context.allow_redirects {
            Policy::limited(MAX_REDIRECTS)
        } else {
            Policy::none()
        };

        Client::builder()
            .cookie_provider(jar)
            .redirect(redirect)
            .timeout(self.context.timeout())
            .connect_timeout(self.context.timeout())
            .danger_accept_invalid_certs(true)
            .tls_info(true)
            .build()
    }
}

#[async_trait]
impl Prober for HttpProber {
    fn kind(&self) -> &str {
        HTTP_PROBER_KIND
    }

    async fn initialize(&mut self, target_id: &str, prober_id: &str) -> Result<(), ProberError> {
        self.identity = Some(ProberIdentity::new(target_id, prober_id)?);
        Ok(())
    }

    async fn connect(&mut self, emitter: &MetricsEmitter) -> Result<(), ProberError> {
        let identity = self.identity_for("connect")?.clone();
        let (host, port) = self.endpoint();
        let endpoint = format!("{}:{}", host, port);
        let limit = self.context.timeout();

        let start = Instant::now();
        let stream = match timeout(limit, TcpStream::connect((host.as_str(), port))).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                warn!("[{}] connection to {} failed: {}", identity, endpoint, e);
                return Err(ProberError::ConnectionFailed {
                    endpoint,
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                warn!("[{}] connection to {} timed out after {:?}", identity, endpoint, limit);
                return Err(ProberError::ConnectionFailed {
                    endpoint,
                    reason: format!("timed out after {:?}", limit),
                });
            }
        };
        let elapsed = start.elapsed();
        drop(stream);

        let client = self.build_client().map_err(|e| ProberError::ConnectionFailed {
            endpoint: endpoint.clone(),
            reason: format!("failed to build HTTP client: {}", e),
        })?;
        self.client = Some(client);

        debug!("[{}] connected to {} in {:?}", identity, endpoint, elapsed);
        emitter.emit(identity.record(CONNECT_TIME, millis(elapsed))).await;
        Ok(())
    }

    async fn run_once(&mut self, emitter: &MetricsEmitter) -> Result<(), ProberError> {
        let identity = self.identity_for("run")?.clone();
        let method: HttpMethod = self
            .context
            .method
            .parse()
            .map_err(|_| ProberError::UnsupportedMethod(self.context.method.clone()))?;
        let client = self.client.as_ref().ok_or(ProberError::InvalidState {
            stage: "run",
            state: super::ProberState::Initialized,
        })?;

        let request = client
            .request(method.into(), self.url.clone())
            .query(&self.context.parameters);

        let start = Instant::now();
        let response = request.send().await.map_err(|e| {
            let reason = if e.is_timeout() {
                format!("request to {} timed out", self.url)
            } else {
                format!("request to {} failed: {}", self.url, e)
            };
            warn!("[{}] {}", identity, reason);
            ProberError::ProbeExecutionFailed(reason)
        })?;
        let elapsed = start.elapsed();
        let status = response.status().as_u16();

        let certificate_days = response
            .extensions()
            .get::<TlsInfo>()
            .and_then(TlsInfo::peer_certificate)
            .and_then(|der| match days_remaining(der, Utc::now()) {
                Ok(days) => Some(days),
                Err(e) => {
                    warn!("[{}] {}", identity, e);
                    None
                }
            });
        drop(response);

        debug!(
            "[{}] {} {} -> {} in {:?}",
            identity,
            self.context.method,
            self.url,
            status,
            elapsed
        );

        emitter.emit(identity.record(RESPONSE_TIME, millis(elapsed))).await;
        emitter.emit(identity.record(STATUS, i64::from(status))).await;
        if let Some(days) = certificate_days {
            emitter.emit(identity.record(CERTIFICATE_EXPIRATION, days)).await;
        }
        Ok(())
    }

    async fn tear_down(&mut self) -> Result<(), ProberError> {
        // Dropping the client closes its pooled connections and the cookie jar.
        self.client = None;
        Ok(())
    }

    fn identity(&self) -> Option<&ProberIdentity> {
        self.identity.as_ref()
    }
}
