//! HTTP client with connection pooling and retry logic

use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Response, StatusCode};
use std::time::Duration;
use vessel_errors::{Error, NetworkError};
use vessel_events::{AppEvent, DownloadEvent, EventEmitter, EventSender};

/// Network client configuration
#[derive(Debug, Clone)]
pub struct NetConfig {
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub pool_idle_timeout: Duration,
    pub pool_max_idle_per_host: usize,
    pub retry_count: u32,
    /// Base delay; doubled after every failed attempt
    pub retry_delay: Duration,
    pub user_agent: String,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(30),
            pool_idle_timeout: Duration::from_secs(90),
            pool_max_idle_per_host: 10,
            retry_count: 3,
            retry_delay: Duration::from_millis(500),
            user_agent: format!("vessel/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl From<&vessel_config::NetworkConfig> for NetConfig {
    fn from(config: &vessel_config::NetworkConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.timeout),
            connect_timeout: Duration::from_secs(config.connect_timeout),
            retry_count: config.retries,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            user_agent: config.user_agent.clone(),
            ..Self::default()
        }
    }
}

/// HTTP client wrapper with retry logic
#[derive(Clone)]
pub struct NetClient {
    client: Client,
    config: NetConfig,
    events: Option<EventSender>,
}

impl std::fmt::Debug for NetClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl NetClient {
    /// Create a new network client
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying reqwest client fails to initialize.
    pub fn new(config: NetConfig) -> Result<Self, Error> {
        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(config.pool_idle_timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| NetworkError::ConnectionRefused(e.to_string()))?;

        Ok(Self {
            client,
            config,
            events: None,
        })
    }

    /// Report retries on `tx`
    #[must_use]
    pub fn with_events(mut self, tx: EventSender) -> Self {
        self.events = Some(tx);
        self
    }

    /// Create with default configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created with default settings.
    pub fn with_defaults() -> Result<Self, Error> {
        Self::new(NetConfig::default())
    }

    /// Execute a GET request with retries
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails after all retry attempts.
    pub async fn get(&self, url: &str) -> Result<Response, Error> {
        self.retry_request(url, || self.client.get(url).send())
            .await
    }

    /// Execute a HEAD request with retries
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails after all retry attempts.
    pub async fn head(&self, url: &str) -> Result<Response, Error> {
        self.retry_request(url, || self.client.head(url).send())
            .await
    }

    /// Execute a PUT of `body` with retries, attaching a bearer token when given
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails after all retry attempts.
    pub async fn put(
        &self,
        url: &str,
        body: Bytes,
        content_type: &str,
        token: Option<&str>,
    ) -> Result<Response, Error> {
        self.retry_request(url, || {
            let mut request = self
                .client
                .put(url)
                .header(CONTENT_TYPE, content_type)
                .body(body.clone());
            if let Some(token) = token {
                request = request.bearer_auth(token);
            }
            request.send()
        })
        .await
    }

    /// Delay before retry `attempt` (1-based): base, 2×base, 4×base, …
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.config.retry_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }

    /// Execute a request with retries and exponential backoff
    async fn retry_request<F, Fut>(&self, url: &str, mut f: F) -> Result<Response, Error>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<Response, reqwest::Error>>,
    {
        let mut last_error: Option<NetworkError> = None;

        for attempt in 0..=self.config.retry_count {
            if attempt > 0 {
                let delay = self.backoff(attempt);
                let error = last_error
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_default();
                self.events.emit(AppEvent::Download(DownloadEvent::Retrying {
                    url: url.to_string(),
                    attempt,
                    delay_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error,
                }));
                tokio::time::sleep(delay).await;
            }

            match f().await {
                Ok(response) if response.status() == StatusCode::TOO_MANY_REQUESTS => {
                    let seconds = response
                        .headers()
                        .get("retry-after")
                        .and_then(|v| v.to_str().ok())
                        .and_then(|s| s.parse::<u64>().ok())
                        .unwrap_or(1);
                    last_error = Some(NetworkError::RateLimited { seconds });
                }
                Ok(response) if response.status().is_server_error() => {
                    last_error = Some(NetworkError::HttpError {
                        status: response.status().as_u16(),
                        message: response.status().to_string(),
                    });
                }
                Ok(response) => return Ok(response),
                Err(e) => {
                    let retry = Self::should_retry(&e);
                    last_error = Some(Self::classify(url, &e));
                    if !retry {
                        break;
                    }
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| NetworkError::DownloadFailed("Unknown error".to_string()))
            .into())
    }

    fn classify(url: &str, e: &reqwest::Error) -> NetworkError {
        if e.is_timeout() {
            NetworkError::Timeout {
                url: url.to_string(),
            }
        } else if e.is_connect() {
            NetworkError::ConnectionRefused(e.to_string())
        } else {
            NetworkError::DownloadFailed(e.to_string())
        }
    }

    /// Determine if an error should be retried
    fn should_retry(error: &reqwest::Error) -> bool {
        error.is_timeout()
            || error.is_connect()
            || error.status().is_none_or(|s| s.is_server_error())
    }

    /// Get the underlying reqwest client for advanced usage
    #[must_use]
    pub fn inner(&self) -> &Client {
        &self.client
    }
}

/// Map a non-success status to `NetworkError::HttpError`
///
/// # Errors
///
/// Returns an error if the response status is not 2xx.
pub fn ensure_success(response: &Response) -> Result<(), Error> {
    if response.status().is_success() {
        Ok(())
    } else {
        Err(NetworkError::HttpError {
            status: response.status().as_u16(),
            message: response.status().to_string(),
        }
        .into())
    }
}
