/*
[INPUT]:  HTTP configuration (base URLs, timeouts, credentials)
[OUTPUT]: Configured reqwest client with signing, retry and rate limiting
[POS]:    HTTP layer - core client implementation
[UPDATE]: When adding connection options or changing retry/throttle behavior
*/

use std::time::Duration;

use reqwest::{Client, Method, Url};
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::http::error::{BinanceError, Result};
use crate::http::signature;

const PRODUCTION_BASE_URL: &str = "https://api.binance.com";
const TESTNET_BASE_URL: &str = "https://testnet.binance.vision";

const API_KEY_HEADER: &str = "X-MBX-APIKEY";

/// HTTP client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub timeout: Duration,
    pub connect_timeout: Duration,
    /// Transient failures are retried at most this many times.
    pub max_retries: u32,
    /// First backoff delay; doubles per attempt.
    pub retry_base_delay: Duration,
    /// Sustained signed-request rate for one credential.
    pub requests_per_second: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(5),
            max_retries: 3,
            retry_base_delay: Duration::from_millis(200),
            requests_per_second: 10,
        }
    }
}

/// Credentials for one exchange account.
///
/// The secret never appears in Debug output or logs.
#[derive(Clone)]
pub struct Credentials {
    pub api_key: String,
    pub api_secret: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"<redacted>")
            .field("api_secret", &"<redacted>")
            .finish()
    }
}

/// Simple token bucket funneling all REST calls for one credential.
#[derive(Debug)]
struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(requests_per_second: u32) -> Self {
        let capacity = requests_per_second.max(1) as f64;
        Self {
            capacity,
            tokens: capacity,
            refill_per_sec: capacity,
            last_refill: Instant::now(),
        }
    }

    /// Time to wait before one token is available; takes the token.
    fn reserve(&mut self, now: Instant) -> Duration {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Duration::ZERO
        } else {
            let deficit = 1.0 - self.tokens;
            self.tokens -= 1.0;
            Duration::from_secs_f64(deficit / self.refill_per_sec)
        }
    }
}

/// REST client for the Binance spot API.
///
/// One instance per credential; the embedded token bucket enforces the
/// per-key rate limit across every caller that shares the instance.
#[derive(Debug)]
pub struct BinanceClient {
    http_client: Client,
    base_url: Url,
    credentials: Credentials,
    config: ClientConfig,
    bucket: Mutex<TokenBucket>,
}

impl BinanceClient {
    /// Create a client against the production or testnet base URL.
    pub fn new(credentials: Credentials, testnet: bool) -> Result<Self> {
        let base = if testnet { TESTNET_BASE_URL } else { PRODUCTION_BASE_URL };
        Self::with_config_and_base_url(credentials, ClientConfig::default(), base)
    }

    /// Create a client with a custom configuration and base URL.
    ///
    /// Tests inject wiremock URLs through here.
    pub fn with_config_and_base_url(
        credentials: Credentials,
        config: ClientConfig,
        base_url: &str,
    ) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .build()?;

        Ok(Self {
            http_client,
            base_url: Url::parse(base_url)?,
            credentials,
            bucket: Mutex::new(TokenBucket::new(config.requests_per_second)),
            config,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Unauthenticated endpoint, typed response.
    pub(crate) async fn public_get<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &[(String, String)],
    ) -> Result<T> {
        let value = self
            .request_with_retry(Method::GET, endpoint, params.to_vec(), false, false)
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Signed endpoint returning both the typed response and the raw payload.
    pub(crate) async fn signed_request_raw(
        &self,
        method: Method,
        endpoint: &str,
        params: Vec<(String, String)>,
    ) -> Result<serde_json::Value> {
        self.request_with_retry(method, endpoint, params, true, true).await
    }

    /// Endpoint that only needs the API key header (listen-key management).
    pub(crate) async fn keyed_request(
        &self,
        method: Method,
        endpoint: &str,
        params: Vec<(String, String)>,
    ) -> Result<serde_json::Value> {
        self.request_with_retry(method, endpoint, params, true, false).await
    }

    async fn request_with_retry(
        &self,
        method: Method,
        endpoint: &str,
        params: Vec<(String, String)>,
        keyed: bool,
        signed: bool,
    ) -> Result<serde_json::Value> {
        let mut attempt: u32 = 0;

        loop {
            self.throttle().await;

            // Sign per attempt: the timestamp must be fresh.
            let mut attempt_params = params.clone();
            if signed {
                signature::sign_params(&self.credentials.api_secret, &mut attempt_params);
            }

            let result = self
                .execute(method.clone(), endpoint, &attempt_params, keyed)
                .await;

            match result {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.config.max_retries => {
                    let delay = self.config.retry_base_delay * 2u32.pow(attempt);
                    warn!(
                        endpoint,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient request failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn execute(
        &self,
        method: Method,
        endpoint: &str,
        params: &[(String, String)],
        keyed: bool,
    ) -> Result<serde_json::Value> {
        let mut url = self.base_url.join(endpoint)?;
        if !params.is_empty() {
            let query = signature::to_query_string(params);
            url.set_query(Some(&query));
        }

        let mut request = self.http_client.request(method, url);
        if keyed {
            request = request.header(API_KEY_HEADER, &self.credentials.api_key);
        }

        let response = request.send().await.map_err(|err| {
            if err.is_timeout() {
                BinanceError::Timeout {
                    millis: self.config.timeout.as_millis() as u64,
                }
            } else {
                BinanceError::Http(err)
            }
        })?;

        let status = response.status();
        let body = response.text().await?;

        if status.is_success() {
            debug!(endpoint, status = status.as_u16(), "request ok");
            return Ok(serde_json::from_str(&body)?);
        }

        if status.as_u16() == 429 || status.as_u16() == 418 {
            return Err(BinanceError::RateLimit { status });
        }

        // Venue errors carry {"code": <i64>, "msg": <string>}.
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(&body)
            && let (Some(code), Some(msg)) = (
                value.get("code").and_then(|c| c.as_i64()),
                value.get("msg").and_then(|m| m.as_str()),
            )
        {
            return Err(BinanceError::from_api_code(code, msg));
        }

        Err(BinanceError::Status { status, body })
    }

    async fn throttle(&self) {
        let wait = {
            let mut bucket = self.bucket.lock().await;
            bucket.reserve(Instant::now())
        };
        if !wait.is_zero() {
            debug!(wait_ms = wait.as_millis() as u64, "rate limit throttle");
            tokio::time::sleep(wait).await;
        }
    }
}
