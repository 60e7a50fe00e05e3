//! Polite HTTP fetching: per-call identity rotation, timeouts and capped retries.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use rand::Rng;
use reqwest::header::USER_AGENT;
use reqwest::StatusCode;
use thiserror::Error;
use tracing::{debug, info_span, Instrument};

pub const DEFAULT_USER_AGENTS: [&str; 3] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:89.0) Gecko/20100101 Firefox/89.0",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

/// 5xx responses are retried. 429 is not: the site asked us to back off, so the
/// caller gets the status and decides to stop polling that source.
pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Round-robin pool of client identities; consecutive calls never share one
/// unless the pool has a single entry.
#[derive(Debug)]
pub struct UserAgentPool {
    agents: Vec<String>,
    cursor: AtomicUsize,
}

impl UserAgentPool {
    pub fn new(agents: impl IntoIterator<Item = String>) -> Self {
        let mut agents: Vec<String> = agents
            .into_iter()
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty())
            .collect();
        if agents.is_empty() {
            agents = DEFAULT_USER_AGENTS.iter().map(|a| a.to_string()).collect();
        }
        let start = rand::thread_rng().gen_range(0..agents.len());
        Self {
            agents,
            cursor: AtomicUsize::new(start),
        }
    }

    pub fn next(&self) -> &str {
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % self.agents.len();
        &self.agents[idx]
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

impl Default for UserAgentPool {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agents: Vec<String>,
    pub backoff: BackoffPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            user_agents: Vec::new(),
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub body: String,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("timed out fetching {url}")]
    Timeout { url: String },
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

impl FetchError {
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        self.status() == Some(StatusCode::TOO_MANY_REQUESTS.as_u16())
    }
}

#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    user_agents: UserAgentPool,
    backoff: BackoffPolicy,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            client,
            user_agents: UserAgentPool::new(config.user_agents),
            backoff: config.backoff,
        })
    }

    /// GETs `url` as text, retrying transient failures. Every attempt carries the
    /// next user agent from the pool.
    pub async fn fetch_text(
        &self,
        source_id: &str,
        url: &str,
        headers: &[(&str, &str)],
    ) -> Result<FetchedResponse, FetchError> {
        let span = info_span!("http_fetch", source_id, url);
        self.fetch_with_retries(url, headers).instrument(span).await
    }

    async fn fetch_with_retries(
        &self,
        url: &str,
        headers: &[(&str, &str)],
    ) -> Result<FetchedResponse, FetchError> {
        let mut attempt = 0;
        loop {
            let mut request = self.client.get(url).header(USER_AGENT, self.user_agents.next());
            for (name, value) in headers {
                request = request.header(*name, *value);
            }

            let retryable = match request.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    let final_url = resp.url().to_string();
                    if status.is_success() {
                        let body = resp.text().await.map_err(|e| to_fetch_error(e, url))?;
                        return Ok(FetchedResponse {
                            status,
                            final_url,
                            body,
                        });
                    }
                    let err = FetchError::HttpStatus {
                        status: status.as_u16(),
                        url: final_url,
                    };
                    if classify_status(status) == RetryDisposition::NonRetryable {
                        return Err(err);
                    }
                    err
                }
                Err(err) => {
                    if classify_reqwest_error(&err) == RetryDisposition::NonRetryable {
                        return Err(to_fetch_error(err, url));
                    }
                    to_fetch_error(err, url)
                }
            };

            if attempt >= self.backoff.max_retries {
                return Err(retryable);
            }
            let delay = self.backoff.delay_for_attempt(attempt);
            debug!(attempt, ?delay, error = %retryable, "retrying fetch");
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

fn to_fetch_error(err: reqwest::Error, url: &str) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
        }
    } else {
        FetchError::Request(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_until_capped() {
        let policy = BackoffPolicy {
            max_retries: 4,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_millis(1500),
        };

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(1500));
        assert_eq!(policy.delay_for_attempt(40), Duration::from_millis(1500));
    }

    #[test]
    fn only_server_errors_are_retried() {
        assert_eq!(classify_status(StatusCode::BAD_GATEWAY), RetryDisposition::Retryable);
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            RetryDisposition::NonRetryable
        );
        assert_eq!(classify_status(StatusCode::NOT_FOUND), RetryDisposition::NonRetryable);
    }

    #[test]
    fn user_agents_rotate_between_consecutive_calls() {
        let pool = UserAgentPool::new(["a", "b", "c"].map(String::from));
        let picks: Vec<String> = (0..7).map(|_| pool.next().to_string()).collect();
        for pair in picks.windows(2) {
            assert_ne!(pair[0], pair[1]);
        }
        let mut distinct = picks.clone();
        distinct.sort();
        distinct.dedup();
        assert_eq!(distinct.len(), 3);
    }

    #[test]
    fn empty_user_agent_list_falls_back_to_defaults() {
        let pool = UserAgentPool::new(vec!["  ".to_string()]);
        assert_eq!(pool.len(), DEFAULT_USER_AGENTS.len());
        assert!(DEFAULT_USER_AGENTS.contains(&pool.next()));
    }

    #[test]
    fn rate_limit_status_is_recognized() {
        let err = FetchError::HttpStatus {
            status: 429,
            url: "https://www.linkedin.com/jobs/search".into(),
        };
        assert!(err.is_rate_limited());
        assert_eq!(err.status(), Some(429));
    }
}
