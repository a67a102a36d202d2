use std::time::Duration;

use serde_json::{json, Value};
use tracing::{debug, warn};

use objectql_data::{Error, ErrorCode, Result};

/// Retry policy for transient failures: exponential backoff starting
/// at 100 ms, doubling per attempt, capped. Only connection-level
/// failures retry; a remote that answered has already decided.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub factor: u32,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_backoff: Duration::from_millis(100),
            factor: 2,
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let factor = self.factor.saturating_pow(attempt);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// One reconnecting HTTP client per remote endpoint.
pub struct RemoteClient {
    base_url: String,
    http: reqwest::Client,
    retry: RetryPolicy,
}

impl RemoteClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration, retry: RetryPolicy) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::connection(format!("cannot build http client: {e}")))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
            retry,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GET a JSON document, with retry.
    pub async fn get_json(&self, path: &str) -> Result<Value> {
        let url = format!("{}{path}", self.base_url);
        self.with_retry(|| async {
            let response = self
                .http
                .get(&url)
                .send()
                .await
                .map_err(|e| Error::connection(format!("GET {url}: {e}")))?;
            read_json_response(response).await
        })
        .await
    }

    /// POST an operation envelope `{ op, object, args }` and unwrap
    /// the `{ data }` payload, raising any embedded `{ error }`.
    pub async fn post_op(&self, op: &str, object: &str, args: Value) -> Result<Value> {
        let url = format!("{}/api/objectql", self.base_url);
        let body = json!({ "op": op, "object": object, "args": args });
        let payload = self
            .with_retry(|| async {
                let response = self
                    .http
                    .post(&url)
                    .json(&body)
                    .send()
                    .await
                    .map_err(|e| Error::connection(format!("POST {url}: {e}")))?;
                read_json_response(response).await
            })
            .await?;
        match payload {
            Value::Object(mut map) => {
                if let Some(data) = map.remove("data") {
                    Ok(data)
                } else if let Some(items) = map.remove("items") {
                    Ok(items)
                } else {
                    Ok(Value::Object(map))
                }
            }
            other => Ok(other),
        }
    }

    async fn with_retry<F, Fut>(&self, call: F) -> Result<Value>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<Value>>,
    {
        let mut attempt = 0u32;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt + 1 < self.retry.max_attempts => {
                    let backoff = self.retry.backoff(attempt);
                    debug!(
                        remote = %self.base_url,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "transient remote failure, backing off"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(err) => {
                    if attempt > 0 {
                        warn!(remote = %self.base_url, attempts = attempt + 1, error = %err, "remote call failed after retries");
                    }
                    return Err(err);
                }
            }
        }
    }
}

/// Interpret a remote response: structured `{ error }` bodies win,
/// then the HTTP status, then the JSON payload.
async fn read_json_response(response: reqwest::Response) -> Result<Value> {
    let status = response.status();
    let body: Value = match response.json().await {
        Ok(body) => body,
        Err(e) if status.is_success() => {
            return Err(Error::query(format!("remote returned malformed JSON: {e}")))
        }
        Err(_) => Value::Null,
    };
    if let Some(err) = Error::from_body(&body) {
        return Err(err);
    }
    if !status.is_success() {
        let code = match status.as_u16() {
            401 => ErrorCode::Unauthorized,
            403 => ErrorCode::Forbidden,
            404 => ErrorCode::NotFound,
            409 => ErrorCode::Conflict,
            429 => ErrorCode::RateLimitExceeded,
            400 => ErrorCode::Validation,
            // 5xx and everything else count as transient.
            _ => ErrorCode::DriverConnectionFailed,
        };
        return Err(Error::new(code, format!("remote answered {status}")));
    }
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let retry = RetryPolicy::default();
        assert_eq!(retry.backoff(0), Duration::from_millis(100));
        assert_eq!(retry.backoff(1), Duration::from_millis(200));
        assert_eq!(retry.backoff(2), Duration::from_millis(400));
        assert_eq!(retry.backoff(10), Duration::from_secs(5));
    }
}
