//! HTTP transport with a bounded retry budget.

use crate::compass::CompassError;
use crate::compass::retry::RetryPolicy;
use crate::utils::fmt_duration;
use anyhow::Context;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::header::HeaderMap;
use reqwest::{RequestBuilder, StatusCode};
use std::num::NonZeroU32;
use std::time::Duration;
use tracing::{trace, warn};

/// A fully read response, handed to the caller's decoder.
#[derive(Debug)]
pub struct RawResponse {
    pub status: StatusCode,
    pub url: String,
    pub headers: HeaderMap,
    pub body: String,
}

/// Issues requests with jittered backoff and a shared politeness limit.
///
/// Each attempt sends the request, rejects non-2xx statuses, reads the body
/// and runs the decoder. Any retryable failure along the way (transport,
/// 408/429/5xx, undecodable body) consumes one attempt. Once the budget is
/// spent the last error is returned inside [`CompassError::RetriesExhausted`].
pub struct RetryingClient {
    http: reqwest::Client,
    policy: RetryPolicy,
    limiter: Option<DefaultDirectRateLimiter>,
}

impl RetryingClient {
    pub fn new(
        policy: RetryPolicy,
        request_timeout: Duration,
        requests_per_second: Option<NonZeroU32>,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("compass-crawler/", env!("CARGO_PKG_VERSION")))
            .timeout(request_timeout)
            .connect_timeout(request_timeout.min(Duration::from_secs(10)))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            policy,
            limiter: requests_per_second.map(|rps| RateLimiter::direct(Quota::per_second(rps))),
        })
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Send a request built by `build`, retrying until `decode` accepts the response.
    ///
    /// `build` is called again for every attempt. Errors that are not
    /// retryable (client errors, session problems) return immediately.
    pub async fn send<T, B, D>(&self, build: B, decode: D) -> Result<T, CompassError>
    where
        B: Fn(&reqwest::Client) -> RequestBuilder,
        D: Fn(RawResponse) -> Result<T, CompassError>,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            if let Some(limiter) = &self.limiter {
                limiter.until_ready().await;
            }

            let result = match self.attempt(build(&self.http)).await {
                Ok(raw) => decode(raw),
                Err(e) => Err(e),
            };

            let err = match result {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => e,
            };

            if !self.policy.allows_another(attempt) {
                return Err(CompassError::RetriesExhausted {
                    attempts: attempt,
                    last: Box::new(err),
                });
            }

            let delay = self.policy.delay(attempt);
            warn!(
                attempt,
                max_attempts = self.policy.max_attempts,
                delay = fmt_duration(delay),
                error = ?err,
                "Request failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn attempt(&self, builder: RequestBuilder) -> Result<RawResponse, CompassError> {
        let request = builder.build().map_err(|source| CompassError::Transport {
            url: source.url().map(|u| u.to_string()).unwrap_or_default(),
            source,
        })?;
        let url = request.url().to_string();
        trace!(method = %request.method(), url = url.as_str(), "Sending request");

        let response = self
            .http
            .execute(request)
            .await
            .map_err(|source| CompassError::Transport {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(CompassError::Status {
                status: status.as_u16(),
                url,
            });
        }

        let headers = response.headers().clone();
        let body = response
            .text()
            .await
            .map_err(|source| CompassError::Transport {
                url: url.clone(),
                source,
            })?;

        Ok(RawResponse {
            status,
            url,
            headers,
            body,
        })
    }
}
