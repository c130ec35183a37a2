//! One rate-limited, timed-out, retried HTTP GET.
//!
//! Every adapter call goes through [`Fetcher::get`] or [`Fetcher::open`]:
//! wait for a limiter slot, run the call under a hard timeout, record the
//! outcome with the limiter, and retry transient failures with exponential
//! backoff.

use std::{future::Future, sync::Arc, time::Duration};

use futures::StreamExt as _;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::{
  Error, Result,
  limiter::{RateLimiter, RequestRecord, now_ms},
  transport::{BodyStream, HttpRequest, HttpTransport, TransportError},
};

/// Bounded exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
  /// Total attempts including the first; at least 1.
  pub max_attempts:       u32,
  pub initial_backoff_ms: u64,
  pub max_backoff_ms:     u64,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_attempts:       3,
      initial_backoff_ms: 500,
      max_backoff_ms:     8_000,
    }
  }
}

impl RetryPolicy {
  /// Delay before attempt `attempt + 1`, where `attempt` starts at 1.
  pub fn backoff(&self, attempt: u32) -> Duration {
    let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
    Duration::from_millis(
      self
        .initial_backoff_ms
        .saturating_mul(factor)
        .min(self.max_backoff_ms),
    )
  }
}

pub struct Fetcher<T> {
  transport:   T,
  limiter:     Arc<RateLimiter>,
  limiter_key: String,
  policy:      RetryPolicy,
  timeout:     Duration,
}

impl<T: HttpTransport> Fetcher<T> {
  pub fn new(
    transport: T,
    limiter: Arc<RateLimiter>,
    limiter_key: String,
    policy: RetryPolicy,
    timeout: Duration,
  ) -> Self {
    Self {
      transport,
      limiter,
      limiter_key,
      policy,
      timeout,
    }
  }

  /// Fetch `request`, returning the body. Cancellation is checked before
  /// every attempt and while waiting for a limiter slot.
  pub async fn get(&self, request: HttpRequest, cancel: &CancellationToken) -> Result<String> {
    let sent = self
      .send(&request, cancel, |r| self.transport.get(r))
      .await?;
    self.limiter.record_request(&self.limiter_key, RequestRecord {
      timestamp_ms:        sent.slot,
      response_size_bytes: sent.value.len() as u64,
      duration_ms:         now_ms().saturating_sub(sent.started),
      success:             true,
    });
    Ok(sent.value)
  }

  /// Open `request` for reading line by line. The timeout covers getting
  /// the response headers and then each wait for the next chunk, never the
  /// whole transfer.
  pub async fn open(&self, request: HttpRequest, cancel: &CancellationToken) -> Result<LineReader> {
    let sent = self
      .send(&request, cancel, |r| self.transport.open(r))
      .await?;
    Ok(LineReader {
      body:        sent.value,
      buf:         Vec::new(),
      idle:        self.timeout,
      finished:    false,
      failed:      false,
      read:        0,
      slot:        sent.slot,
      started:     sent.started,
      limiter:     Arc::clone(&self.limiter),
      limiter_key: self.limiter_key.clone(),
    })
  }

  /// The retry loop shared by [`Self::get`] and [`Self::open`]. Failed
  /// attempts are recorded here; the caller records the successful one.
  async fn send<R, F, Fut>(
    &self,
    request: &HttpRequest,
    cancel: &CancellationToken,
    call: F,
  ) -> Result<Sent<R>>
  where
    F: Fn(HttpRequest) -> Fut,
    Fut: Future<Output = Result<R, TransportError>>,
  {
    let attempts = self.policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
      attempt += 1;
      if cancel.is_cancelled() {
        return Err(Error::Cancelled);
      }

      let slot = tokio::select! {
        _ = cancel.cancelled() => return Err(Error::Cancelled),
        slot = self.limiter.wait_for_slot(&self.limiter_key) => slot,
      };

      let started = now_ms();
      let err = match tokio::time::timeout(self.timeout, call(request.clone())).await {
        Ok(Ok(value)) => {
          return Ok(Sent {
            value,
            slot,
            started,
          });
        }
        Ok(Err(e)) => Error::Transport(e),
        Err(_) => Error::Timeout(self.timeout),
      };

      self.limiter.record_request(&self.limiter_key, RequestRecord {
        timestamp_ms:        slot,
        response_size_bytes: 0,
        duration_ms:         now_ms().saturating_sub(started),
        success:             false,
      });

      if !err.is_transient() || attempt >= attempts {
        return Err(err);
      }

      let mut delay = self.policy.backoff(attempt);
      if let Error::Transport(t) = &err
        && let Some(server_says) = t.retry_after()
      {
        delay = delay.max(server_says);
      }
      tracing::warn!(
        url = %request.url,
        attempt,
        delay_ms = delay.as_millis() as u64,
        error = %err,
        "request failed; retrying"
      );

      tokio::select! {
        _ = cancel.cancelled() => return Err(Error::Cancelled),
        _ = tokio::time::sleep(delay) => {}
      }
    }
  }
}

struct Sent<R> {
  value:   R,
  slot:    u64,
  started: u64,
}

// ─── Line reader ─────────────────────────────────────────────────────────────

/// A response body consumed one line at a time as chunks arrive. The bytes
/// read are charged to the limiter when the reader is dropped.
pub struct LineReader {
  body:        BodyStream,
  buf:         Vec<u8>,
  idle:        Duration,
  finished:    bool,
  failed:      bool,
  read:        u64,
  slot:        u64,
  started:     u64,
  limiter:     Arc<RateLimiter>,
  limiter_key: String,
}

impl LineReader {
  /// The next line without its terminator, or `None` once the body is
  /// exhausted. A broken connection, a chunk that takes longer than the
  /// idle timeout, or cancellation is returned once and ends the body; a
  /// partial trailing line is discarded in that case.
  pub async fn next_line(&mut self, cancel: &CancellationToken) -> Option<Result<String>> {
    loop {
      if let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
        let line: Vec<u8> = self.buf.drain(..=pos).collect();
        return Some(Ok(String::from_utf8_lossy(&line[..pos]).into_owned()));
      }
      if self.finished {
        if self.buf.is_empty() {
          return None;
        }
        let rest = std::mem::take(&mut self.buf);
        return Some(Ok(String::from_utf8_lossy(&rest).into_owned()));
      }

      let chunk = tokio::select! {
        _ = cancel.cancelled() => None,
        chunk = tokio::time::timeout(self.idle, self.body.next()) => Some(chunk),
      };
      match chunk {
        None => {
          self.fail();
          return Some(Err(Error::Cancelled));
        }
        Some(Ok(Some(Ok(bytes)))) => {
          self.read += bytes.len() as u64;
          self.buf.extend_from_slice(&bytes);
        }
        Some(Ok(Some(Err(e)))) => {
          self.fail();
          return Some(Err(Error::Transport(e)));
        }
        Some(Ok(None)) => self.finished = true,
        Some(Err(_)) => {
          self.fail();
          return Some(Err(Error::Timeout(self.idle)));
        }
      }
    }
  }

  fn fail(&mut self) {
    self.finished = true;
    self.failed = true;
    self.buf.clear();
  }
}

impl Drop for LineReader {
  fn drop(&mut self) {
    self.limiter.record_request(&self.limiter_key, RequestRecord {
      timestamp_ms:        self.slot,
      response_size_bytes: self.read,
      duration_ms:         now_ms().saturating_sub(self.started),
      success:             !self.failed,
    });
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    limiter::RateLimitConfig,
    transport::{
      TransportError,
      testing::{FakeTransport, Reply, split},
    },
  };

  const URL: &str = "https://api.test/thing";

  fn fetcher(transport: FakeTransport, timeout_ms: u64) -> Fetcher<FakeTransport> {
    let limiter = Arc::new(RateLimiter::new(RateLimitConfig {
      per_second: 1_000,
      per_minute: None,
      per_hour:   None,
      data_quota: None,
    }));
    fetcher_with(transport, timeout_ms, limiter)
  }

  fn fetcher_with(
    transport: FakeTransport,
    timeout_ms: u64,
    limiter: Arc<RateLimiter>,
  ) -> Fetcher<FakeTransport> {
    Fetcher::new(
      transport,
      limiter,
      "test".to_string(),
      RetryPolicy {
        max_attempts:       3,
        initial_backoff_ms: 1,
        max_backoff_ms:     4,
      },
      Duration::from_millis(timeout_ms),
    )
  }

  #[test]
  fn backoff_doubles_and_caps() {
    let p = RetryPolicy::default();
    assert_eq!(p.backoff(1), Duration::from_millis(500));
    assert_eq!(p.backoff(2), Duration::from_millis(1_000));
    assert_eq!(p.backoff(10), Duration::from_millis(8_000));
  }

  #[tokio::test]
  async fn server_errors_are_retried() {
    let t = FakeTransport::new();
    t.status(URL, 503).status(URL, 502).body(URL, "ok");
    let f = fetcher(t.clone(), 1_000);

    let body = f.get(HttpRequest::json(URL), &CancellationToken::new()).await.unwrap();
    assert_eq!(body, "ok");
    assert_eq!(t.calls_to(URL), 3);
  }

  #[tokio::test]
  async fn client_errors_are_not_retried() {
    let t = FakeTransport::new();
    t.status(URL, 404);
    let f = fetcher(t.clone(), 1_000);

    let err = f.get(HttpRequest::json(URL), &CancellationToken::new()).await.unwrap_err();
    assert!(matches!(
      err,
      Error::Transport(TransportError::Status { status: 404, .. })
    ));
    assert_eq!(t.calls_to(URL), 1);
  }

  #[tokio::test]
  async fn hung_call_times_out_after_every_attempt() {
    let t = FakeTransport::new();
    t.reply(URL, Reply::Hang);
    let f = fetcher(t.clone(), 20);

    let err = f.get(HttpRequest::json(URL), &CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, Error::Timeout(_)));
    assert_eq!(t.calls_to(URL), 3);
  }

  #[tokio::test]
  async fn cancelled_token_short_circuits() {
    let t = FakeTransport::new();
    t.body(URL, "ok");
    let f = fetcher(t.clone(), 1_000);
    let cancel = CancellationToken::new();
    cancel.cancel();

    assert!(matches!(
      f.get(HttpRequest::json(URL), &cancel).await,
      Err(Error::Cancelled)
    ));
    assert!(t.calls().is_empty());
  }

  async fn lines(reader: &mut LineReader) -> Vec<Result<String>> {
    let cancel = CancellationToken::new();
    let mut out = Vec::new();
    while let Some(line) = reader.next_line(&cancel).await {
      out.push(line);
    }
    out
  }

  #[tokio::test]
  async fn slow_body_outlasts_the_call_timeout() {
    let t = FakeTransport::new();
    t.reply(URL, Reply::Chunks {
      parts: split("alpha\nbravo\ncharlie", 3),
      gap:   Duration::from_millis(30),
      then:  None,
    });
    // Seven parts 30 ms apart: well past the 100 ms timeout in total, but
    // never idle for that long.
    let f = fetcher(t.clone(), 100);

    let mut reader = f.open(HttpRequest::ndjson(URL), &CancellationToken::new()).await.unwrap();
    let got: Vec<String> = lines(&mut reader).await.into_iter().map(Result::unwrap).collect();
    assert_eq!(got, ["alpha", "bravo", "charlie"]);
    assert_eq!(t.calls_to(URL), 1);
  }

  #[tokio::test]
  async fn stalled_body_ends_after_lines_already_read() {
    let t = FakeTransport::new();
    t.reply(URL, Reply::Chunks {
      parts: vec!["one\ntwo\n".to_string(), "three\n".to_string()],
      gap:   Duration::from_millis(300),
      then:  None,
    });
    let f = fetcher(t.clone(), 100);

    let mut reader = f.open(HttpRequest::ndjson(URL), &CancellationToken::new()).await.unwrap();
    let got = lines(&mut reader).await;
    assert_eq!(got.len(), 3);
    assert_eq!(got[0].as_deref().unwrap(), "one");
    assert_eq!(got[1].as_deref().unwrap(), "two");
    assert!(matches!(got[2], Err(Error::Timeout(_))));
  }

  #[tokio::test]
  async fn broken_body_drops_the_partial_line() {
    let t = FakeTransport::new();
    t.reply(URL, Reply::Chunks {
      parts: vec!["a\nb".to_string()],
      gap:   Duration::ZERO,
      then:  Some(TransportError::Body("connection reset".to_string())),
    });
    let f = fetcher(t.clone(), 1_000);

    let mut reader = f.open(HttpRequest::ndjson(URL), &CancellationToken::new()).await.unwrap();
    let got = lines(&mut reader).await;
    assert_eq!(got.len(), 2);
    assert_eq!(got[0].as_deref().unwrap(), "a");
    assert!(matches!(got[1], Err(Error::Transport(TransportError::Body(_)))));
  }

  #[tokio::test]
  async fn streamed_bytes_count_against_the_quota() {
    let t = FakeTransport::new();
    let body = "0123456789\n0123456789\n";
    t.reply(URL, Reply::Chunks {
      parts: split(body, 4),
      gap:   Duration::ZERO,
      then:  None,
    });
    let limiter = Arc::new(RateLimiter::new(RateLimitConfig {
      per_second: 1_000,
      per_minute: None,
      per_hour:   None,
      data_quota: Some(crate::limiter::DataQuota {
        bytes:       1_000_000,
        interval_ms: 60_000,
      }),
    }));
    let f = fetcher_with(t, 1_000, Arc::clone(&limiter));

    let mut reader = f.open(HttpRequest::ndjson(URL), &CancellationToken::new()).await.unwrap();
    assert_eq!(lines(&mut reader).await.len(), 2);
    drop(reader);
    assert_eq!(limiter.quota_used("test"), body.len() as u64);
  }
}
