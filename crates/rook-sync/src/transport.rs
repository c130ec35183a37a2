//! The HTTP seam. Source adapters only ever see [`HttpTransport`], so tests
//! can script responses without a network.

use std::{future::Future, time::Duration};

use bytes::Bytes;
use futures::{StreamExt as _, stream::BoxStream};
use reqwest::header::{ACCEPT, RETRY_AFTER};
use thiserror::Error;

use crate::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
  pub url:    String,
  pub query:  Vec<(String, String)>,
  pub accept: &'static str,
}

impl HttpRequest {
  pub fn json(url: impl Into<String>) -> Self {
    Self {
      url:    url.into(),
      query:  Vec::new(),
      accept: "application/json",
    }
  }

  pub fn ndjson(url: impl Into<String>) -> Self {
    Self {
      url:    url.into(),
      query:  Vec::new(),
      accept: "application/x-ndjson",
    }
  }

  pub fn param(mut self, key: &str, value: impl ToString) -> Self {
    self.query.push((key.to_string(), value.to_string()));
    self
  }
}

/// Why one HTTP call did not produce a body.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
  #[error("HTTP {status}")]
  Status {
    status:      u16,
    retry_after: Option<Duration>,
  },

  #[error("connection failed: {0}")]
  Connection(String),

  #[error("failed to read response body: {0}")]
  Body(String),
}

impl TransportError {
  /// Rate limiting, server errors and connection trouble are worth retrying;
  /// other client errors are not.
  pub fn is_transient(&self) -> bool {
    match self {
      Self::Status { status, .. } => *status == 429 || *status >= 500,
      Self::Connection(_) | Self::Body(_) => true,
    }
  }

  pub fn retry_after(&self) -> Option<Duration> {
    match self {
      Self::Status { retry_after, .. } => *retry_after,
      _ => None,
    }
  }
}

/// Body chunks of a successful response, in arrival order.
pub type BodyStream = BoxStream<'static, Result<Bytes, TransportError>>;

/// Issues GET requests and returns the response body of successful calls.
pub trait HttpTransport: Send + Sync {
  /// Read the whole body.
  fn get(
    &self,
    request: HttpRequest,
  ) -> impl Future<Output = Result<String, TransportError>> + Send + '_;

  /// Resolve once the response headers are in and hand the body over as it
  /// arrives.
  fn open(
    &self,
    request: HttpRequest,
  ) -> impl Future<Output = Result<BodyStream, TransportError>> + Send + '_;
}

// ─── reqwest ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ReqwestTransport {
  client: reqwest::Client,
}

impl ReqwestTransport {
  pub fn new(user_agent: &str) -> Result<Self> {
    let client = reqwest::Client::builder()
      .user_agent(user_agent)
      .build()?;
    Ok(Self { client })
  }

  async fn send(&self, request: HttpRequest) -> Result<reqwest::Response, TransportError> {
    let response = self
      .client
      .get(&request.url)
      .query(&request.query)
      .header(ACCEPT, request.accept)
      .send()
      .await
      .map_err(|e| TransportError::Connection(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
      let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs);
      return Err(TransportError::Status {
        status: status.as_u16(),
        retry_after,
      });
    }
    Ok(response)
  }
}

impl HttpTransport for ReqwestTransport {
  async fn get(&self, request: HttpRequest) -> Result<String, TransportError> {
    self
      .send(request)
      .await?
      .text()
      .await
      .map_err(|e| TransportError::Body(e.to_string()))
  }

  async fn open(&self, request: HttpRequest) -> Result<BodyStream, TransportError> {
    let response = self.send(request).await?;
    Ok(
      response
        .bytes_stream()
        .map(|chunk| chunk.map_err(|e| TransportError::Body(e.to_string())))
        .boxed(),
    )
  }
}

// ─── Scripted transport for tests ────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod testing {
  use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
  };

  use parking_lot::Mutex;

  use super::*;

  #[derive(Debug, Clone)]
  pub enum Reply {
    Body(String),
    /// Delivered by `open` one part at a time, `gap` apart, optionally
    /// breaking off with `then` after the last part.
    Chunks {
      parts: Vec<String>,
      gap:   Duration,
      then:  Option<TransportError>,
    },
    Fail(TransportError),
    /// Never completes; exercises the call timeout.
    Hang,
  }

  /// Replies are queued per URL; the last reply for a URL repeats.
  #[derive(Debug, Clone, Default)]
  pub struct FakeTransport {
    replies: Arc<Mutex<HashMap<String, VecDeque<Reply>>>>,
    calls:   Arc<Mutex<Vec<HttpRequest>>>,
  }

  impl FakeTransport {
    pub fn new() -> Self { Self::default() }

    pub fn reply(&self, url: &str, reply: Reply) -> &Self {
      self
        .replies
        .lock()
        .entry(url.to_string())
        .or_default()
        .push_back(reply);
      self
    }

    pub fn body(&self, url: &str, body: impl Into<String>) -> &Self {
      self.reply(url, Reply::Body(body.into()))
    }

    pub fn status(&self, url: &str, status: u16) -> &Self {
      self.reply(
        url,
        Reply::Fail(TransportError::Status {
          status,
          retry_after: None,
        }),
      )
    }

    pub fn calls(&self) -> Vec<HttpRequest> { self.calls.lock().clone() }

    pub fn calls_to(&self, url: &str) -> usize {
      self.calls.lock().iter().filter(|r| r.url == url).count()
    }

    fn next(&self, url: &str) -> Reply {
      let mut replies = self.replies.lock();
      match replies.get_mut(url) {
        Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or(Reply::Hang),
        Some(queue) => queue.front().cloned().unwrap_or(Reply::Hang),
        None => Reply::Fail(TransportError::Status {
          status:      404,
          retry_after: None,
        }),
      }
    }
  }

  /// Cut `body` into parts of at most `size` bytes. ASCII bodies only.
  pub fn split(body: &str, size: usize) -> Vec<String> {
    body
      .as_bytes()
      .chunks(size)
      .map(|c| String::from_utf8_lossy(c).into_owned())
      .collect()
  }

  impl HttpTransport for FakeTransport {
    async fn get(&self, request: HttpRequest) -> Result<String, TransportError> {
      let reply = self.next(&request.url);
      self.calls.lock().push(request);
      match reply {
        Reply::Body(body) => Ok(body),
        Reply::Chunks { parts, .. } => Ok(parts.concat()),
        Reply::Fail(err) => Err(err),
        Reply::Hang => std::future::pending().await,
      }
    }

    async fn open(&self, request: HttpRequest) -> Result<BodyStream, TransportError> {
      let reply = self.next(&request.url);
      self.calls.lock().push(request);
      match reply {
        Reply::Body(body) => Ok(futures::stream::iter([Ok(Bytes::from(body))]).boxed()),
        Reply::Chunks { parts, gap, then } => Ok(
          async_stream::stream! {
            for (i, part) in parts.into_iter().enumerate() {
              if i > 0 {
                tokio::time::sleep(gap).await;
              }
              yield Ok(Bytes::from(part));
            }
            if let Some(err) = then {
              yield Err(err);
            }
          }
          .boxed(),
        ),
        Reply::Fail(err) => Err(err),
        Reply::Hang => std::future::pending().await,
      }
    }
  }
}
