//! In-memory fakes for exercising the client without a device
//!
//! [`ScriptedTransport`] answers GET requests from per-path scripts and
//! records every path it was asked for.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::api::{RawResponse, Transport};
use crate::error::{OpenFanError, Result};

/// One scripted reaction to a request
#[derive(Debug, Clone)]
pub enum Scripted {
    Respond(RawResponse),
    /// Connection-level failure
    Fail(String),
    /// Request could not even be built, e.g. a malformed URL
    Misconfigured(String),
    /// Never answers; the client's request timeout fires
    Hang,
}

/// Transport that replays scripted responses per path
///
/// Each path has a queue. Entries are consumed in order, and the last one
/// keeps answering once the queue is down to it. Unscripted paths fail
/// like a refused connection.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    routes: Mutex<HashMap<String, VecDeque<Scripted>>>,
    requests: Mutex<Vec<String>>,
    delay: Mutex<Option<Duration>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, path: &str, entry: Scripted) -> &Self {
        self.routes
            .lock()
            .entry(path.to_string())
            .or_default()
            .push_back(entry);
        self
    }

    /// Queue a response with the given status and body
    pub fn respond(&self, path: &str, status: u16, text: &str) -> &Self {
        self.push(path, Scripted::Respond(RawResponse::new(status, text)))
    }

    /// Queue a connection failure
    pub fn fail(&self, path: &str) -> &Self {
        self.push(path, Scripted::Fail("connection refused".into()))
    }

    /// Queue a failure that is not tied to one request
    pub fn misconfigure(&self, path: &str) -> &Self {
        self.push(path, Scripted::Misconfigured("invalid request URL".into()))
    }

    /// Queue a request that never completes
    pub fn hang(&self, path: &str) -> &Self {
        self.push(path, Scripted::Hang)
    }

    /// Drop every scripted entry for a path
    pub fn clear(&self, path: &str) {
        self.routes.lock().remove(path);
    }

    /// Delay every answer, to hold requests in flight
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock() = delay;
    }

    /// Paths requested so far, in order
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self, path: &str) -> usize {
        self.requests.lock().iter().filter(|p| *p == path).count()
    }

    fn next(&self, path: &str) -> Option<Scripted> {
        let mut routes = self.routes.lock();
        let queue = routes.get_mut(path)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn get(&self, path: &str) -> Result<RawResponse> {
        self.requests.lock().push(path.to_string());
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        match self.next(path) {
            Some(Scripted::Respond(resp)) => Ok(resp),
            Some(Scripted::Fail(reason)) => Err(OpenFanError::Network {
                path: path.to_string(),
                reason,
            }),
            Some(Scripted::Misconfigured(reason)) => Err(OpenFanError::config(reason)),
            Some(Scripted::Hang) => std::future::pending().await,
            None => Err(OpenFanError::Network {
                path: path.to_string(),
                reason: "no route scripted".into(),
            }),
        }
    }

    fn base_url(&self) -> &str {
        "http://openfan.test"
    }
}
