//! Scripted HTTP client for tests.
//!
//! Shipped outside `#[cfg(test)]` so integration tests and downstream crates
//! can drive the fetcher without a network.

use parking_lot::Mutex;
use std::collections::VecDeque;

use super::client::{AsyncHttpClient, BoxFuture};
use super::FetchError;

/// Test double that replays a script of responses, then a default.
///
/// Every request URL is recorded for later assertions.
pub struct ScriptedHttpClient {
    script: Mutex<VecDeque<Result<Vec<u8>, FetchError>>>,
    default: Result<Vec<u8>, FetchError>,
    requests: Mutex<Vec<String>>,
}

impl ScriptedHttpClient {
    /// A client that always returns the given bytes.
    pub fn always_ok(bytes: Vec<u8>) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            default: Ok(bytes),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// A client that always fails with the given error.
    pub fn always_err(error: FetchError) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            default: Err(error),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Prepend scripted responses consumed before the default kicks in.
    pub fn with_script(self, script: Vec<Result<Vec<u8>, FetchError>>) -> Self {
        *self.script.lock() = script.into();
        self
    }

    /// URLs requested so far, in order.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }

    /// Number of requests issued so far.
    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }
}

impl AsyncHttpClient for ScriptedHttpClient {
    fn get<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Vec<u8>, FetchError>> {
        self.requests.lock().push(url.to_string());
        let response = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.default.clone());
        Box::pin(async move { response })
    }
}
