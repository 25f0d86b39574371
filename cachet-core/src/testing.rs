//! Test doubles shared by the unit tests

use async_trait::async_trait;
use http::Method;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::resource::{FetchError, FetchedResponse, Fetcher};

/// A [`Fetcher`] that replays queued outcomes in order
///
/// When the queue is empty it keeps returning the last response it served,
/// which is what an unchanged upstream looks like. Before anything was
/// served it fails with a transport error.
#[derive(Default)]
pub struct ScriptedFetcher {
    script: Mutex<VecDeque<Result<FetchedResponse, FetchError>>>,
    last: Mutex<Option<FetchedResponse>>,
    calls: AtomicUsize,
    delay: Duration,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long before answering each fetch
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn push_response(&self, response: FetchedResponse) {
        self.script.lock().expect("script lock").push_back(Ok(response));
    }

    pub fn push_error(&self, error: FetchError) {
        self.script.lock().expect("script lock").push_back(Err(error));
    }

    /// Number of fetches issued so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, _method: &Method, _url: &str) -> Result<FetchedResponse, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let next = self.script.lock().expect("script lock").pop_front();
        match next {
            Some(Ok(response)) => {
                *self.last.lock().expect("last lock") = Some(response.clone());
                Ok(response)
            }
            Some(Err(e)) => Err(e),
            None => self
                .last
                .lock()
                .expect("last lock")
                .clone()
                .ok_or_else(|| FetchError::Transport("no scripted response".into())),
        }
    }
}
