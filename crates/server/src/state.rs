//! Shared application state

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use bookwise_agent::Answerer;
use bookwise_eval::Evaluator;

/// State shared by all HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub answerer: Arc<Answerer>,
    pub evaluator: Arc<Evaluator>,
    pub request_timeout: Duration,
}

impl AppState {
    pub fn new(
        answerer: Arc<Answerer>,
        evaluator: Arc<Evaluator>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            answerer,
            evaluator,
            request_timeout,
        }
    }

    /// Cancellation token for one request, fired when the deadline elapses
    pub fn request_token(&self) -> CancellationToken {
        let token = CancellationToken::new();
        let deadline = self.request_timeout;
        let timer = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            timer.cancel();
        });
        token
    }
}
