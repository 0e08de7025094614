use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::error::{GenerationFailure, ProviderError};
use super::provider::{GenerationBackend, LlmProvider};
use super::types::CompletionRequest;

/// Position of one `generate` call inside its retry budget.
#[derive(Debug)]
struct FailoverState {
    attempt: usize,
    cursor: usize,
    candidates: usize,
    max_attempts: usize,
    last_error: Option<ProviderError>,
}

impl FailoverState {
    fn new(start: usize, candidates: usize, max_attempts: usize) -> Self {
        Self {
            attempt: 0,
            cursor: start % candidates.max(1),
            candidates: candidates.max(1),
            max_attempts: max_attempts.max(1),
            last_error: None,
        }
    }

    /// Records a failed attempt. `Ok` means try again at the new cursor.
    fn fail(&mut self, error: ProviderError) -> Result<(), GenerationFailure> {
        self.attempt += 1;
        if !error.is_transient() {
            return Err(GenerationFailure::Aborted {
                attempts: self.attempt,
                error,
            });
        }
        if self.attempt >= self.max_attempts {
            return Err(GenerationFailure::Exhausted {
                attempts: self.attempt,
                last: error,
            });
        }
        self.last_error = Some(error);
        self.cursor = (self.cursor + 1) % self.candidates;
        Ok(())
    }

    /// Switches to a resolved endpoint list, keeping the attempts spent so far.
    fn set_candidates(&mut self, start: usize, candidates: usize) {
        self.candidates = candidates.max(1);
        self.cursor = start % self.candidates;
    }
}

/// Sends prompts through an [`LlmProvider`], failing over across its
/// endpoints on transient errors.
pub struct GenerationService {
    provider: Arc<dyn LlmProvider>,
    max_tokens: u32,
    attempt_timeout: Duration,
    backoff: Duration,
    next_start: AtomicUsize,
}

impl GenerationService {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        max_tokens: u32,
        attempt_timeout: Duration,
        backoff: Duration,
    ) -> Self {
        Self {
            provider,
            max_tokens,
            attempt_timeout,
            backoff,
            next_start: AtomicUsize::new(0),
        }
    }

    /// Linear backoff after the `attempt`-th failure.
    async fn pause(&self, attempt: usize) {
        if !self.backoff.is_zero() {
            let factor = u32::try_from(attempt).unwrap_or(u32::MAX);
            tokio::time::sleep(self.backoff.saturating_mul(factor)).await;
        }
    }
}

#[async_trait]
impl GenerationBackend for GenerationService {
    async fn generate(
        &self,
        prompt: &str,
        temperature: f32,
        max_retries: usize,
    ) -> Result<String, GenerationFailure> {
        let start = self.next_start.fetch_add(1, Ordering::Relaxed);
        let mut state = FailoverState::new(start, 1, max_retries);

        // A transient lookup failure (directory unreachable) spends an attempt.
        let endpoints = loop {
            match self.provider.endpoints().await {
                Ok(endpoints) if !endpoints.is_empty() => break endpoints,
                Ok(_) => {
                    return Err(GenerationFailure::NoEndpoints(format!(
                        "{} returned an empty endpoint list",
                        self.provider.name()
                    )))
                }
                Err(error) if error.is_transient() => {
                    warn!(
                        "Endpoint lookup {}/{} for {} failed: {}",
                        state.attempt + 1,
                        state.max_attempts,
                        self.provider.name(),
                        error
                    );
                    state.fail(error)?;
                    self.pause(state.attempt).await;
                }
                Err(error) => return Err(GenerationFailure::NoEndpoints(error.to_string())),
            }
        };
        state.set_candidates(start, endpoints.len());

        let request = CompletionRequest {
            prompt: prompt.to_string(),
            temperature,
            max_tokens: self.max_tokens,
        };

        loop {
            let endpoint = &endpoints[state.cursor];
            debug!(
                "Generation attempt {}/{} via {}",
                state.attempt + 1,
                state.max_attempts,
                endpoint.url
            );

            let outcome =
                tokio::time::timeout(self.attempt_timeout, self.provider.complete(endpoint, &request))
                    .await
                    .unwrap_or_else(|_| {
                        Err(ProviderError::Transient(format!(
                            "timed out after {}s",
                            self.attempt_timeout.as_secs_f32()
                        )))
                    });

            let error = match outcome {
                Ok(text) => {
                    if state.attempt > 0 {
                        info!(
                            "Generation succeeded on attempt {} via {}",
                            state.attempt + 1,
                            endpoint.url
                        );
                    }
                    return Ok(text);
                }
                Err(error) => error,
            };

            warn!(
                "Attempt {}/{} against {} failed: {}",
                state.attempt + 1,
                state.max_attempts,
                endpoint.url,
                error
            );
            state.fail(error)?;
            if let Some(last) = &state.last_error {
                debug!("Failing over to {} after: {}", endpoints[state.cursor].url, last);
            }

            self.pause(state.attempt).await;
        }
    }
}
