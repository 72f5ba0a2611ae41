//! The generation worker: one unit in, one validated outcome out.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use codeloom_llm::{GenerateError, Generator, RetryPolicy};
use codeloom_quality::{extract_code_block, parse_single_unit};
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::prompt::{GenerationRequest, PromptBuilder};

/// Errors the worker surfaces to the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkerError {
    /// The attempt budget ran out.
    #[error("generation exhausted after {attempts} attempts: {last_error}")]
    Exhausted {
        /// Attempts actually made.
        attempts: usize,
        /// The error that ended the final attempt.
        last_error: String,
    },

    /// The generator failed fatally; never retried.
    #[error("fatal generation error: {0}")]
    Fatal(String),
}

/// A successfully parsed generation, not yet committed to the graph.
///
/// The worker never mutates the graph itself; the scheduler commits
/// outcomes so that parallel batches advance state only at the join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationOutcome {
    /// The unit the outcome belongs to.
    pub name: String,
    /// Extracted signature header.
    pub definition: String,
    /// Extracted function text.
    pub content: String,
    /// Auxiliary declarations to merge into the unit.
    pub imports: BTreeSet<String>,
}

/// Wraps one generation target: build the prompt, call the generator,
/// parse the result. The injected [`RetryPolicy`] bounds the total number
/// of attempts; transient errors wait for a backoff delay, parse errors
/// re-prompt immediately with the error appended.
#[derive(Clone)]
pub struct GenerationWorker {
    generator: Arc<dyn Generator>,
    prompts: Arc<dyn PromptBuilder>,
    retry: RetryPolicy,
    call_timeout: Duration,
}

impl GenerationWorker {
    /// Create a worker with the default retry policy.
    pub fn new(generator: Arc<dyn Generator>, prompts: Arc<dyn PromptBuilder>) -> Self {
        Self {
            generator,
            prompts,
            retry: RetryPolicy::default(),
            call_timeout: Duration::from_secs(180),
        }
    }

    /// Replace the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Replace the per-call timeout.
    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    /// Run the generate/parse protocol for one unit.
    pub async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationOutcome, WorkerError> {
        let mut request = request.clone();
        let mut last_error = String::new();

        for attempt in 0..self.retry.max_attempts {
            let prompt = self.prompts.build(&request);
            debug!(unit = %request.unit_name, attempt, "Generating");

            let raw = match timeout(self.call_timeout, self.generator.generate(&prompt)).await
            {
                Ok(result) => result,
                Err(_) => Err(GenerateError::Transient(format!(
                    "generator call timed out after {:?}",
                    self.call_timeout
                ))),
            };

            match raw {
                Ok(text) => {
                    match parse_single_unit(&extract_code_block(&text))
                        .and_then(|parsed| {
                            parsed.ensure_name(&request.unit_name).map(|_| parsed)
                        }) {
                        Ok(parsed) => {
                            return Ok(GenerationOutcome {
                                name: parsed.name,
                                definition: parsed.definition,
                                content: parsed.content,
                                imports: parsed.imports,
                            });
                        }
                        Err(parse_err) => {
                            // non-transient: re-prompt at once with the error
                            warn!(unit = %request.unit_name, error = %parse_err, "Parse failed");
                            last_error = parse_err.to_string();
                            request.amendment = Some(parse_err.to_string());
                        }
                    }
                }
                Err(GenerateError::Fatal(message)) => {
                    return Err(WorkerError::Fatal(message));
                }
                Err(GenerateError::Transient(message)) => {
                    warn!(unit = %request.unit_name, error = %message, "Transient failure");
                    last_error = message;
                    if attempt + 1 < self.retry.max_attempts {
                        sleep(self.retry.delay(attempt)).await;
                    }
                }
            }
        }

        Err(WorkerError::Exhausted {
            attempts: self.retry.max_attempts,
            last_error,
        })
    }
}
