//! Fallback executor
//!
//! Runs an operation against each candidate model in order until one succeeds.
//! Candidates are tried strictly one at a time; every failure is recorded and
//! logged, and exhaustion yields [`Error::AllCandidatesFailed`].

use std::future::Future;
use tracing::{info, warn};

use crate::client::error_classification::is_transient_error_class;
use crate::error::AttemptRecord;
use crate::routing::ModelDescriptor;
use crate::{Error, Result};

/// Outcome of a successful fallback run.
#[derive(Debug)]
pub struct FallbackSuccess<T> {
    pub value: T,
    /// Candidate that produced `value`.
    pub model: String,
    /// Every attempt in order, the successful one last.
    pub attempts: Vec<AttemptRecord>,
}

impl<T> FallbackSuccess<T> {
    pub fn failures(&self) -> impl Iterator<Item = &AttemptRecord> {
        self.attempts.iter().filter(|a| !a.succeeded)
    }
}

#[derive(Debug, Clone)]
pub struct FallbackExecutor {
    candidates: Vec<String>,
    operation: &'static str,
}

impl FallbackExecutor {
    pub fn new(candidates: Vec<String>) -> Self {
        Self {
            candidates,
            operation: "call",
        }
    }

    /// `[canonical_model] ++ fallback_models`.
    pub fn from_descriptor(descriptor: &ModelDescriptor) -> Self {
        Self::new(descriptor.candidates())
    }

    /// Label used in log lines ("chat", "stream_open", "embed").
    pub fn with_operation(mut self, operation: &'static str) -> Self {
        self.operation = operation;
        self
    }

    pub fn candidates(&self) -> &[String] {
        &self.candidates
    }

    pub async fn execute<T, F, Fut>(&self, mut call: F) -> Result<FallbackSuccess<T>>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempts = Vec::with_capacity(self.candidates.len());
        let mut last_err: Option<Error> = None;

        for (idx, candidate) in self.candidates.iter().enumerate() {
            match call(candidate.clone()).await {
                Ok(value) => {
                    attempts.push(AttemptRecord {
                        candidate_model: candidate.clone(),
                        succeeded: true,
                        error: None,
                    });
                    if idx > 0 {
                        info!(
                            operation = self.operation,
                            model = %candidate,
                            failed_attempts = idx,
                            "fallback candidate succeeded"
                        );
                    }
                    return Ok(FallbackSuccess {
                        value,
                        model: candidate.clone(),
                        attempts,
                    });
                }
                Err(e) => {
                    let remaining = self.candidates.len() - idx - 1;
                    warn!(
                        operation = self.operation,
                        model = %candidate,
                        error_class = e.class(),
                        transient = is_transient_error_class(e.class()),
                        remaining,
                        error = %e,
                        "Model {} failed",
                        candidate
                    );
                    attempts.push(AttemptRecord {
                        candidate_model: candidate.clone(),
                        succeeded: false,
                        error: Some(e.to_string()),
                    });
                    last_err = Some(e);
                }
            }
        }

        let last = last_err.unwrap_or_else(|| Error::configuration("no candidate models to try"));
        Err(Error::AllCandidatesFailed {
            attempts,
            last: Box::new(last),
        })
    }
}
