//! Execution adapter - performs play/pause with a bounded retry budget

use super::surface::{MediaTarget, TargetLocator};
use playback_shared::{
    timing, CommandToken, DispatchRequest, DispatchResponse, RelayError,
    CONTROL_VIDEO_ACTION,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Attempt limit and linear delay schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: timing::EXECUTION_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(timing::EXECUTION_DELAY_BASE_MS),
        }
    }
}

impl RetryPolicy {
    /// Wait after failed attempt `attempt` (1-based) before the next one
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }

    /// Fresh budget for one command
    pub fn budget(&self) -> RetryBudget {
        RetryBudget {
            attempts_made: 0,
            max_attempts: self.max_attempts,
        }
    }
}

/// Attempts consumed for a single command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryBudget {
    attempts_made: u32,
    max_attempts: u32,
}

impl RetryBudget {
    /// Consume one attempt, returning its 1-based number
    pub fn next_attempt(&mut self) -> Option<u32> {
        if self.is_exhausted() {
            return None;
        }
        self.attempts_made += 1;
        Some(self.attempts_made)
    }

    pub fn attempts_made(&self) -> u32 {
        self.attempts_made
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts_made >= self.max_attempts
    }
}

/// Carries out commands against the first media target its locators can find
pub struct ExecutionAdapter {
    locators: Vec<Box<dyn TargetLocator>>,
    policy: RetryPolicy,
}

impl ExecutionAdapter {
    /// Create an adapter that tries `locators` in order on every attempt
    pub fn new(locators: Vec<Box<dyn TargetLocator>>) -> Self {
        Self {
            locators,
            policy: RetryPolicy::default(),
        }
    }

    /// Answer a cross-context dispatch request
    pub async fn handle_request(
        &self,
        request: DispatchRequest,
    ) -> Result<DispatchResponse, RelayError> {
        if request.action != CONTROL_VIDEO_ACTION {
            warn!("Rejecting unsupported action {:?}", request.action);
            return Err(RelayError::UnsupportedAction(request.action));
        }
        self.try_execute(request.data).await?;
        Ok(DispatchResponse::success())
    }

    /// Run the attempt loop for one token; resolves exactly once
    async fn try_execute(&self, token: CommandToken) -> Result<(), RelayError> {
        let mut budget = self.policy.budget();
        let mut last_error = String::from("no attempt made");

        while let Some(attempt) = budget.next_attempt() {
            match self.attempt(token, attempt).await {
                Ok(()) => {
                    info!("{} succeeded on attempt {}", token, attempt);
                    return Ok(());
                }
                Err(e) => {
                    debug!("{}", e);
                    if let RelayError::ActionAttemptFailed { reason, .. } = e {
                        last_error = reason;
                    }
                }
            }

            if !budget.is_exhausted() {
                sleep(self.policy.delay_after(attempt)).await;
            }
        }

        Err(RelayError::RetryBudgetExhausted {
            attempts: budget.attempts_made(),
            last_error,
        })
    }

    async fn attempt(&self, token: CommandToken, attempt: u32) -> Result<(), RelayError> {
        let failed = |reason: String| RelayError::ActionAttemptFailed { attempt, reason };

        let target = self
            .locate()
            .await
            .ok_or_else(|| failed("no media element found".into()))?;

        match token {
            CommandToken::Pause => {
                target.pause().await.map_err(|e| failed(format!("pause: {:#}", e)))?;
                let paused = target
                    .is_paused()
                    .await
                    .map_err(|e| failed(format!("reading state: {:#}", e)))?;
                if paused {
                    Ok(())
                } else {
                    Err(failed("element still playing after pause".into()))
                }
            }
            CommandToken::Play => target.play().await.map_err(|e| failed(format!("play: {:#}", e))),
        }
    }

    /// Run every locator in order; the first hit wins
    async fn locate(&self) -> Option<Arc<dyn MediaTarget>> {
        for locator in &self.locators {
            if let Some(target) = locator.locate().await {
                debug!("Located media target via {}", locator.name());
                return Some(target);
            }
        }
        None
    }
}
