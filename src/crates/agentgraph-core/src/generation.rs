//! Retry-bounded generation
//!
//! Agents that must *verify* what a model wrote (is the answer grounded in
//! the retrieved documents? does the query parse?) share one state machine:
//!
//! ```text
//!              ┌──────────────────────────────┐
//!              ▼                              │ rejected, attempts < max
//!   ──▶ GENERATE ──▶ GRADE ──┬── accepted ──▶ ACCEPT
//!                            │
//!                            ├── rejected, attempts == max ──▶ ABORT
//!                            └── grader failed ────────────────▶ ABORT
//! ```
//!
//! Every pass through GENERATE increments the attempt counter, so a loop
//! with a budget of `N` and a grader that never accepts generates exactly
//! `N` candidates.
//!
//! The machine is available in two forms:
//!
//! - [`GenerationLoop::run`] drives both steps in-process and returns a
//!   [`LoopOutcome`]
//! - [`route_grade`] is the pure routing decision for graphs that keep
//!   `generate` and `grade` as separate nodes and the counter in state
//!
//! # Exhaustion
//!
//! What happens at ABORT is a deployment decision, expressed as an
//! [`ExhaustionPolicy`]:
//!
//! | Policy | Result |
//! |--------|--------|
//! | `FailClosed` (default) | [`GraphError::RetryExhausted`] |
//! | `Degrade` | last candidate, marked [`Generation::Unverified`] |

use crate::error::{GraphError, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;

/// Attempts used when a budget is not configured
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Position in the generation state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoopState {
    Generate,
    Grade,
    Accept,
    Abort,
}

impl LoopState {
    pub fn is_terminal(self) -> bool {
        matches!(self, LoopState::Accept | LoopState::Abort)
    }
}

/// Verdict of a grader on one candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GradeDecision {
    Accept,
    Reject { reason: String },
}

impl GradeDecision {
    pub fn reject(reason: impl Into<String>) -> Self {
        GradeDecision::Reject { reason: reason.into() }
    }

    /// `Accept` when `accepted`, otherwise a rejection with `reason`
    pub fn from_bool(accepted: bool, reason: impl Into<String>) -> Self {
        if accepted {
            GradeDecision::Accept
        } else {
            Self::reject(reason)
        }
    }
}

/// Attempt counter with an upper bound
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryBudget {
    pub max_attempts: u32,
    pub attempts: u32,
}

impl Default for RetryBudget {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS)
    }
}

impl RetryBudget {
    /// A budget of at least one attempt
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            attempts: 0,
        }
    }

    /// Count one generation; returns the new attempt number
    pub fn record_attempt(&mut self) -> u32 {
        self.attempts += 1;
        self.attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    pub fn remaining(&self) -> u32 {
        self.max_attempts.saturating_sub(self.attempts)
    }
}

/// What to do when the budget runs out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExhaustionPolicy {
    /// Fail the run
    #[default]
    #[serde(alias = "fail")]
    FailClosed,
    /// Keep the last candidate, unverified
    Degrade,
}

/// Why a loop ended in ABORT
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    /// Every attempt was rejected; carries the last rejection
    Exhausted(String),
    /// The grader itself failed
    GraderFailed(String),
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AbortReason::Exhausted(reason) => write!(f, "{}", reason),
            AbortReason::GraderFailed(error) => write!(f, "grader failed: {}", error),
        }
    }
}

/// Terminal state of a [`GenerationLoop`]
#[derive(Debug, Clone, PartialEq)]
pub enum LoopOutcome<T> {
    Accepted { output: T, attempts: u32 },
    Aborted {
        last: Option<T>,
        attempts: u32,
        reason: AbortReason,
    },
}

/// A candidate after the exhaustion policy was applied
#[derive(Debug, Clone, PartialEq)]
pub enum Generation<T> {
    Verified(T),
    Unverified(T),
}

impl<T> Generation<T> {
    pub fn is_verified(&self) -> bool {
        matches!(self, Generation::Verified(_))
    }

    pub fn into_inner(self) -> T {
        match self {
            Generation::Verified(output) | Generation::Unverified(output) => output,
        }
    }
}

impl<T> LoopOutcome<T> {
    pub fn attempts(&self) -> u32 {
        match self {
            LoopOutcome::Accepted { attempts, .. } | LoopOutcome::Aborted { attempts, .. } => *attempts,
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, LoopOutcome::Accepted { .. })
    }

    /// Apply `policy` to an aborted loop
    ///
    /// A grader failure is an error under either policy.
    pub fn resolve(self, policy: ExhaustionPolicy) -> Result<Generation<T>> {
        match self {
            LoopOutcome::Accepted { output, .. } => Ok(Generation::Verified(output)),
            LoopOutcome::Aborted {
                last: Some(last),
                reason: AbortReason::Exhausted(_),
                ..
            } if policy == ExhaustionPolicy::Degrade => Ok(Generation::Unverified(last)),
            LoopOutcome::Aborted { attempts, reason, .. } => Err(GraphError::RetryExhausted {
                attempts,
                reason: reason.to_string(),
            }),
        }
    }
}

/// Where a graph router sends a graded candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GradeRoute {
    Accept,
    Retry,
    Exhausted,
}

impl GradeRoute {
    /// Branch label used by routers in this workspace
    pub fn label(self) -> &'static str {
        match self {
            GradeRoute::Accept => "accept",
            GradeRoute::Retry => "retry",
            GradeRoute::Exhausted => "exhausted",
        }
    }
}

/// Route a graded candidate
///
/// `attempts` is the number of generations so far, including the one just
/// graded.
pub fn route_grade(attempts: u32, grounded: bool, max_attempts: u32) -> GradeRoute {
    if grounded {
        GradeRoute::Accept
    } else if attempts < max_attempts {
        GradeRoute::Retry
    } else {
        GradeRoute::Exhausted
    }
}

/// Driver for GENERATE → GRADE cycles
#[derive(Debug, Clone)]
pub struct GenerationLoop {
    budget: RetryBudget,
    state: LoopState,
}

impl Default for GenerationLoop {
    fn default() -> Self {
        Self::new(RetryBudget::default())
    }
}

impl GenerationLoop {
    pub fn new(budget: RetryBudget) -> Self {
        Self {
            budget,
            state: LoopState::Generate,
        }
    }

    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self::new(RetryBudget::new(max_attempts))
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn budget(&self) -> RetryBudget {
        self.budget
    }

    /// Run until ACCEPT or ABORT
    ///
    /// `generate` receives the 1-based attempt number and `grade` the
    /// candidate. An error from `generate` is returned as is; an error from
    /// `grade` aborts the loop.
    pub async fn run<T, G, GFut, R, RFut>(&mut self, mut generate: G, mut grade: R) -> Result<LoopOutcome<T>>
    where
        G: FnMut(u32) -> GFut,
        GFut: Future<Output = Result<T>>,
        R: FnMut(&T) -> RFut,
        RFut: Future<Output = Result<GradeDecision>>,
    {
        loop {
            self.state = LoopState::Generate;
            let attempt = self.budget.record_attempt();
            let candidate = generate(attempt).await?;

            self.state = LoopState::Grade;
            let decision = match grade(&candidate).await {
                Ok(decision) => decision,
                Err(err) => {
                    tracing::warn!(attempt, error = %err, "grader failed, aborting generation");
                    self.state = LoopState::Abort;
                    return Ok(LoopOutcome::Aborted {
                        last: Some(candidate),
                        attempts: attempt,
                        reason: AbortReason::GraderFailed(err.to_string()),
                    });
                }
            };

            let (accepted, reason) = match decision {
                GradeDecision::Accept => (true, String::new()),
                GradeDecision::Reject { reason } => (false, reason),
            };
            match route_grade(attempt, accepted, self.budget.max_attempts) {
                GradeRoute::Accept => {
                    tracing::debug!(attempt, "candidate accepted");
                    self.state = LoopState::Accept;
                    return Ok(LoopOutcome::Accepted {
                        output: candidate,
                        attempts: attempt,
                    });
                }
                GradeRoute::Retry => {
                    tracing::debug!(attempt, reason = %reason, "candidate rejected, regenerating");
                }
                GradeRoute::Exhausted => {
                    tracing::warn!(attempt, reason = %reason, "generation budget exhausted");
                    self.state = LoopState::Abort;
                    return Ok(LoopOutcome::Aborted {
                        last: Some(candidate),
                        attempts: attempt,
                        reason: AbortReason::Exhausted(reason),
                    });
                }
            }
        }
    }
}
