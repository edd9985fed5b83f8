//! Ordered fallback over uncertain UI actions.
//!
//! Automated front ends move their controls around. Instead of hard-coding
//! one way to find a button, callers list several [`ActionStrategy`] probes
//! and the [`FallbackExecutor`] tries them in order until one reports success.

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;

use futures::FutureExt;
use tracing::{debug, info, warn};

use super::truncate_diagnostic;

/// Boxed future returned by a strategy attempt.
pub type AttemptFuture<'a> = Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + 'a>>;

type AttemptFn<'a> = Box<dyn Fn() -> AttemptFuture<'a> + Send + Sync + 'a>;

/// A named, side-effecting probe that reports whether it believes it succeeded.
pub struct ActionStrategy<'a> {
    name: String,
    attempt: AttemptFn<'a>,
}

impl<'a> ActionStrategy<'a> {
    /// Wrap an async closure as a strategy.
    ///
    /// The closure may borrow from the caller; it is invoked at most once
    /// per [`FallbackExecutor::run`].
    pub fn new<F, Fut>(name: impl Into<String>, attempt: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'a,
        Fut: Future<Output = anyhow::Result<bool>> + Send + 'a,
    {
        Self {
            name: name.into(),
            attempt: Box::new(move || Box::pin(attempt())),
        }
    }

    /// Strategy name used in logs and outcomes.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for ActionStrategy<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionStrategy")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Why one strategy did not succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyFailure {
    /// Strategy name.
    pub strategy: String,
    /// Truncated diagnostic.
    pub reason: String,
}

/// Result of one [`FallbackExecutor::run`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FallbackOutcome {
    /// Whether any strategy succeeded.
    pub succeeded: bool,
    /// Name of the strategy that succeeded.
    pub used_strategy: Option<String>,
    /// Strategies that were tried and did not succeed, in order.
    pub failures: Vec<StrategyFailure>,
}

/// Runs strategies in caller order until the first success.
#[derive(Debug, Clone, Copy)]
pub struct FallbackExecutor {
    goal: &'static str,
}

impl FallbackExecutor {
    /// Executor labelled with the goal it serves, e.g. `"send-button"`.
    pub fn new(goal: &'static str) -> Self {
        Self { goal }
    }

    /// The goal label.
    pub fn goal(&self) -> &'static str {
        self.goal
    }

    /// Try each strategy once, in order, stopping at the first that returns
    /// `Ok(true)`.
    ///
    /// Errors and panics inside a strategy count as failure and never abort
    /// the chain. Strategies after the successful one are not invoked.
    pub async fn run(&self, strategies: &[ActionStrategy<'_>]) -> FallbackOutcome {
        let mut failures = Vec::new();

        for strategy in strategies {
            debug!(goal = self.goal, strategy = %strategy.name, "trying strategy");

            let reason = match Self::attempt(strategy).await {
                Ok(true) => {
                    info!(goal = self.goal, strategy = %strategy.name, "strategy succeeded");
                    return FallbackOutcome {
                        succeeded: true,
                        used_strategy: Some(strategy.name.clone()),
                        failures,
                    };
                }
                Ok(false) => "reported no success".to_owned(),
                Err(reason) => reason,
            };

            warn!(goal = self.goal, strategy = %strategy.name, reason = %reason, "strategy failed");
            failures.push(StrategyFailure {
                strategy: strategy.name.clone(),
                reason,
            });
        }

        warn!(goal = self.goal, tried = failures.len(), "all strategies failed");
        FallbackOutcome {
            succeeded: false,
            used_strategy: None,
            failures,
        }
    }

    async fn attempt(strategy: &ActionStrategy<'_>) -> Result<bool, String> {
        let future = std::panic::catch_unwind(AssertUnwindSafe(|| (strategy.attempt)()))
            .map_err(|_| "panicked".to_owned())?;
        match AssertUnwindSafe(future).catch_unwind().await {
            Ok(Ok(done)) => Ok(done),
            Ok(Err(e)) => Err(truncate_diagnostic(&e.to_string())),
            Err(_) => Err("panicked".to_owned()),
        }
    }
}
