//! Interval-driven status polling.
//!
//! A [`Poller`] runs one background task that calls a query function on a
//! fixed interval until the result is terminal, the attempt budget runs out,
//! the query reports a fatal error, or the handle is stopped.
//!
//! Queries never overlap. The next tick is only awaited after the previous
//! query returns, and ticks missed while a slow query was running are skipped
//! rather than replayed.

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Polling cadence and budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollConfig {
    /// Time between the starts of consecutive queries
    pub interval: Duration,
    /// Maximum number of queries, clamped to at least one
    pub max_attempts: u32,
    /// Issue the first query right away instead of after one interval
    pub immediate: bool,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(3000),
            max_attempts: 60,
            immediate: true,
        }
    }
}

/// A failed query, classified by the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryError<E> {
    /// Counts toward `max_attempts`; polling continues.
    Transient(E),
    /// Stops polling immediately.
    Fatal(E),
}

/// How a polling run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome<S, E> {
    /// The query returned a terminal value.
    Terminal(S),
    /// `max_attempts` queries ran without a terminal value.
    TimedOut { attempts: u32, last_error: Option<E> },
    /// The query reported a fatal error.
    Aborted(E),
    /// The handle was stopped (or its token cancelled) first.
    Stopped,
    /// The query panicked.
    Crashed(String),
}

type TerminalFn<S> = Arc<dyn Fn(&S) -> bool + Send + Sync>;

/// Reusable polling policy.
pub struct Poller<S> {
    config: PollConfig,
    is_terminal: TerminalFn<S>,
}

impl<S> Clone for Poller<S> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            is_terminal: self.is_terminal.clone(),
        }
    }
}

impl<S: Send + 'static> Poller<S> {
    pub fn new(
        config: PollConfig,
        is_terminal: impl Fn(&S) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            config,
            is_terminal: Arc::new(is_terminal),
        }
    }

    pub fn config(&self) -> &PollConfig {
        &self.config
    }

    /// Start polling with a fresh cancellation token.
    pub fn start<E, F, Fut>(&self, query_fn: F) -> PollHandle<S, E>
    where
        E: Send + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<S, QueryError<E>>> + Send + 'static,
    {
        self.start_with_token(CancellationToken::new(), query_fn)
    }

    /// Start polling, stopping when `cancel` fires.
    ///
    /// Pass a child token to tie the run to a wider scope.
    pub fn start_with_token<E, F, Fut>(
        &self,
        cancel: CancellationToken,
        mut query_fn: F,
    ) -> PollHandle<S, E>
    where
        E: Send + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<S, QueryError<E>>> + Send + 'static,
    {
        let config = self.config.clone();
        let is_terminal = self.is_terminal.clone();
        let queries = Arc::new(AtomicU32::new(0));

        let task_cancel = cancel.clone();
        let task_queries = queries.clone();

        let task = tokio::spawn(async move {
            let max_attempts = config.max_attempts.max(1);
            // tokio::time::interval panics on a zero period
            let period = config.interval.max(Duration::from_millis(1));
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            if !config.immediate {
                // First tick of an interval completes at once.
                ticker.tick().await;
            }

            let mut attempts = 0u32;
            let mut last_error = None;

            loop {
                tokio::select! {
                    biased;
                    _ = task_cancel.cancelled() => return PollOutcome::Stopped,
                    _ = ticker.tick() => {}
                }

                attempts += 1;
                task_queries.fetch_add(1, Ordering::SeqCst);

                let result = tokio::select! {
                    biased;
                    _ = task_cancel.cancelled() => return PollOutcome::Stopped,
                    result = query_fn() => result,
                };

                match result {
                    Ok(value) if is_terminal(&value) => return PollOutcome::Terminal(value),
                    Ok(_) => last_error = None,
                    Err(QueryError::Fatal(e)) => return PollOutcome::Aborted(e),
                    Err(QueryError::Transient(e)) => {
                        tracing::debug!(attempt = attempts, "Poll query failed, will retry");
                        last_error = Some(e);
                    }
                }

                if attempts >= max_attempts {
                    return PollOutcome::TimedOut {
                        attempts,
                        last_error,
                    };
                }
            }
        });

        PollHandle {
            cancel,
            queries,
            task: Some(task),
        }
    }
}

/// Handle to a running poll.
///
/// Dropping the handle stops the poll.
pub struct PollHandle<S, E> {
    cancel: CancellationToken,
    queries: Arc<AtomicU32>,
    task: Option<JoinHandle<PollOutcome<S, E>>>,
}

impl<S, E> PollHandle<S, E> {
    /// Stop polling. Safe to call any number of times.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Number of queries issued so far.
    pub fn queries(&self) -> u32 {
        self.queries.load(Ordering::SeqCst)
    }

    /// Wait for the run to end.
    pub async fn outcome(mut self) -> PollOutcome<S, E> {
        let Some(task) = self.task.take() else {
            return PollOutcome::Stopped;
        };
        match task.await {
            Ok(outcome) => outcome,
            Err(e) if e.is_panic() => {
                tracing::error!("Poll task panicked: {}", e);
                PollOutcome::Crashed(e.to_string())
            }
            Err(e) => {
                tracing::debug!("Poll task cancelled: {}", e);
                PollOutcome::Stopped
            }
        }
    }
}

impl<S, E> Drop for PollHandle<S, E> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
