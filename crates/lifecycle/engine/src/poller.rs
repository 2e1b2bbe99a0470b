//! Async operation poller.
//!
//! A pure state machine (`Polling -> Done | Failed | TimedOut`) driven by a
//! cancellable ticker. The machine can be stepped by hand, or run to a
//! terminal state with [`AsyncOperationPoller::poll`].

use std::sync::Arc;
use std::time::Duration;

use lifecycle_types::{AsyncContract, Observation, OperationStatus, ResourceDescriptor};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::cancel::{CancelToken, Interruption};
use crate::client::{OperationHandle, ResourceClient};

/// Poller state.
#[derive(Debug, Clone, PartialEq)]
pub enum PollState {
    Polling { polls: u32 },
    Done { polls: u32 },
    Failed { message: String, retryable: bool },
    TimedOut { elapsed: Duration },
}

impl PollState {
    pub fn start() -> Self {
        PollState::Polling { polls: 0 }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, PollState::Polling { .. })
    }

    /// Advance by one tick.
    ///
    /// `observation` is `None` when the tick could not observe anything
    /// (a transient query error); the machine then only checks the timeout.
    pub fn advance(
        self,
        contract: &AsyncContract,
        observation: Option<&Observation>,
        elapsed: Duration,
    ) -> PollState {
        let polls = match self {
            PollState::Polling { polls } => polls + 1,
            terminal => return terminal,
        };

        if let Some(observation) = observation {
            if contract.done_when.holds(observation) {
                return PollState::Done { polls };
            }
            if contract.failed_when.holds(observation) {
                let (message, retryable) = match &observation.operation {
                    Some(OperationStatus::Failed { message, retryable }) => {
                        (message.clone(), *retryable)
                    }
                    _ => (
                        format!("resource entered {}", observation.state.provisioning),
                        true,
                    ),
                };
                return PollState::Failed { message, retryable };
            }
        }

        if elapsed >= contract.timeout {
            PollState::TimedOut { elapsed }
        } else {
            PollState::Polling { polls }
        }
    }
}

/// How polling ended.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Succeeded { polls: u32 },
    Failed { message: String, retryable: bool },
    /// Not finished within the window; likely still running in the background.
    TimedOut { elapsed: Duration },
    Cancelled(Interruption),
}

/// Polls one operation until its contract resolves.
pub struct AsyncOperationPoller {
    client: Arc<dyn ResourceClient>,
    default_interval: Duration,
}

impl AsyncOperationPoller {
    pub fn new(client: Arc<dyn ResourceClient>, default_interval: Duration) -> Self {
        Self {
            client,
            default_interval,
        }
    }

    /// Poll `handle` for `target`. Observes immediately, then once per
    /// interval; cancellation and the run deadline are checked between ticks.
    pub async fn poll(
        &self,
        handle: &OperationHandle,
        target: &ResourceDescriptor,
        contract: &AsyncContract,
        cancel: &CancelToken,
    ) -> PollOutcome {
        let interval = contract.poll_interval.unwrap_or(self.default_interval);
        let started = Instant::now();
        let mut state = PollState::start();

        loop {
            let observation = match self.observe(handle, target).await {
                Ok(observation) => observation,
                Err(PollState::Failed { message, retryable }) => {
                    return PollOutcome::Failed { message, retryable };
                }
                Err(_) => None,
            };

            state = state.advance(contract, observation.as_ref(), started.elapsed());
            match &state {
                PollState::Done { polls } => {
                    debug!(operation = %handle, polls = *polls, "Operation completed");
                    return PollOutcome::Succeeded { polls: *polls };
                }
                PollState::Failed { message, retryable } => {
                    return PollOutcome::Failed {
                        message: message.clone(),
                        retryable: *retryable,
                    };
                }
                PollState::TimedOut { elapsed } => {
                    warn!(
                        operation = %handle,
                        elapsed_secs = elapsed.as_secs(),
                        "Operation still in progress after poll window"
                    );
                    return PollOutcome::TimedOut { elapsed: *elapsed };
                }
                PollState::Polling { polls } => {
                    debug!(operation = %handle, polls = *polls, "Operation in progress");
                }
            }

            let remaining = contract.timeout.saturating_sub(started.elapsed());
            if let Err(reason) = cancel.sleep(interval.min(remaining)).await {
                return PollOutcome::Cancelled(reason);
            }
        }
    }

    // Ok(None) means a transient error; Err carries a permanent failure.
    async fn observe(
        &self,
        handle: &OperationHandle,
        target: &ResourceDescriptor,
    ) -> Result<Option<Observation>, PollState> {
        let status = match self.client.poll_operation(handle).await {
            Ok(status) => status,
            Err(e) if e.is_transient() => {
                warn!(operation = %handle, error = %e, "Transient poll error");
                return Ok(None);
            }
            Err(e) => {
                return Err(PollState::Failed {
                    message: e.to_string(),
                    retryable: false,
                })
            }
        };
        match self.client.get(target).await {
            Ok(state) => Ok(Some(Observation::polled(state, status))),
            Err(e) if e.is_transient() => {
                warn!(target = %target.key(), error = %e, "Transient read error while polling");
                Ok(None)
            }
            Err(e) => Err(PollState::Failed {
                message: e.to_string(),
                retryable: false,
            }),
        }
    }
}
