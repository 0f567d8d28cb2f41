use crate::supervisor::Event;
use crate::timer::ScheduledTask;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// Where a diagnosis cycle currently is
#[cfg(test)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DiagnosisPhase {
    Idle,
    Scheduled,
    Probing,
}

/// The timer or probe task is owned by the state it belongs to, so leaving
/// that state cancels it.
enum DiagnosisState {
    Idle,
    Scheduled {
        generation: u64,
        _timer: ScheduledTask,
    },
    Probing {
        generation: u64,
        _task: ScheduledTask,
    },
}

/// What the supervisor should do after a diagnosis probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DiagnosisVerdict {
    /// Primary answered; cycle over
    Healthy,
    /// Primary failed; another attempt is scheduled
    Retry { retries: u32 },
    /// Every attempt failed; fail over
    Escalate,
    /// Outcome from a cancelled cycle, ignore
    Stale,
}

/// Bounded-retry check of the primary origin after a network-issue report.
///
/// `Idle -> Scheduled -> Probing -> {Idle | Scheduled | Idle+Escalate}`.
pub(crate) struct Diagnosis {
    state: DiagnosisState,
    retry_count: u32,
    generation: u64,
    delay: Duration,
    max_attempts: u32,
}

impl Diagnosis {
    pub(crate) fn new(delay: Duration, max_attempts: u32) -> Self {
        Self {
            state: DiagnosisState::Idle,
            retry_count: 0,
            generation: 0,
            delay,
            max_attempts,
        }
    }

    #[cfg(test)]
    pub(crate) fn phase(&self) -> DiagnosisPhase {
        match self.state {
            DiagnosisState::Idle => DiagnosisPhase::Idle,
            DiagnosisState::Scheduled { .. } => DiagnosisPhase::Scheduled,
            DiagnosisState::Probing { .. } => DiagnosisPhase::Probing,
        }
    }

    pub(crate) fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Start a cycle. Returns `false` if one is already running.
    pub(crate) fn trigger(&mut self, events: &mpsc::UnboundedSender<Event>) -> bool {
        if !matches!(self.state, DiagnosisState::Idle) {
            return false;
        }
        self.schedule(events);
        true
    }

    fn schedule(&mut self, events: &mpsc::UnboundedSender<Event>) {
        self.generation += 1;
        let generation = self.generation;
        let timer = ScheduledTask::after(
            self.delay,
            events.clone(),
            Event::DiagnosisDue { generation },
        );
        self.state = DiagnosisState::Scheduled {
            generation,
            _timer: timer,
        };
    }

    /// Timer fired: move to `Probing` with the task from `start_probe`.
    ///
    /// Returns `false` for a timer that no longer belongs to this cycle.
    pub(crate) fn fire(
        &mut self,
        generation: u64,
        start_probe: impl FnOnce(u64) -> ScheduledTask,
    ) -> bool {
        match self.state {
            DiagnosisState::Scheduled { generation: g, .. } if g == generation => {
                self.state = DiagnosisState::Probing {
                    generation,
                    _task: start_probe(generation),
                };
                true
            }
            _ => false,
        }
    }

    /// Apply a probe outcome.
    pub(crate) fn complete(
        &mut self,
        generation: u64,
        ok: bool,
        events: &mpsc::UnboundedSender<Event>,
    ) -> DiagnosisVerdict {
        match self.state {
            DiagnosisState::Probing { generation: g, .. } if g == generation => {}
            _ => return DiagnosisVerdict::Stale,
        }

        if ok {
            self.state = DiagnosisState::Idle;
            self.retry_count = 0;
            return DiagnosisVerdict::Healthy;
        }

        if self.retry_count + 1 >= self.max_attempts {
            debug!(
                "[DIAGNOSIS] Attempt {}/{} failed, escalating",
                self.retry_count + 1,
                self.max_attempts
            );
            self.state = DiagnosisState::Idle;
            self.retry_count = 0;
            DiagnosisVerdict::Escalate
        } else {
            self.retry_count += 1;
            self.schedule(events);
            DiagnosisVerdict::Retry {
                retries: self.retry_count,
            }
        }
    }

    /// Drop any pending timer or probe and reset.
    pub(crate) fn cancel(&mut self) {
        self.state = DiagnosisState::Idle;
        self.retry_count = 0;
    }
}
