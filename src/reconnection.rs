use crate::supervisor::Event;
use crate::timer::ScheduledTask;
use std::time::Duration;
use tokio::sync::mpsc;

enum ReconnectionState {
    Inactive,
    Waiting {
        generation: u64,
        _timer: ScheduledTask,
    },
    Probing {
        generation: u64,
        _task: ScheduledTask,
    },
}

/// What the supervisor should do after a recovery probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReconnectionVerdict {
    /// Primary is back; restore it
    PrimaryRecovered,
    /// Primary still down; next probe is scheduled
    StillDown,
    /// Outcome from a cancelled loop, ignore
    Stale,
}

/// Unbounded watch for primary recovery while a backup is bound.
///
/// Never gives up on its own; it stops only when the primary answers or the
/// supervisor cancels it.
pub(crate) struct Reconnection {
    state: ReconnectionState,
    generation: u64,
    interval: Duration,
}

impl Reconnection {
    pub(crate) fn new(interval: Duration) -> Self {
        Self {
            state: ReconnectionState::Inactive,
            generation: 0,
            interval,
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        !matches!(self.state, ReconnectionState::Inactive)
    }

    /// Arm the first probe. No-op if already running.
    pub(crate) fn start(&mut self, events: &mpsc::UnboundedSender<Event>) {
        if !self.is_active() {
            self.arm(events);
        }
    }

    fn arm(&mut self, events: &mpsc::UnboundedSender<Event>) {
        self.generation += 1;
        let generation = self.generation;
        let timer = ScheduledTask::after(
            self.interval,
            events.clone(),
            Event::ReconnectionDue { generation },
        );
        self.state = ReconnectionState::Waiting {
            generation,
            _timer: timer,
        };
    }

    /// Timer fired: move to probing. `false` for a stale timer.
    pub(crate) fn fire(
        &mut self,
        generation: u64,
        start_probe: impl FnOnce(u64) -> ScheduledTask,
    ) -> bool {
        match self.state {
            ReconnectionState::Waiting { generation: g, .. } if g == generation => {
                self.state = ReconnectionState::Probing {
                    generation,
                    _task: start_probe(generation),
                };
                true
            }
            _ => false,
        }
    }

    /// Apply a probe outcome; failure re-arms unconditionally.
    pub(crate) fn complete(
        &mut self,
        generation: u64,
        ok: bool,
        events: &mpsc::UnboundedSender<Event>,
    ) -> ReconnectionVerdict {
        match self.state {
            ReconnectionState::Probing { generation: g, .. } if g == generation => {}
            _ => return ReconnectionVerdict::Stale,
        }

        if ok {
            self.state = ReconnectionState::Inactive;
            ReconnectionVerdict::PrimaryRecovered
        } else {
            self.arm(events);
            ReconnectionVerdict::StillDown
        }
    }

    pub(crate) fn cancel(&mut self) {
        self.state = ReconnectionState::Inactive;
    }
}
