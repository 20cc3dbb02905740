// src/motion/scheduler.rs - Interface to the primary motion scheduler (toolhead)
use async_trait::async_trait;

/// Name of an auxiliary actuator, as configured.
pub type ActuatorId = String;

/// Work deferred until the primary scheduler has committed its lookahead.
#[derive(Debug, Clone, PartialEq)]
pub enum DeferredCommand {
    /// Drain the head batch of an actuator's pending queue.
    CommitBatch,
    /// Apply a servo pulse width.
    SetWidth(f64),
}

/// A one-shot lookahead callback, addressed to an actuator.
#[derive(Debug, Clone, PartialEq)]
pub struct LookaheadTicket {
    pub actuator: ActuatorId,
    pub command: DeferredCommand,
}

impl LookaheadTicket {
    pub fn new(actuator: impl Into<ActuatorId>, command: DeferredCommand) -> Self {
        Self {
            actuator: actuator.into(),
            command,
        }
    }
}

/// A ticket whose commit point has been reached.
#[derive(Debug, Clone, PartialEq)]
pub struct FiredCallback {
    pub ticket: LookaheadTicket,
    pub print_time: f64,
}

/// Outcome of registering a lookahead callback.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Registration {
    /// The ticket will be delivered later as a [`FiredCallback`].
    Deferred,
    /// Nothing was pending; the caller should run the command now.
    Immediate { print_time: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BusyStatus {
    pub print_time: f64,
    pub estimated_print_time: f64,
    pub lookahead_empty: bool,
}

/// The primary scheduler as seen by auxiliary actuators.
///
/// Callbacks are never closures: a registered [`LookaheadTicket`] comes back
/// to its owner as a [`FiredCallback`]. Tickets fired while the scheduler
/// commits lookahead are kept in an outbox until [`take_fired`] drains them.
///
/// [`take_fired`]: PrimaryScheduler::take_fired
#[async_trait(?Send)]
pub trait PrimaryScheduler {
    /// Time at which the last committed primary move ends. Commits lookahead.
    fn last_move_time(&mut self) -> f64;
    /// Inserts a pause of `delay` seconds into the primary timeline.
    fn dwell(&mut self, delay: f64);
    fn check_busy(&self, eventtime: f64) -> BusyStatus;
    /// Running count of primary moves accepted into lookahead.
    fn queued_move_count(&self) -> u64;
    fn register_lookahead_callback(&mut self, ticket: LookaheadTicket) -> Registration;
    /// Commits all lookahead; fired tickets land in the outbox.
    fn flush_lookahead(&mut self);
    /// Drains fired tickets in firing order.
    fn take_fired(&mut self) -> Vec<FiredCallback>;
    fn note_kinematic_activity(&mut self, print_time: f64);
    fn kin_flush_delay(&self) -> f64;
    /// Reactor clock.
    fn monotonic(&self) -> f64;
    /// Suspends until the committed timeline has reached `print_time`.
    async fn wait_print_time(&mut self, print_time: f64);
}
