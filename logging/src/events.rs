//! Structured event types logged by actor and topology code, analogous to
//! the teacher's `OperatesEvent`/`ScheduleEvent`/`ShutdownEvent`.
//!
//! These are the raw material `queryJSONStats` reduces over; nothing here
//! does any aggregation itself.

/// Logged once per `work()` invocation.
#[derive(Debug, Clone)]
pub struct WorkEvent {
    /// Uid of the actor that ran `work()`.
    pub actor_uid: u64,
    /// Elements consumed from each input port, indexed by port position.
    pub consumed: Vec<u64>,
    /// Elements produced on each output port, indexed by port position.
    pub produced: Vec<u64>,
}

/// Logged whenever the scheduler transitions an actor's run state.
#[derive(Debug, Clone)]
pub struct ScheduleEvent {
    /// Uid of the actor transitioning.
    pub actor_uid: u64,
    /// Human-readable state name (`"Active"`, `"Inactive"`, `"Faulted"`, ...).
    pub state: &'static str,
}

/// Logged once when a topology's `commit()` completes.
#[derive(Debug, Clone)]
pub struct CommitEvent {
    /// Number of actors created by this commit.
    pub actor_count: usize,
    /// Number of edges wired by this commit.
    pub edge_count: usize,
}

/// Logged when a port gains or loses a subscriber.
#[derive(Debug, Clone)]
pub struct SubscribeEvent {
    /// Uid of the actor owning the port.
    pub actor_uid: u64,
    /// Index of the output port.
    pub port_index: usize,
    /// Whether this is a subscribe (`true`) or unsubscribe (`false`).
    pub subscribed: bool,
}
