//! Reply Merger - folds both scheduler replies into one simulator reply.

use crate::message::Batch;

/// Merges the outgoing replies of System A and System B.
///
/// Events keep their per-source order, A's first. The clock is the later of
/// the two. Both replies must already be free of handoff events.
pub fn merge(reply_a: Batch, reply_b: Batch) -> Batch {
    debug_assert!(
        reply_a.events.iter().chain(&reply_b.events).all(|e| !e.is_internal()),
        "handoff events must be stripped before merging"
    );

    let now = reply_a.now.max(reply_b.now);
    let mut events = reply_a.events;
    events.extend(reply_b.events);

    Batch::new(now, events)
}
