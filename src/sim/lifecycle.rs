//! Admission and lifecycle control: disconnect, queue, promote, admit.

use chrono::NaiveDateTime;
use tracing::debug;

use super::queue::WaitingQueue;
use super::registry::SessionRegistry;
use super::session::{ChargingSession, RejectReason, SessionId};
use super::tree::CapacityTree;
use super::types::OperatingHours;

/// Per-step session state machine.
///
/// Owns the waiting queue; outlet occupancy lives in the [`SessionRegistry`].
#[derive(Debug, Clone)]
pub struct LifecycleController {
    queue: WaitingQueue,
    disconnect_by_time: bool,
    hours: Option<OperatingHours>,
}

impl LifecycleController {
    /// # Arguments
    ///
    /// * `queue_length` - Waiting places; 0 rejects whenever all outlets are busy
    /// * `disconnect_by_time` - Leave only at the scheduled time, ignoring the SOC target
    /// * `hours` - Optional daily opening interval
    pub fn new(
        queue_length: usize,
        disconnect_by_time: bool,
        hours: Option<OperatingHours>,
    ) -> Self {
        Self {
            queue: WaitingQueue::new(queue_length),
            disconnect_by_time,
            hours,
        }
    }

    pub fn queue(&self) -> &WaitingQueue {
        &self.queue
    }

    /// Whether the site serves vehicles during the step starting at `t`.
    pub fn is_open(&self, t: NaiveDateTime) -> bool {
        self.hours.is_none_or(|h| h.is_open(t))
    }

    fn should_depart(&self, session: &ChargingSession, t: NaiveDateTime) -> bool {
        t >= session.scheduled_leave_time()
            || (!self.disconnect_by_time && session.target_reached())
    }

    /// Runs the start-of-step transitions for the step `[start, end)`.
    ///
    /// Order: disconnect (including closing time), queue expiry, promotion
    /// from the queue, then admission of new arrivals.
    pub fn begin_step(
        &mut self,
        registry: &mut SessionRegistry,
        tree: &CapacityTree,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) {
        let open = self.is_open(start);

        // 1. Disconnect
        let connected: Vec<SessionId> = registry.connected().map(|s| s.id).collect();
        for id in connected {
            if !open || self.should_depart(registry.get(id), start) {
                registry.disconnect(id, start);
                debug!(session = %id, time = %start, closed = !open, "disconnect");
            }
        }
        if !open {
            for id in self.queue.drain() {
                registry.reject(id, RejectReason::SiteClosed, start);
                debug!(session = %id, "site closed, leaving queue");
            }
        }

        // 2. Queue expiry
        let expired = self
            .queue
            .remove_where(|id| start >= registry.get(id).scheduled_leave_time());
        for id in expired {
            registry.reject(id, RejectReason::LeftQueue, start);
            debug!(session = %id, "leave time passed while queued");
        }

        // 3. Promote
        while !self.queue.is_empty() {
            let Some(outlet) = registry.first_free_outlet(tree) else {
                break;
            };
            let Some(id) = self.queue.pop() else {
                break;
            };
            registry.connect(id, outlet, start);
            debug!(session = %id, outlet = %tree.node(outlet).name, "connect from queue");
        }

        // 4. Admit
        for id in registry.take_arrivals(end) {
            if !open {
                registry.reject(id, RejectReason::SiteClosed, start);
                debug!(session = %id, "reject: site closed");
            } else if let Some(outlet) = registry.first_free_outlet(tree) {
                registry.connect(id, outlet, start);
                debug!(session = %id, outlet = %tree.node(outlet).name, "connect");
            } else if self.queue.push(id) {
                registry.enqueue(id);
                debug!(session = %id, waiting = self.queue.len(), "enqueue");
            } else {
                registry.reject(id, RejectReason::QueueFull, start);
                debug!(session = %id, "reject: queue full");
            }
        }
    }

    /// Re-checks departures once energy for the step has been applied.
    ///
    /// `at` is the end of the step; the start-of-step check of the next step
    /// sees the same state, so running both is idempotent.
    pub fn end_step(&mut self, registry: &mut SessionRegistry, at: NaiveDateTime) {
        let leaving: Vec<SessionId> = registry
            .connected()
            .filter(|s| self.should_depart(s, at))
            .map(|s| s.id)
            .collect();
        for id in leaving {
            registry.disconnect(id, at);
            debug!(session = %id, time = %at, "disconnect");
        }
    }
}
