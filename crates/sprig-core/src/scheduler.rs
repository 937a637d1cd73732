//! Coalescing of node invalidations into update ticks.
//!
//! Any number of [`Scheduler::invalidate`] calls between two ticks produce a
//! single rebuild + layout + paint cycle. The tick itself is never run
//! inline: the scheduler posts [`RuntimeEvent::Tick`] onto the runtime queue,
//! so a burst of invalidations made while handling one event collapses into
//! one tick that runs after that handler returns.

use crate::event::RuntimeEvent;
use crate::view::NodeId;
use tokio::sync::mpsc;

/// Pending-tick flag plus the nodes invalidated since the last tick.
///
/// Owned by the runtime and only touched from its event queue.
#[derive(Debug)]
pub struct Scheduler {
    pending: bool,
    invalidated: Vec<NodeId>,
    queue: mpsc::UnboundedSender<RuntimeEvent>,
}

impl Scheduler {
    /// Create a scheduler that posts ticks onto `queue`.
    pub fn new(queue: mpsc::UnboundedSender<RuntimeEvent>) -> Self {
        Self {
            pending: false,
            invalidated: Vec::new(),
            queue,
        }
    }

    /// Record `node` for rebuild and make sure a tick is queued.
    ///
    /// A node already waiting for the next tick keeps its original position.
    pub fn invalidate(&mut self, node: NodeId) {
        if !self.invalidated.contains(&node) {
            self.invalidated.push(node);
        }
        self.schedule();
    }

    /// Queue a tick unless one is already pending.
    pub fn schedule(&mut self) {
        if self.pending {
            return;
        }
        self.pending = true;
        if self.queue.send(RuntimeEvent::Tick).is_err() {
            tracing::trace!("runtime queue closed, tick dropped");
        }
    }

    /// Whether a tick is queued and not yet taken.
    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// Start a tick: clear the pending flag and hand over the invalidated
    /// nodes.
    ///
    /// Returns `None` if no tick is pending, which happens when a resize cycle
    /// already consumed the work of a tick that is still sitting in the
    /// queue. Invalidations recorded after this call belong to the next tick.
    pub fn take(&mut self) -> Option<Vec<NodeId>> {
        if !self.pending {
            return None;
        }
        self.pending = false;
        Some(std::mem::take(&mut self.invalidated))
    }

    /// Hand out the recorded nodes regardless of the pending flag.
    ///
    /// Used by cycles that bypass coalescing (resize).
    pub fn drain(&mut self) -> Vec<NodeId> {
        self.pending = false;
        std::mem::take(&mut self.invalidated)
    }

    /// A non-owning handle the view tree can use to request rebuilds.
    pub fn handle(&self) -> UpdateHandle {
        UpdateHandle {
            queue: self.queue.downgrade(),
        }
    }
}

/// Capability to invalidate nodes from inside the view tree.
///
/// Holds only a weak reference to the runtime queue, so storing one in an
/// element never keeps the runtime alive. Cloning is cheap.
#[derive(Debug, Clone)]
pub struct UpdateHandle {
    queue: mpsc::WeakUnboundedSender<RuntimeEvent>,
}

impl UpdateHandle {
    /// Ask the runtime to rebuild `node` on its next tick.
    ///
    /// Returns `false` if the runtime has already shut down.
    pub fn invalidate(&self, node: NodeId) -> bool {
        match self.queue.upgrade() {
            Some(queue) => queue.send(RuntimeEvent::Invalidate(node)).is_ok(),
            None => false,
        }
    }

    /// Ask the runtime to re-query the window size and repaint.
    ///
    /// This is what the window-size signal watcher posts; it is exposed for
    /// hosts that learn about size changes some other way.
    pub fn resized(&self) -> bool {
        match self.queue.upgrade() {
            Some(queue) => queue.send(RuntimeEvent::Resize).is_ok(),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain_ticks(rx: &mut mpsc::UnboundedReceiver<RuntimeEvent>) -> usize {
        let mut ticks = 0;
        while let Ok(event) = rx.try_recv() {
            if event == RuntimeEvent::Tick {
                ticks += 1;
            }
        }
        ticks
    }

    #[test]
    fn invalidate_is_deferred() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut scheduler = Scheduler::new(tx);
        scheduler.invalidate(NodeId(1));
        assert!(scheduler.is_pending());
    }

    #[test]
    fn burst_of_invalidations_queues_one_tick() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut scheduler = Scheduler::new(tx);
        for _ in 0..5 {
            scheduler.invalidate(NodeId(7));
        }
        scheduler.invalidate(NodeId(3));
        assert_eq!(drain_ticks(&mut rx), 1);
        assert_eq!(scheduler.take(), Some(vec![NodeId(7), NodeId(3)]));
    }

    #[test]
    fn duplicate_keeps_first_position() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut scheduler = Scheduler::new(tx);
        scheduler.invalidate(NodeId(1));
        scheduler.invalidate(NodeId(2));
        scheduler.invalidate(NodeId(1));
        assert_eq!(scheduler.take(), Some(vec![NodeId(1), NodeId(2)]));
    }

    #[test]
    fn invalidation_after_take_starts_new_tick() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut scheduler = Scheduler::new(tx);
        scheduler.invalidate(NodeId(1));
        let first = scheduler.take();
        scheduler.invalidate(NodeId(1));

        assert_eq!(first, Some(vec![NodeId(1)]));
        assert_eq!(drain_ticks(&mut rx), 2);
        assert_eq!(scheduler.take(), Some(vec![NodeId(1)]));
    }

    #[test]
    fn take_without_pending_tick() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut scheduler = Scheduler::new(tx);
        assert_eq!(scheduler.take(), None);

        scheduler.invalidate(NodeId(4));
        assert_eq!(scheduler.drain(), vec![NodeId(4)]);
        assert_eq!(scheduler.take(), None);
    }

    #[test]
    fn handle_posts_invalidations() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let scheduler = Scheduler::new(tx);
        let handle = scheduler.handle();

        assert!(handle.invalidate(NodeId(9)));
        assert_eq!(rx.try_recv().ok(), Some(RuntimeEvent::Invalidate(NodeId(9))));
    }

    #[test]
    fn handle_does_not_keep_runtime_alive() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let scheduler = Scheduler::new(tx);
        let handle = scheduler.handle();
        drop(scheduler);

        assert!(!handle.invalidate(NodeId(1)));
    }
}
