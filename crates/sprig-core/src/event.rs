use crate::view::NodeId;

/// Work items delivered onto the runtime's single event queue.
///
/// Every asynchronous source (the stdin reader thread, the window-size signal
/// watcher, [`UpdateHandle`]s held by the view tree, the scheduler itself)
/// posts one of these onto the same unbounded channel, so handlers never run
/// concurrently with each other or with an update tick.
///
/// [`UpdateHandle`]: crate::scheduler::UpdateHandle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeEvent {
    /// One chunk of raw bytes, as returned by a single read of the device.
    Input(Vec<u8>),
    /// The input device reached end of file or failed.
    InputClosed,
    /// A node asked to be rebuilt.
    Invalidate(NodeId),
    /// A coalesced update tick is due.
    Tick,
    /// The window size changed.
    Resize,
}
