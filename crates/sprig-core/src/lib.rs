//! Core runtime for the **sprig** terminal UI toolkit.
//!
//! `sprig-core` owns the terminal while an application runs. It puts the
//! device into raw mode, decodes the bytes typed at it into key events,
//! routes those keys to whichever element holds focus, and coalesces
//! invalidation requests into a single rebuild-layout-repaint cycle per
//! turn of the event loop. The element tree itself lives outside this crate
//! and is reached through the [`FocusGraph`] and [`RenderPipeline`] traits.
//!
//! # Key types
//!
//! | Type | Purpose |
//! |------|---------|
//! | [`Application`] | Drives a [`View`] from the terminal's input and window-size events |
//! | [`KeyEvent`] | A decoded key plus its [`Modifiers`] |
//! | [`TerminalSession`] | Raw-mode ownership of a [`TerminalDevice`], restored on release |
//! | [`Scheduler`] | Coalesces invalidated nodes into one pending update |
//! | [`UpdateHandle`] | Non-owning way for a view to invalidate nodes from anywhere |
//! | [`FocusRouter`] | Tracks the focused element and moves it between neighbors |
//! | [`TestGrid`](testing::TestGrid) | In-memory view for exercising the runtime without a terminal |
//!
//! # Event flow
//!
//! 1. **input** -- A background thread reads the terminal and posts each
//!    chunk to the runtime's queue.
//! 2. **decode** -- Each chunk becomes one [`KeyEvent`]. Plain arrows move
//!    focus, plain characters go to the focused element, ctrl-C stops.
//! 3. **invalidate** -- The view (or anything holding an [`UpdateHandle`])
//!    marks nodes dirty; the first mark schedules one tick.
//! 4. **update** -- The tick rebuilds every marked node, lays the tree out
//!    at the current size and repaints.
//! 5. **resize** -- `SIGWINCH` triggers the same cycle immediately, after
//!    dropping cached layout.

#[cfg(not(unix))]
compile_error!("sprig-core drives the terminal through termios and only builds on unix targets");

pub mod event;
pub mod focus;
pub mod key;
pub mod logging;
pub mod runtime;
pub mod scheduler;
pub mod terminal;
pub mod testing;
pub mod view;

pub use event::RuntimeEvent;
pub use focus::FocusRouter;
pub use key::{Key, KeyEvent, Modifiers};
pub use logging::log_to_file;
pub use runtime::{AppOptions, Application, InputHandled, RunLoop, RuntimeError, State};
pub use scheduler::{Scheduler, UpdateHandle};
pub use terminal::{InputSource, StdinDevice, TerminalDevice, TerminalMode, TerminalSession};
pub use view::{Direction, ElementId, FocusGraph, NodeId, RenderPipeline, Size, View};
