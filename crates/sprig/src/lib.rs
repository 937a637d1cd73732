//! **sprig** -- a focus-driven terminal UI runtime for [`ratatui`].
//!
//! This is the umbrella crate that re-exports everything you need to build a
//! sprig application from a single dependency:
//!
//! ```toml
//! [dependencies]
//! sprig = "0.1"
//! ```
//!
//! # Re-exports
//!
//! * All public items from [`sprig_core`] are available at the crate root
//!   ([`Application`], [`KeyEvent`], [`FocusGraph`], [`RenderPipeline`],
//!   [`UpdateHandle`], etc.).
//! * [`ratatui`], [`crossterm`], and [`tokio`] are re-exported so downstream
//!   crates do not need to depend on them directly.
//!
//! # Quick start
//!
//! ```ignore
//! use sprig::{Application, AppOptions};
//!
//! fn main() -> Result<(), sprig::RuntimeError> {
//!     let view = Buttons::new()?;
//!     let mut app = Application::with_options(view, AppOptions::default())?;
//!     let handle = app.update_handle();
//!     app.view_mut().connect(handle);
//!     app.start()
//! }
//! ```
//!
//! See `demos/focus_grid.rs` for a complete view.

pub use sprig_core::*;

// Re-export dependencies for use in demos and downstream crates
pub use crossterm;
pub use ratatui;
pub use tokio;
