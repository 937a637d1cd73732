//! Boundary with the external UI tree.
//!
//! The runtime never owns widgets, layout or painting. It talks to whatever
//! builds the UI through two traits:
//!
//! * [`FocusGraph`] -- directional queries over focusable elements and the
//!   focus / character hooks on a single element.
//! * [`RenderPipeline`] -- node rebuilds, layout for a frame size and the
//!   full/incremental paint passes.
//!
//! Anything implementing both is a [`View`] and can be handed to an
//! [`Application`](crate::Application).
//!
//! Elements and nodes are referred to by plain ids rather than references so
//! the runtime holds no borrow into the tree it drives.

use std::io;

/// Handle to a focusable element inside the external tree.
///
/// Only meaningful to the [`FocusGraph`] that produced it; the runtime stores
/// it as a lookup key and never assumes the element is still alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementId(pub u32);

/// Handle to a node of the view description that can be rebuilt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

/// Terminal frame size in cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Size {
    pub cols: u16,
    pub rows: u16,
}

impl Size {
    pub const fn new(cols: u16, rows: u16) -> Self {
        Self { cols, rows }
    }

    /// Whether both dimensions are positive.
    pub const fn is_valid(&self) -> bool {
        self.cols > 0 && self.rows > 0
    }
}

impl From<Size> for ratatui::layout::Rect {
    fn from(size: Size) -> Self {
        ratatui::layout::Rect::new(0, 0, size.cols, size.rows)
    }
}

/// Navigation direction for focus movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

/// Focus-related queries and hooks on the external element tree.
pub trait FocusGraph {
    /// The nearest selectable element in `direction` from `from`.
    ///
    /// Returns `None` when nothing lies in that direction.
    fn selectable_element(&self, from: ElementId, direction: Direction) -> Option<ElementId>;

    /// The first selectable element of the whole tree, if any.
    fn first_selectable(&self) -> Option<ElementId>;

    /// Whether `element` still exists and can hold focus.
    ///
    /// Called after rebuilds to detect a dangling focus handle.
    fn is_selectable(&self, element: ElementId) -> bool;

    /// Tell `element` it now holds focus.
    fn become_focus(&mut self, element: ElementId);

    /// Tell `element` it no longer holds focus.
    fn resign_focus(&mut self, element: ElementId);

    /// Deliver a typed character to `element`.
    fn handle_character(&mut self, element: ElementId, c: char);
}

/// Layout and painting hooks of the external render pipeline.
pub trait RenderPipeline {
    /// Rebuild one invalidated node from its current description.
    fn rebuild(&mut self, node: NodeId);

    /// Lay out the tree for a frame of `size`.
    fn layout(&mut self, size: Size);

    /// Paint the full frame.
    fn draw(&mut self) -> io::Result<()>;

    /// Repaint whatever changed since the last paint.
    fn update(&mut self) -> io::Result<()>;

    /// Drop caches that depend on the frame size.
    fn invalidate_cache(&mut self);

    /// Stop producing output. Called once on shutdown, before the terminal
    /// mode is restored.
    fn stop(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Everything the runtime needs from the UI tree.
pub trait View: FocusGraph + RenderPipeline {}

impl<T: FocusGraph + RenderPipeline> View for T {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_validity() {
        assert!(Size::new(80, 24).is_valid());
        assert!(!Size::new(0, 24).is_valid());
        assert!(!Size::new(80, 0).is_valid());
        assert!(!Size::default().is_valid());
    }

    #[test]
    fn size_to_rect() {
        let rect: ratatui::layout::Rect = Size::new(10, 4).into();
        assert_eq!(rect, ratatui::layout::Rect::new(0, 0, 10, 4));
    }
}
