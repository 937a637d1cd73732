//! Focus routing over the external element graph.

use crate::key::Key;
use crate::view::{Direction, ElementId, FocusGraph};

/// Tracks which element holds keyboard focus and moves it on request.
///
/// The router only stores an [`ElementId`]; the element itself lives in the
/// [`FocusGraph`] passed to every call. At most one element is focused at a
/// time, and a move always resigns the old element before the new one
/// becomes focus.
#[derive(Debug, Default)]
pub struct FocusRouter {
    focused: Option<ElementId>,
}

impl FocusRouter {
    /// A router with nothing focused.
    pub fn new() -> Self {
        Self { focused: None }
    }

    /// The currently focused element.
    pub fn focused(&self) -> Option<ElementId> {
        self.focused
    }

    /// Focus the first selectable element of the tree.
    ///
    /// Returns the newly focused element, or `None` if the tree has nothing
    /// focusable.
    pub fn focus_first<G: FocusGraph + ?Sized>(&mut self, graph: &mut G) -> Option<ElementId> {
        let first = graph.first_selectable()?;
        self.focus(graph, first);
        Some(first)
    }

    /// Move focus one step in `direction`.
    ///
    /// Returns `true` if focus moved. When nothing lies in that direction, or
    /// nothing is focused yet, focus stays where it is.
    pub fn navigate<G: FocusGraph + ?Sized>(&mut self, graph: &mut G, direction: Direction) -> bool {
        let Some(current) = self.focused else {
            return false;
        };
        match graph.selectable_element(current, direction) {
            Some(next) => {
                self.focus(graph, next);
                true
            }
            None => false,
        }
    }

    /// Deliver `c` to the focused element. No-op when nothing is focused.
    pub fn deliver<G: FocusGraph + ?Sized>(&self, graph: &mut G, c: char) -> bool {
        match self.focused {
            Some(element) => {
                graph.handle_character(element, c);
                true
            }
            None => false,
        }
    }

    /// Re-check the focus handle after the tree was rebuilt.
    ///
    /// A handle the graph no longer recognizes is replaced by the first
    /// selectable element (or cleared). The stale element is not resigned
    /// since it no longer exists.
    pub fn revalidate<G: FocusGraph + ?Sized>(&mut self, graph: &mut G) {
        match self.focused {
            Some(element) if graph.is_selectable(element) => {}
            Some(stale) => {
                tracing::debug!(element = stale.0, "focused element vanished after rebuild");
                self.focused = None;
                self.focus_first(graph);
            }
            None => {
                self.focus_first(graph);
            }
        }
    }

    fn focus<G: FocusGraph + ?Sized>(&mut self, graph: &mut G, next: ElementId) {
        if let Some(previous) = self.focused.take() {
            graph.resign_focus(previous);
        }
        self.focused = Some(next);
        graph.become_focus(next);
    }
}

/// Map an unmodified arrow key to its navigation direction.
pub(crate) fn direction_of(key: Key) -> Option<Direction> {
    match key {
        Key::Up => Some(Direction::Up),
        Key::Down => Some(Direction::Down),
        Key::Left => Some(Direction::Left),
        Key::Right => Some(Direction::Right),
        Key::Character(_) | Key::Unknown => None,
    }
}
