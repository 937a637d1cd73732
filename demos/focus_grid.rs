//! # Focus Grid Example
//!
//! A 3x4 grid of buttons driven by the sprig runtime:
//! - Arrow keys move focus between neighboring buttons
//! - Typed characters are appended to the focused button's label
//! - Resizing the window re-lays the grid out
//! - ctrl-C restores the terminal and exits
//!
//! Run with: `cargo run --example focus_grid`

use std::io::{self, Stdout};

use sprig::crossterm::{cursor, execute, terminal};
use sprig::ratatui::backend::CrosstermBackend;
use sprig::ratatui::layout::{Alignment, Constraint, Layout, Rect};
use sprig::ratatui::style::{Color, Modifier, Style};
use sprig::ratatui::widgets::{Block, Borders, Paragraph};
use sprig::ratatui::Terminal;
use sprig::{
    AppOptions, Application, Direction, ElementId, FocusGraph, NodeId, RenderPipeline, Size,
    UpdateHandle,
};

const ROWS: u16 = 3;
const COLS: u16 = 4;

struct Button {
    label: String,
    focused: bool,
}

struct FocusGrid {
    terminal: Terminal<CrosstermBackend<Stdout>>,
    buttons: Vec<Button>,
    area: Rect,
    handle: Option<UpdateHandle>,
}

impl FocusGrid {
    fn new() -> io::Result<Self> {
        let terminal = Terminal::new(CrosstermBackend::new(io::stdout()))?;
        let buttons = (0..ROWS * COLS)
            .map(|i| Button {
                label: format!("button {}", i + 1),
                focused: false,
            })
            .collect();
        Ok(Self {
            terminal,
            buttons,
            area: Rect::ZERO,
            handle: None,
        })
    }

    fn connect(&mut self, handle: UpdateHandle) {
        self.handle = Some(handle);
    }

    fn position(element: ElementId) -> (u16, u16) {
        let index = element.0 as u16;
        (index / COLS, index % COLS)
    }

    fn element(row: u16, col: u16) -> ElementId {
        ElementId(u32::from(row * COLS + col))
    }

    // One node per button; the node id matches the element id.
    fn invalidate(&self, element: ElementId) {
        if let Some(handle) = &self.handle {
            handle.invalidate(NodeId(element.0));
        }
    }

    fn button_mut(&mut self, element: ElementId) -> Option<&mut Button> {
        self.buttons.get_mut(element.0 as usize)
    }

    fn paint(&mut self) -> io::Result<()> {
        let area = self.area;
        let buttons = &self.buttons;
        self.terminal.draw(|frame| {
            let [title, grid] =
                Layout::vertical([Constraint::Length(1), Constraint::Fill(1)]).areas(area);
            frame.render_widget(
                Paragraph::new("arrows move focus, type to label, ctrl-C quits")
                    .style(Style::default().fg(Color::DarkGray)),
                title,
            );

            let rows = Layout::vertical((0..ROWS).map(|_| Constraint::Ratio(1, ROWS.into())))
                .split(grid);
            for (r, row_area) in rows.iter().enumerate() {
                let cells = Layout::horizontal((0..COLS).map(|_| Constraint::Ratio(1, COLS.into())))
                    .split(*row_area);
                for (c, cell_area) in cells.iter().enumerate() {
                    let button = &buttons[r * COLS as usize + c];
                    let border = if button.focused {
                        Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
                    } else {
                        Style::default().fg(Color::Gray)
                    };
                    frame.render_widget(
                        Paragraph::new(button.label.as_str())
                            .alignment(Alignment::Center)
                            .block(Block::default().borders(Borders::ALL).border_style(border)),
                        *cell_area,
                    );
                }
            }
        })?;
        Ok(())
    }
}

impl FocusGraph for FocusGrid {
    fn selectable_element(&self, from: ElementId, direction: Direction) -> Option<ElementId> {
        let (row, col) = Self::position(from);
        let (row, col) = match direction {
            Direction::Up => (row.checked_sub(1)?, col),
            Direction::Down => (row + 1, col),
            Direction::Left => (row, col.checked_sub(1)?),
            Direction::Right => (row, col + 1),
        };
        (row < ROWS && col < COLS).then(|| Self::element(row, col))
    }

    fn first_selectable(&self) -> Option<ElementId> {
        Some(Self::element(0, 0))
    }

    fn is_selectable(&self, element: ElementId) -> bool {
        (element.0 as usize) < self.buttons.len()
    }

    fn become_focus(&mut self, element: ElementId) {
        if let Some(button) = self.button_mut(element) {
            button.focused = true;
        }
        self.invalidate(element);
    }

    fn resign_focus(&mut self, element: ElementId) {
        if let Some(button) = self.button_mut(element) {
            button.focused = false;
        }
        self.invalidate(element);
    }

    fn handle_character(&mut self, element: ElementId, c: char) {
        if let Some(button) = self.button_mut(element) {
            button.label.push(c);
        }
        self.invalidate(element);
    }
}

impl RenderPipeline for FocusGrid {
    // Buttons are plain data; the repaint reads them directly.
    fn rebuild(&mut self, _node: NodeId) {}

    fn layout(&mut self, size: Size) {
        self.area = size.into();
    }

    fn draw(&mut self) -> io::Result<()> {
        execute!(io::stdout(), terminal::EnterAlternateScreen, cursor::Hide)?;
        self.terminal.clear()?;
        self.paint()
    }

    fn update(&mut self) -> io::Result<()> {
        self.paint()
    }

    fn invalidate_cache(&mut self) {
        self.terminal.autoresize().ok();
    }

    fn stop(&mut self) -> io::Result<()> {
        execute!(io::stdout(), cursor::Show, terminal::LeaveAlternateScreen)
    }
}

fn main() -> Result<(), sprig::RuntimeError> {
    let view = FocusGrid::new()?;
    let options = AppOptions {
        log_file: std::env::var_os("SPRIG_LOG").map(Into::into),
        ..AppOptions::default()
    };
    let mut app = Application::with_options(view, options)?;
    let handle = app.update_handle();
    app.view_mut().connect(handle);
    app.start()
}
