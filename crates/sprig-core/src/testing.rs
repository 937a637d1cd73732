//! Headless harness for driving an [`Application`](crate::Application)
//! without a real terminal.
//!
//! * [`ScriptedDevice`] stands in for the terminal: it hands out a canned
//!   cooked mode, records every mode change, reports a controllable window
//!   size and replays scripted input chunks (one per read, then EOF), or
//!   reads chunks pushed through an [`InputFeed`] while the runtime is up.
//! * [`TestGrid`] is a `rows x cols` grid of focusable cells implementing
//!   [`View`](crate::View). It records focus, rebuild, layout and paint calls
//!   and paints itself into a ratatui [`Buffer`] so frames can be asserted as
//!   text.
//!
//! Both write into a shared [`Journal`], which gives tests one ordered
//! timeline across the terminal and the view.
//!
//! # Example
//!
//! ```rust,ignore
//! use sprig_core::testing::{ScriptedDevice, TestGrid};
//!
//! let grid = TestGrid::new(2, 2);
//! let device = ScriptedDevice::new(Size::new(40, 10))
//!     .with_journal(grid.journal())
//!     .with_input(vec![b"\x1b[B".to_vec()]);
//! let grid = Application::with_device(grid, device, options)?.run().await?;
//! assert_eq!(grid.focused(), Some(grid.cell(1, 0)));
//! ```

use crate::scheduler::UpdateHandle;
use crate::terminal::{InputSource, TerminalDevice, TerminalMode};
use crate::view::{Direction, ElementId, FocusGraph, NodeId, RenderPipeline, Size};
use ratatui::buffer::Buffer;
use ratatui::layout::{Constraint, Layout, Rect};
use ratatui::style::{Modifier, Style};
use ratatui::widgets::{Paragraph, Widget};
use std::collections::{HashMap, HashSet, VecDeque};
use std::io::{self, Read};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// One observable call, in the order it happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    /// The device was switched to this mode.
    SetMode(TerminalMode),
    Become(ElementId),
    Resign(ElementId),
    Character(ElementId, char),
    Rebuild(NodeId),
    Layout(Size),
    Draw,
    Update,
    InvalidateCache,
    Stop,
}

/// Shared, ordered record of [`Entry`]s.
#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<Entry>>>);

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entry: Entry) {
        self.lock().push(entry);
    }

    /// Snapshot of everything recorded so far.
    pub fn entries(&self) -> Vec<Entry> {
        self.lock().clone()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// How many times `entry` was recorded.
    pub fn count(&self, entry: &Entry) -> usize {
        self.lock().iter().filter(|e| *e == entry).count()
    }

    /// Every mode the device was switched to.
    pub fn modes(&self) -> Vec<TerminalMode> {
        self.lock()
            .iter()
            .filter_map(|e| match e {
                Entry::SetMode(mode) => Some(*mode),
                _ => None,
            })
            .collect()
    }

    /// The become/resign calls, in order.
    pub fn focus_changes(&self) -> Vec<Entry> {
        self.lock()
            .iter()
            .filter(|e| matches!(e, Entry::Become(_) | Entry::Resign(_)))
            .cloned()
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Entry>> {
        // A panicking test already failed; keep the record readable.
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// The mode a [`ScriptedDevice`] starts in: a typical interactive shell
/// setting with echo, line editing and signals on.
pub fn cooked_mode() -> TerminalMode {
    // SAFETY: termios is a plain C struct; all-zero is a valid value.
    let mut termios: libc::termios = unsafe { std::mem::zeroed() };
    termios.c_iflag = libc::BRKINT | libc::ICRNL | libc::IXON;
    termios.c_oflag = libc::OPOST | libc::ONLCR;
    termios.c_cflag = libc::CS8 | libc::CREAD;
    termios.c_lflag = libc::ECHO | libc::ECHOE | libc::ICANON | libc::IEXTEN | libc::ISIG;
    TerminalMode::from_termios(termios)
}

/// Window size reported by a [`ScriptedDevice`]; `None` makes the query fail.
#[derive(Debug, Clone)]
pub struct SizeControl(Arc<Mutex<Option<Size>>>);

impl SizeControl {
    /// Report `size` from now on.
    pub fn set(&self, size: Size) {
        *self.0.lock().unwrap_or_else(|p| p.into_inner()) = Some(size);
    }

    /// Make every size query fail from now on.
    pub fn fail(&self) {
        *self.0.lock().unwrap_or_else(|p| p.into_inner()) = None;
    }

    fn get(&self) -> io::Result<Size> {
        self.0
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .ok_or_else(|| io::Error::other("no terminal attached"))
    }
}

/// Fake [`TerminalDevice`] for tests.
pub struct ScriptedDevice {
    mode: Mutex<TerminalMode>,
    size: SizeControl,
    input: Mutex<Option<Box<dyn InputSource>>>,
    journal: Journal,
}

impl ScriptedDevice {
    /// A device in [`cooked_mode`] reporting `size`, with no input.
    pub fn new(size: Size) -> Self {
        Self {
            mode: Mutex::new(cooked_mode()),
            size: SizeControl(Arc::new(Mutex::new(Some(size)))),
            input: Mutex::new(None),
            journal: Journal::new(),
        }
    }

    /// Record mode changes into `journal`.
    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = journal;
        self
    }

    /// Replay `chunks`, one per read, then report EOF.
    pub fn with_input(self, chunks: Vec<Vec<u8>>) -> Self {
        *self.input.lock().unwrap_or_else(|p| p.into_inner()) = Some(Box::new(ScriptedInput {
            chunks: chunks.into(),
            partial: Vec::new(),
        }));
        self
    }

    /// Read chunks pushed through the returned feed. Reads wait for the
    /// next chunk; dropping every feed is EOF.
    pub fn with_live_input(self) -> (Self, InputFeed) {
        let (sender, receiver) = mpsc::channel();
        let reads = Arc::new(AtomicUsize::new(0));
        let input = LiveInput {
            receiver,
            partial: Vec::new(),
            closed: false,
            reads: reads.clone(),
        };
        *self.input.lock().unwrap_or_else(|p| p.into_inner()) = Some(Box::new(input));
        (self, InputFeed { sender, reads })
    }

    /// The journal mode changes are recorded in.
    pub fn journal(&self) -> Journal {
        self.journal.clone()
    }

    /// Control over the reported window size.
    pub fn size_control(&self) -> SizeControl {
        self.size.clone()
    }
}

impl TerminalDevice for ScriptedDevice {
    fn mode(&self) -> io::Result<TerminalMode> {
        Ok(*self.mode.lock().unwrap_or_else(|p| p.into_inner()))
    }

    fn set_mode(&self, mode: &TerminalMode) -> io::Result<()> {
        *self.mode.lock().unwrap_or_else(|p| p.into_inner()) = *mode;
        self.journal.record(Entry::SetMode(*mode));
        Ok(())
    }

    fn size(&self) -> io::Result<Size> {
        self.size.get()
    }

    fn input(&self) -> io::Result<Box<dyn InputSource>> {
        let input = self.input.lock().unwrap_or_else(|p| p.into_inner()).take();
        Ok(input.unwrap_or_else(|| Box::new(ScriptedInput::default())))
    }
}

#[derive(Default)]
struct ScriptedInput {
    chunks: VecDeque<Vec<u8>>,
    partial: Vec<u8>,
}

impl Read for ScriptedInput {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.partial.is_empty() {
            match self.chunks.pop_front() {
                Some(chunk) => self.partial = chunk,
                None => return Ok(0),
            }
        }
        let n = self.partial.len().min(buf.len());
        buf[..n].copy_from_slice(&self.partial[..n]);
        self.partial.drain(..n);
        Ok(n)
    }
}

impl InputSource for ScriptedInput {
    // Scripted chunks, and EOF after them, are always ready.
    fn wait(&mut self, _timeout: Duration) -> io::Result<bool> {
        Ok(true)
    }
}

/// Sending side of [`ScriptedDevice::with_live_input`].
#[derive(Debug, Clone)]
pub struct InputFeed {
    sender: mpsc::Sender<Vec<u8>>,
    reads: Arc<AtomicUsize>,
}

impl InputFeed {
    /// Queue `bytes` as one chunk. Returns `false` once the device is gone.
    pub fn send(&self, bytes: &[u8]) -> bool {
        self.sender.send(bytes.to_vec()).is_ok()
    }

    /// How many reads have taken bytes from this feed.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

struct LiveInput {
    receiver: mpsc::Receiver<Vec<u8>>,
    partial: Vec<u8>,
    closed: bool,
    reads: Arc<AtomicUsize>,
}

impl Read for LiveInput {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.partial.is_empty() && !self.closed {
            match self.receiver.recv() {
                Ok(chunk) => self.partial = chunk,
                Err(_) => self.closed = true,
            }
        }
        if self.partial.is_empty() {
            return Ok(0);
        }
        let n = self.partial.len().min(buf.len());
        buf[..n].copy_from_slice(&self.partial[..n]);
        self.partial.drain(..n);
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(n)
    }
}

impl InputSource for LiveInput {
    fn wait(&mut self, timeout: Duration) -> io::Result<bool> {
        if !self.partial.is_empty() || self.closed {
            return Ok(true);
        }
        match self.receiver.recv_timeout(timeout) {
            Ok(chunk) => {
                self.partial = chunk;
                Ok(true)
            }
            Err(RecvTimeoutError::Timeout) => Ok(false),
            Err(RecvTimeoutError::Disconnected) => {
                self.closed = true;
                Ok(true)
            }
        }
    }
}

/// Poll `journal` until it holds `entry`, for at most `timeout`.
///
/// For tests that wait on work happening on another thread.
pub fn wait_for(journal: &Journal, entry: &Entry, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if journal.count(entry) > 0 {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}

/// A grid of focusable cells that records everything the runtime asks of
/// it.
///
/// Cell `(row, col)` is element `row * cols + col`, and each cell is also
/// the node with the same number. Navigation skips removed cells and stops
/// at the edges.
pub struct TestGrid {
    rows: u16,
    cols: u16,
    removed: HashSet<ElementId>,
    focused: Option<ElementId>,
    typed: HashMap<ElementId, String>,
    journal: Journal,
    buffer: Buffer,
    area: Size,
    updates: Option<UpdateHandle>,
    invalidate_per_character: usize,
    reinvalidate: HashSet<NodeId>,
    remove_on_rebuild: HashMap<NodeId, ElementId>,
}

impl TestGrid {
    pub fn new(rows: u16, cols: u16) -> Self {
        Self {
            rows,
            cols,
            removed: HashSet::new(),
            focused: None,
            typed: HashMap::new(),
            journal: Journal::new(),
            buffer: Buffer::empty(Rect::ZERO),
            area: Size::default(),
            updates: None,
            invalidate_per_character: 0,
            reinvalidate: HashSet::new(),
            remove_on_rebuild: HashMap::new(),
        }
    }

    /// Invalidate the receiving cell's node `times` times for every typed
    /// character. Needs an [`UpdateHandle`].
    pub fn invalidate_per_character(mut self, times: usize) -> Self {
        self.invalidate_per_character = times;
        self
    }

    pub fn set_update_handle(&mut self, handle: UpdateHandle) {
        self.updates = Some(handle);
    }

    /// Invalidate `node` again the first time it is rebuilt.
    pub fn reinvalidate_on_rebuild(&mut self, node: NodeId) {
        self.reinvalidate.insert(node);
    }

    /// Remove `element` when `node` is rebuilt.
    pub fn remove_on_rebuild(&mut self, node: NodeId, element: ElementId) {
        self.remove_on_rebuild.insert(node, element);
    }

    /// Remove `element` from the grid right away.
    pub fn remove(&mut self, element: ElementId) {
        self.removed.insert(element);
    }

    pub fn journal(&self) -> Journal {
        self.journal.clone()
    }

    /// Element id of the cell at `(row, col)`.
    pub fn cell(&self, row: u16, col: u16) -> ElementId {
        ElementId(u32::from(row) * u32::from(self.cols) + u32::from(col))
    }

    /// Node backing `element`.
    pub fn node(&self, element: ElementId) -> NodeId {
        NodeId(element.0)
    }

    /// The cell that last became focus and has not resigned.
    pub fn focused(&self) -> Option<ElementId> {
        self.focused
    }

    /// Characters delivered to `element`.
    pub fn typed(&self, element: ElementId) -> &str {
        self.typed.get(&element).map(String::as_str).unwrap_or("")
    }

    /// Size of the last layout.
    pub fn area(&self) -> Size {
        self.area
    }

    /// The last painted frame, one line per row.
    pub fn render_string(&self) -> String {
        let area = self.buffer.area;
        let mut output = String::new();
        for y in area.top()..area.bottom() {
            for x in area.left()..area.right() {
                output.push_str(self.buffer[(x, y)].symbol());
            }
            if y + 1 < area.bottom() {
                output.push('\n');
            }
        }
        output
    }

    fn position(&self, element: ElementId) -> Option<(u16, u16)> {
        if self.cols == 0 || element.0 >= u32::from(self.rows) * u32::from(self.cols) {
            return None;
        }
        let cols = u32::from(self.cols);
        Some(((element.0 / cols) as u16, (element.0 % cols) as u16))
    }

    fn paint(&mut self) {
        let area: Rect = self.area.into();
        self.buffer = Buffer::empty(area);
        if self.rows == 0 || self.cols == 0 {
            return;
        }

        let row_share = Constraint::Ratio(1, u32::from(self.rows));
        let col_share = Constraint::Ratio(1, u32::from(self.cols));
        let rows = Layout::vertical(vec![row_share; self.rows as usize]).split(area);
        for (r, row_area) in rows.iter().enumerate() {
            let cells = Layout::horizontal(vec![col_share; self.cols as usize]).split(*row_area);
            for (c, cell_area) in cells.iter().enumerate() {
                let element = self.cell(r as u16, c as u16);
                if self.removed.contains(&element) {
                    continue;
                }
                let focused = self.focused == Some(element);
                let label = format!(
                    "{}[{r},{c}]{}",
                    if focused { '>' } else { ' ' },
                    self.typed(element)
                );
                let style = if focused {
                    Style::default().add_modifier(Modifier::REVERSED)
                } else {
                    Style::default()
                };
                Paragraph::new(label)
                    .style(style)
                    .render(*cell_area, &mut self.buffer);
            }
        }
    }
}

impl FocusGraph for TestGrid {
    fn selectable_element(&self, from: ElementId, direction: Direction) -> Option<ElementId> {
        let (mut row, mut col) = self.position(from)?;
        loop {
            match direction {
                Direction::Up => row = row.checked_sub(1)?,
                Direction::Down => row = Some(row + 1).filter(|r| *r < self.rows)?,
                Direction::Left => col = col.checked_sub(1)?,
                Direction::Right => col = Some(col + 1).filter(|c| *c < self.cols)?,
            }
            let candidate = self.cell(row, col);
            if self.is_selectable(candidate) {
                return Some(candidate);
            }
        }
    }

    fn first_selectable(&self) -> Option<ElementId> {
        (0..u32::from(self.rows) * u32::from(self.cols))
            .map(ElementId)
            .find(|element| !self.removed.contains(element))
    }

    fn is_selectable(&self, element: ElementId) -> bool {
        self.position(element).is_some() && !self.removed.contains(&element)
    }

    fn become_focus(&mut self, element: ElementId) {
        self.focused = Some(element);
        self.journal.record(Entry::Become(element));
    }

    fn resign_focus(&mut self, element: ElementId) {
        if self.focused == Some(element) {
            self.focused = None;
        }
        self.journal.record(Entry::Resign(element));
    }

    fn handle_character(&mut self, element: ElementId, c: char) {
        self.typed.entry(element).or_default().push(c);
        self.journal.record(Entry::Character(element, c));
        if let Some(ref updates) = self.updates {
            for _ in 0..self.invalidate_per_character {
                updates.invalidate(NodeId(element.0));
            }
        }
    }
}

impl RenderPipeline for TestGrid {
    fn rebuild(&mut self, node: NodeId) {
        self.journal.record(Entry::Rebuild(node));
        if let Some(element) = self.remove_on_rebuild.remove(&node) {
            self.removed.insert(element);
            if self.focused == Some(element) {
                self.focused = None;
            }
        }
        if self.reinvalidate.remove(&node) {
            if let Some(ref updates) = self.updates {
                updates.invalidate(node);
            }
        }
    }

    fn layout(&mut self, size: Size) {
        self.area = size;
        self.journal.record(Entry::Layout(size));
    }

    fn draw(&mut self) -> io::Result<()> {
        self.paint();
        self.journal.record(Entry::Draw);
        Ok(())
    }

    fn update(&mut self) -> io::Result<()> {
        self.paint();
        self.journal.record(Entry::Update);
        Ok(())
    }

    fn invalidate_cache(&mut self) {
        self.journal.record(Entry::InvalidateCache);
    }

    fn stop(&mut self) -> io::Result<()> {
        self.journal.record(Entry::Stop);
        Ok(())
    }
}
