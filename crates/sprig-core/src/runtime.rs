use crate::event::RuntimeEvent;
use crate::focus::{direction_of, FocusRouter};
use crate::key::{Key, KeyEvent, Modifiers};
use crate::scheduler::{Scheduler, UpdateHandle};
use crate::terminal::{StdinDevice, TerminalDevice, TerminalSession};
use crate::view::{ElementId, NodeId, Size, View};
use futures::StreamExt;
use std::future::Future;
use std::path::PathBuf;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio_stream::wrappers::SignalStream;

/// Errors that can stop an [`Application`].
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// An I/O error from terminal setup, painting, or teardown.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// The window size could not be queried.
    #[error("could not get window size: {0}")]
    GeometryQuery(#[source] std::io::Error),
    /// The terminal reported a window with no rows or no columns.
    #[error("terminal reported an unusable window size of {cols}x{rows}")]
    Geometry { cols: u16, rows: u16 },
}

impl RuntimeError {
    /// Whether this error means the environment is unusable, as opposed to
    /// an ordinary I/O failure.
    pub fn is_fatal_geometry(&self) -> bool {
        matches!(self, Self::GeometryQuery(_) | Self::Geometry { .. })
    }
}

/// Result of an input interceptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputHandled {
    /// The interceptor consumed the key; the runtime does nothing with it.
    Handled,
    /// Continue with normal dispatch, using this (possibly replaced) key.
    Propagate(KeyEvent),
}

/// How [`Application::start`] drives the event queue.
#[derive(Debug, Clone, Default)]
pub enum RunLoop {
    /// Build a dedicated current-thread tokio runtime and block on it.
    #[default]
    CurrentThread,
    /// Block on a multi-thread runtime owned by the caller, through its
    /// handle.
    ///
    /// Useful when the program already keeps a runtime for background work.
    /// The calling thread must not itself be running async code. A handle to
    /// a current-thread runtime cannot drive that runtime's signal and I/O
    /// drivers from outside it, so [`block_on`](Self::block_on) falls back
    /// to a dedicated runtime for one.
    Runtime(Handle),
}

impl RunLoop {
    /// Reuse the tokio runtime the caller has entered when it is a
    /// multi-thread one; otherwise use a dedicated current-thread runtime.
    pub fn detect() -> Self {
        match Handle::try_current() {
            Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
                Self::Runtime(handle)
            }
            _ => Self::CurrentThread,
        }
    }

    /// Drive `future` to completion on this strategy's runtime.
    ///
    /// Fails only if a dedicated runtime cannot be built.
    pub fn block_on<F: Future>(&self, future: F) -> std::io::Result<F::Output> {
        match self {
            Self::Runtime(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
                Ok(handle.block_on(future))
            }
            Self::Runtime(_) => {
                tracing::warn!("handle is not to a multi-thread runtime, using a dedicated one");
                Self::dedicated(future)
            }
            Self::CurrentThread => Self::dedicated(future),
        }
    }

    fn dedicated<F: Future>(future: F) -> std::io::Result<F::Output> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        Ok(rt.block_on(future))
    }
}

/// Configuration options for an [`Application`].
///
/// Use struct update syntax to override only what you need:
///
/// ```rust,ignore
/// use sprig_core::AppOptions;
///
/// let opts = AppOptions {
///     log_file: Some("debug.log".into()),
///     ..AppOptions::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Run-loop strategy used by [`Application::start`].
    pub run_loop: RunLoop,
    /// Restore the terminal mode from a panic hook (default: true).
    pub catch_panics: bool,
    /// Listen for window-size signals (default: true).
    pub handle_resize: bool,
    /// Size of the buffer one input read fills (default: 1024 bytes).
    pub read_buffer: usize,
    /// Write `tracing` output to this file.
    pub log_file: Option<PathBuf>,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            run_loop: RunLoop::default(),
            catch_panics: true,
            handle_resize: true,
            read_buffer: 1024,
            log_file: None,
        }
    }
}

/// Where the runtime currently is in its event handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Waiting for input or a scheduled tick.
    Idle,
    /// Dispatching a decoded key.
    ProcessingInput,
    /// Running the cycle for a window-size change.
    Resizing,
    /// Shut down; no more events are handled.
    Stopped,
}

enum Flow {
    Continue,
    /// Input ended: finish what is queued, then stop.
    Drain,
    Stop,
}

type Interceptor = Box<dyn FnMut(KeyEvent) -> InputHandled>;

/// The terminal runtime.
///
/// `Application` owns the terminal session, the focus router and the update
/// scheduler, and drives a [`View`] from a single event queue: decoded keys
/// move focus, type characters or quit; invalidated nodes are rebuilt in
/// coalesced ticks; window-size changes repaint immediately.
///
/// # Example
///
/// ```rust,ignore
/// use sprig_core::Application;
///
/// fn main() -> Result<(), sprig_core::RuntimeError> {
///     let view = MyView::new();
///     Application::new(view)?.start()
/// }
/// ```
pub struct Application<V: View, D: TerminalDevice = StdinDevice> {
    view: V,
    session: TerminalSession<D>,
    focus: FocusRouter,
    scheduler: Scheduler,
    events: mpsc::UnboundedReceiver<RuntimeEvent>,
    sender: mpsc::UnboundedSender<RuntimeEvent>,
    size: Size,
    state: State,
    interceptor: Option<Interceptor>,
    options: AppOptions,
}

impl<V: View> Application<V> {
    /// Take over the process's terminal with default options.
    pub fn new(view: V) -> Result<Self, RuntimeError> {
        Self::with_options(view, AppOptions::default())
    }

    /// Take over the process's terminal with custom options.
    pub fn with_options(view: V, options: AppOptions) -> Result<Self, RuntimeError> {
        Self::with_device(view, StdinDevice, options)
    }
}

impl<V: View, D: TerminalDevice> Application<V, D> {
    /// Take over `device`: switch it to raw mode and focus the first
    /// selectable element of `view`.
    pub fn with_device(mut view: V, device: D, options: AppOptions) -> Result<Self, RuntimeError> {
        if let Some(ref path) = options.log_file {
            crate::logging::log_to_file(path)?;
        }

        let session = TerminalSession::acquire(device, options.catch_panics)?;
        let (sender, events) = mpsc::unbounded_channel();
        let scheduler = Scheduler::new(sender.clone());

        let mut focus = FocusRouter::new();
        focus.focus_first(&mut view);

        tracing::debug!(focused = ?focus.focused(), "application initialized");

        Ok(Self {
            view,
            session,
            focus,
            scheduler,
            events,
            sender,
            size: Size::default(),
            state: State::Idle,
            interceptor: None,
            options,
        })
    }

    /// Install a hook that sees every decoded key before the runtime does.
    pub fn with_interceptor(
        mut self,
        interceptor: impl FnMut(KeyEvent) -> InputHandled + 'static,
    ) -> Self {
        self.interceptor = Some(Box::new(interceptor));
        self
    }

    /// A handle the view tree can keep to request rebuilds.
    pub fn update_handle(&self) -> UpdateHandle {
        self.scheduler.handle()
    }

    /// The driven view.
    pub fn view(&self) -> &V {
        &self.view
    }

    /// Mutable access to the view, e.g. to hand it an [`UpdateHandle`]
    /// before running.
    pub fn view_mut(&mut self) -> &mut V {
        &mut self.view
    }

    /// The terminal session.
    pub fn session(&self) -> &TerminalSession<D> {
        &self.session
    }

    /// The focused element.
    pub fn focused(&self) -> Option<ElementId> {
        self.focus.focused()
    }

    /// The last frame size the view was laid out for.
    pub fn size(&self) -> Size {
        self.size
    }

    /// Where the runtime is in its event handling.
    pub fn state(&self) -> State {
        self.state
    }

    /// Record `node` for rebuild on the next tick.
    pub fn invalidate(&mut self, node: NodeId) {
        self.scheduler.invalidate(node);
    }

    /// Run until the user quits, then exit the process.
    ///
    /// Blocks the calling thread on the configured [`RunLoop`]. On ctrl-C the
    /// terminal is restored and the process exits with status 0. If the
    /// window size becomes unusable the terminal is restored, the error is
    /// reported and the process aborts. Other errors exit with status 1.
    pub fn start(self) -> ! {
        let run_loop = self.options.run_loop.clone();
        let result = run_loop
            .block_on(self.run())
            .map_err(RuntimeError::from)
            .and_then(|outcome| outcome.map(drop));

        match result {
            Ok(()) => std::process::exit(0),
            Err(e) if e.is_fatal_geometry() => {
                tracing::error!(error = %e, "aborting");
                eprintln!("{e}");
                std::process::abort()
            }
            Err(e) => {
                tracing::error!(error = %e, "runtime failed");
                eprintln!("{e}");
                std::process::exit(1)
            }
        }
    }

    /// Run the event loop until the user quits or input ends.
    ///
    /// Starts listening for window-size changes, paints the first frame,
    /// starts reading input, then handles queued events one at a time. On
    /// every exit path the view is stopped, the input thread joined and the
    /// terminal mode restored before this returns, so the caller owns the
    /// terminal again. Returns the view on a normal stop.
    pub async fn run(mut self) -> Result<V, RuntimeError> {
        let mut watcher = None;
        let result = self.event_loop(&mut watcher).await;

        if let Some(watcher) = watcher {
            watcher.abort();
        }
        self.state = State::Stopped;
        tracing::debug!("stopping");
        let teardown = self.teardown();

        result?;
        teardown?;
        Ok(self.view)
    }

    async fn event_loop(&mut self, watcher: &mut Option<AbortHandle>) -> Result<(), RuntimeError> {
        // Listen before the first size query so no change is missed.
        if self.options.handle_resize {
            *watcher = Some(watch_window_size(self.scheduler.handle())?);
        }
        self.refresh_size()?;
        self.view.layout(self.size);
        self.view.draw()?;

        self.session
            .start(self.sender.clone(), self.options.read_buffer)?;
        tracing::debug!(cols = self.size.cols, rows = self.size.rows, "started");

        while let Some(event) = self.events.recv().await {
            match self.handle_event(event)? {
                Flow::Continue => {}
                Flow::Stop => return Ok(()),
                Flow::Drain => break,
            }
        }

        tracing::debug!("input closed");
        while let Ok(event) = self.events.try_recv() {
            if let Flow::Stop = self.handle_event(event)? {
                break;
            }
        }
        Ok(())
    }

    fn handle_event(&mut self, event: RuntimeEvent) -> Result<Flow, RuntimeError> {
        match event {
            RuntimeEvent::Input(bytes) => {
                self.state = State::ProcessingInput;
                let key = KeyEvent::decode(&bytes);
                tracing::trace!(%key, len = bytes.len(), "input");
                let flow = self.handle_key(key);
                self.state = State::Idle;
                Ok(flow)
            }
            RuntimeEvent::InputClosed => Ok(Flow::Drain),
            RuntimeEvent::Invalidate(node) => {
                self.scheduler.invalidate(node);
                Ok(Flow::Continue)
            }
            RuntimeEvent::Tick => {
                if let Some(nodes) = self.scheduler.take() {
                    self.update_cycle(nodes)?;
                }
                Ok(Flow::Continue)
            }
            RuntimeEvent::Resize => {
                self.state = State::Resizing;
                self.handle_resize()?;
                self.state = State::Idle;
                Ok(Flow::Continue)
            }
        }
    }

    fn handle_key(&mut self, key: KeyEvent) -> Flow {
        let key = match self.interceptor.as_mut().map(|intercept| intercept(key)) {
            Some(InputHandled::Handled) => return Flow::Continue,
            Some(InputHandled::Propagate(key)) => key,
            None => key,
        };

        let plain = key.modifiers.is_empty();
        if let Some(direction) = direction_of(key.key).filter(|_| plain) {
            self.focus.navigate(&mut self.view, direction);
            return Flow::Continue;
        }
        match key.key {
            Key::Character('C') if key.modifiers == Modifiers::CTRL => {
                tracing::debug!("quit requested");
                Flow::Stop
            }
            Key::Character(c) if plain => {
                self.focus.deliver(&mut self.view, c);
                Flow::Continue
            }
            _ => Flow::Continue,
        }
    }

    fn handle_resize(&mut self) -> Result<(), RuntimeError> {
        self.refresh_size()?;
        self.view.invalidate_cache();
        let nodes = self.scheduler.drain();
        self.update_cycle(nodes)
    }

    fn update_cycle(&mut self, nodes: Vec<NodeId>) -> Result<(), RuntimeError> {
        tracing::trace!(nodes = nodes.len(), "update");
        for node in &nodes {
            self.view.rebuild(*node);
        }
        if !nodes.is_empty() {
            self.focus.revalidate(&mut self.view);
        }
        self.view.layout(self.size);
        self.view.update()?;
        Ok(())
    }

    fn refresh_size(&mut self) -> Result<(), RuntimeError> {
        let size = self.session.size().map_err(RuntimeError::GeometryQuery)?;
        if !size.is_valid() {
            tracing::error!(cols = size.cols, rows = size.rows, "unusable window size");
            return Err(RuntimeError::Geometry {
                cols: size.cols,
                rows: size.rows,
            });
        }
        self.size = size;
        Ok(())
    }

    fn teardown(&mut self) -> Result<(), RuntimeError> {
        // Release even when stopping the view fails.
        let stopped = self.view.stop();
        self.session.release()?;
        stopped?;
        Ok(())
    }
}

/// Forward SIGWINCH onto the runtime queue.
fn watch_window_size(handle: UpdateHandle) -> std::io::Result<AbortHandle> {
    let mut signals = SignalStream::new(signal(SignalKind::window_change())?);
    let task = tokio::spawn(async move {
        while signals.next().await.is_some() {
            if !handle.resized() {
                break;
            }
        }
    });
    Ok(task.abort_handle())
}
