//! Ownership of the terminal device: raw mode, input and geometry.
//!
//! A [`TerminalSession`] saves the device mode on [`acquire`], switches to a
//! raw mode, reads input on a background thread once [`start`]ed, and puts
//! the saved mode back on [`release`] (or on drop, or from the panic hook).
//!
//! The OS calls sit behind [`TerminalDevice`] so the session can be driven by
//! a scripted device in tests; [`StdinDevice`] is the real one.
//!
//! [`acquire`]: TerminalSession::acquire
//! [`start`]: TerminalSession::start
//! [`release`]: TerminalSession::release

use crate::event::RuntimeEvent;
use crate::view::Size;
use std::fmt;
use std::io::{self, Read};
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::mpsc;

/// How long the input thread waits for bytes before re-checking whether it
/// was asked to stop.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Saved configuration of a terminal device.
///
/// Captured once when a session is acquired and reapplied unchanged when it
/// is released.
#[derive(Clone, Copy)]
pub struct TerminalMode {
    termios: libc::termios,
}

impl TerminalMode {
    /// Wrap a raw `termios` value.
    pub fn from_termios(termios: libc::termios) -> Self {
        Self { termios }
    }

    /// The underlying `termios` value.
    pub fn termios(&self) -> &libc::termios {
        &self.termios
    }

    /// The mode the runtime runs in, derived from this one.
    ///
    /// Turns off software flow control and CR-to-NL translation on input,
    /// and echo, canonical line editing, extended input processing and
    /// signal characters on the local side. Everything else is kept.
    pub fn raw(&self) -> Self {
        let mut termios = self.termios;
        termios.c_iflag &= !(libc::IXON | libc::ICRNL);
        termios.c_lflag &= !(libc::ECHO | libc::ICANON | libc::IEXTEN | libc::ISIG);
        Self { termios }
    }

    /// Whether typed input is echoed back.
    pub fn echo(&self) -> bool {
        self.termios.c_lflag & libc::ECHO != 0
    }

    /// Whether input is line buffered.
    pub fn canonical(&self) -> bool {
        self.termios.c_lflag & libc::ICANON != 0
    }

    /// Whether ctrl-C and friends raise signals.
    pub fn signals(&self) -> bool {
        self.termios.c_lflag & libc::ISIG != 0
    }

    /// Whether this mode is the runtime's raw mode.
    pub fn is_raw(&self) -> bool {
        let t = &self.termios;
        t.c_iflag & (libc::IXON | libc::ICRNL) == 0
            && t.c_lflag & (libc::ECHO | libc::ICANON | libc::IEXTEN | libc::ISIG) == 0
    }
}

impl PartialEq for TerminalMode {
    fn eq(&self, other: &Self) -> bool {
        let (a, b) = (&self.termios, &other.termios);
        a.c_iflag == b.c_iflag
            && a.c_oflag == b.c_oflag
            && a.c_cflag == b.c_cflag
            && a.c_lflag == b.c_lflag
            && a.c_cc == b.c_cc
    }
}

impl Eq for TerminalMode {}

impl fmt::Debug for TerminalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TerminalMode")
            .field("iflag", &format_args!("{:#x}", self.termios.c_iflag))
            .field("oflag", &format_args!("{:#x}", self.termios.c_oflag))
            .field("cflag", &format_args!("{:#x}", self.termios.c_cflag))
            .field("lflag", &format_args!("{:#x}", self.termios.c_lflag))
            .finish()
    }
}

/// Operating-system side of a terminal.
///
/// Implementations must be shareable: the panic hook keeps a reference so it
/// can restore the mode from whatever thread panicked.
pub trait TerminalDevice: Send + Sync + 'static {
    /// Read the current device mode.
    fn mode(&self) -> io::Result<TerminalMode>;

    /// Apply `mode` to the device.
    fn set_mode(&self, mode: &TerminalMode) -> io::Result<()>;

    /// Current window size.
    fn size(&self) -> io::Result<Size>;

    /// A source of raw input bytes.
    fn input(&self) -> io::Result<Box<dyn InputSource>>;
}

/// Raw input bytes from a terminal device.
///
/// Each `read` should return the bytes available at that moment. `wait`
/// lets the reader thread sleep in bounded steps so it can be stopped
/// without leaving a `read` pending on the device.
pub trait InputSource: Read + Send {
    /// Block for at most `timeout` until a `read` would not block.
    ///
    /// Returns `true` when input (or end of file) is ready.
    fn wait(&mut self, timeout: Duration) -> io::Result<bool>;
}

/// The process's controlling terminal, reached through stdin.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdinDevice;

impl StdinDevice {
    const FD: RawFd = libc::STDIN_FILENO;
}

impl TerminalDevice for StdinDevice {
    fn mode(&self) -> io::Result<TerminalMode> {
        // SAFETY: termios is plain data; all-zero is a valid value.
        let mut termios: libc::termios = unsafe { std::mem::zeroed() };
        // SAFETY: the pointer comes from a live mutable reference, and
        // tcgetattr fully initializes the value on success.
        if unsafe { libc::tcgetattr(Self::FD, &mut termios) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(TerminalMode::from_termios(termios))
    }

    fn set_mode(&self, mode: &TerminalMode) -> io::Result<()> {
        // SAFETY: the pointer comes from a live reference to an initialized
        // termios value.
        if unsafe { libc::tcsetattr(Self::FD, libc::TCSAFLUSH, mode.termios()) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn size(&self) -> io::Result<Size> {
        let (cols, rows) = crossterm::terminal::size()?;
        Ok(Size::new(cols, rows))
    }

    fn input(&self) -> io::Result<Box<dyn InputSource>> {
        Ok(Box::new(RawInput { fd: Self::FD }))
    }
}

/// Unbuffered reader over a file descriptor.
///
/// `std::io::Stdin` buffers internally, which would split or merge key
/// sequences; one `read(2)` here is one chunk.
struct RawInput {
    fd: RawFd,
}

impl Read for RawInput {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        // SAFETY: `buf` is valid for writes of `buf.len()` bytes for the
        // duration of the call.
        let n = unsafe { libc::read(self.fd, buf.as_mut_ptr().cast(), buf.len()) };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(n as usize)
    }
}

impl InputSource for RawInput {
    fn wait(&mut self, timeout: Duration) -> io::Result<bool> {
        let mut fds = libc::pollfd {
            fd: self.fd,
            events: libc::POLLIN,
            revents: 0,
        };
        let millis = libc::c_int::try_from(timeout.as_millis()).unwrap_or(libc::c_int::MAX);
        // SAFETY: `fds` is a single valid pollfd that outlives the call.
        let ready = unsafe { libc::poll(&mut fds, 1, millis) };
        if ready < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(ready > 0)
    }
}

/// Background thread feeding input chunks to the runtime queue.
struct InputReader {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

impl InputReader {
    fn spawn(
        mut input: Box<dyn InputSource>,
        queue: mpsc::UnboundedSender<RuntimeEvent>,
        buffer_size: usize,
    ) -> io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let stopped = stop.clone();
        let mut buf = vec![0u8; buffer_size];

        let thread = std::thread::Builder::new()
            .name("sprig-input".to_string())
            .spawn(move || loop {
                let ready = match input.wait(POLL_INTERVAL) {
                    Ok(ready) => ready,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => false,
                    Err(e) => {
                        tracing::warn!(error = %e, "waiting for terminal input failed");
                        let _ = queue.send(RuntimeEvent::InputClosed);
                        break;
                    }
                };
                // A stop request seen here leaves pending bytes on the device.
                if stopped.load(Ordering::Acquire) {
                    tracing::debug!("input reader stopped");
                    break;
                }
                if !ready {
                    continue;
                }
                match input.read(&mut buf) {
                    Ok(0) => {
                        tracing::debug!("input reached end of file");
                        let _ = queue.send(RuntimeEvent::InputClosed);
                        break;
                    }
                    Ok(n) => {
                        if queue.send(RuntimeEvent::Input(buf[..n].to_vec())).is_err() {
                            break;
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                    Err(e) => {
                        tracing::warn!(error = %e, "reading terminal input failed");
                        let _ = queue.send(RuntimeEvent::InputClosed);
                        break;
                    }
                }
            })?;

        Ok(Self { stop, thread })
    }

    /// Ask the thread to stop and wait for it. Returns within one poll
    /// interval.
    fn stop(self) {
        self.stop.store(true, Ordering::Release);
        if self.thread.join().is_err() {
            tracing::warn!("input reader panicked");
        }
    }
}

/// Terminal device held in raw mode for the lifetime of the runtime.
pub struct TerminalSession<D: TerminalDevice> {
    device: Arc<D>,
    original: Option<TerminalMode>,
    reader: Option<InputReader>,
    panic_slot: Option<u64>,
}

impl<D: TerminalDevice> TerminalSession<D> {
    /// Save the device mode and switch to raw mode.
    ///
    /// With `catch_panics`, a process-wide panic hook (installed once)
    /// restores this session's saved mode before the previous hook prints the
    /// panic. The hook always restores the most recently acquired session
    /// that is still held.
    pub fn acquire(device: D, catch_panics: bool) -> io::Result<Self> {
        tracing::debug!("setting up terminal");
        let device = Arc::new(device);
        let original = device.mode()?;
        device.set_mode(&original.raw())?;

        let panic_slot = catch_panics.then(|| arm_panic_restore(device.clone(), original));

        Ok(Self {
            device,
            original: Some(original),
            reader: None,
            panic_slot,
        })
    }

    /// The device this session owns.
    pub fn device(&self) -> &D {
        &self.device
    }

    /// The mode saved by [`acquire`](Self::acquire), while still held.
    pub fn original_mode(&self) -> Option<&TerminalMode> {
        self.original.as_ref()
    }

    /// Whether the device is still in the session's raw mode.
    pub fn is_acquired(&self) -> bool {
        self.original.is_some()
    }

    /// Query the current window size.
    pub fn size(&self) -> io::Result<Size> {
        self.device.size()
    }

    /// Start reading input on a background thread.
    ///
    /// Every successful read is posted to `queue` as one
    /// [`RuntimeEvent::Input`] chunk, in arrival order. The thread ends when
    /// the device reports EOF or an error, when the queue is closed, or when
    /// the session is released.
    pub fn start(
        &mut self,
        queue: mpsc::UnboundedSender<RuntimeEvent>,
        buffer_size: usize,
    ) -> io::Result<()> {
        if let Some(reader) = self.reader.take() {
            reader.stop();
        }
        let input = self.device.input()?;
        self.reader = Some(InputReader::spawn(input, queue, buffer_size.max(16))?);
        Ok(())
    }

    /// Stop the input thread and put the saved mode back. Calling it again
    /// is a no-op.
    ///
    /// Once this returns, nothing reads from the device any more.
    pub fn release(&mut self) -> io::Result<()> {
        if let Some(reader) = self.reader.take() {
            reader.stop();
        }
        if let Some(id) = self.panic_slot.take() {
            disarm_panic_restore(id);
        }
        if let Some(original) = self.original.take() {
            tracing::debug!("freeing up terminal");
            self.device.set_mode(&original)?;
        }
        Ok(())
    }
}

impl<D: TerminalDevice> Drop for TerminalSession<D> {
    fn drop(&mut self) {
        let _ = self.release();
    }
}

type RestoreFn = Box<dyn Fn() + Send + Sync>;

/// Restore run by the panic hook, tagged with the owning session's id.
static PANIC_RESTORE: Mutex<Option<(u64, RestoreFn)>> = Mutex::new(None);
static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);
static HOOK_INSTALLED: Once = Once::new();

fn lock_panic_restore() -> std::sync::MutexGuard<'static, Option<(u64, RestoreFn)>> {
    PANIC_RESTORE.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn arm_panic_restore<D: TerminalDevice>(device: Arc<D>, original: TerminalMode) -> u64 {
    HOOK_INSTALLED.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            restore_after_panic();
            previous(info);
        }));
    });

    let id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
    let restore: RestoreFn = Box::new(move || {
        let _ = device.set_mode(&original);
    });
    *lock_panic_restore() = Some((id, restore));
    id
}

fn disarm_panic_restore(id: u64) {
    let mut slot = lock_panic_restore();
    if slot.as_ref().is_some_and(|(armed, _)| *armed == id) {
        *slot = None;
    }
}

fn restore_after_panic() {
    // Never block inside the panic hook.
    let slot = match PANIC_RESTORE.try_lock() {
        Ok(slot) => slot,
        Err(std::sync::TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        Err(std::sync::TryLockError::WouldBlock) => return,
    };
    if let Some((_, restore)) = slot.as_ref() {
        restore();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{cooked_mode, ScriptedDevice};

    #[test]
    fn raw_clears_only_the_documented_flags() {
        let cooked = cooked_mode();
        let raw = cooked.raw();

        assert!(cooked.echo() && cooked.canonical() && cooked.signals());
        assert!(!raw.echo() && !raw.canonical() && !raw.signals());
        assert!(raw.is_raw());
        assert!(!cooked.is_raw());

        assert_eq!(raw.termios().c_oflag, cooked.termios().c_oflag);
        assert_eq!(raw.termios().c_cflag, cooked.termios().c_cflag);
        assert_ne!(raw.termios().c_iflag & libc::BRKINT, 0);
        assert_eq!(raw.termios().c_iflag & (libc::IXON | libc::ICRNL), 0);
    }

    #[test]
    fn acquire_then_release_restores_original() {
        let device = ScriptedDevice::new(Size::new(80, 24));
        let journal = device.journal();
        let mut session = TerminalSession::acquire(device, false).unwrap();
        assert!(session.is_acquired());
        assert_eq!(session.original_mode(), Some(&cooked_mode()));
        assert!(session.device().mode().unwrap().is_raw());

        session.release().unwrap();
        assert!(!session.is_acquired());

        assert_eq!(journal.modes(), vec![cooked_mode().raw(), cooked_mode()]);
    }

    #[test]
    fn release_is_idempotent_and_runs_on_drop() {
        let device = ScriptedDevice::new(Size::new(80, 24));
        let journal = device.journal();
        {
            let mut session = TerminalSession::acquire(device, false).unwrap();
            session.release().unwrap();
            session.release().unwrap();
        }
        assert_eq!(journal.modes().len(), 2);

        let device = ScriptedDevice::new(Size::new(80, 24));
        let journal = device.journal();
        drop(TerminalSession::acquire(device, false).unwrap());
        assert_eq!(journal.modes().last(), Some(&cooked_mode()));
    }

    #[tokio::test]
    async fn start_posts_each_read_as_one_chunk() {
        let device = ScriptedDevice::new(Size::new(80, 24))
            .with_input(vec![b"\x1b[A".to_vec(), b"x".to_vec()]);
        let mut session = TerminalSession::acquire(device, false).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        session.start(tx, 64).unwrap();

        assert_eq!(rx.recv().await, Some(RuntimeEvent::Input(b"\x1b[A".to_vec())));
        assert_eq!(rx.recv().await, Some(RuntimeEvent::Input(b"x".to_vec())));
        assert_eq!(rx.recv().await, Some(RuntimeEvent::InputClosed));
    }

    #[tokio::test]
    async fn release_stops_the_reader() {
        let (device, feed) = ScriptedDevice::new(Size::new(80, 24)).with_live_input();
        let mut session = TerminalSession::acquire(device, false).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        session.start(tx, 64).unwrap();

        feed.send(b"a");
        assert_eq!(rx.recv().await, Some(RuntimeEvent::Input(b"a".to_vec())));

        session.release().unwrap();
        feed.send(b"typed at the shell");
        std::thread::sleep(Duration::from_millis(200));

        assert_eq!(feed.reads(), 1);
        // The reader thread is gone, and with it the last sender.
        assert_eq!(rx.recv().await, None);
    }

    #[test]
    fn panic_restore_follows_the_live_session() {
        let first = ScriptedDevice::new(Size::new(80, 24));
        let first_journal = first.journal();
        let mut first = TerminalSession::acquire(first, true).unwrap();
        first.release().unwrap();

        let second = ScriptedDevice::new(Size::new(80, 24));
        let second_journal = second.journal();
        let second = TerminalSession::acquire(second, true).unwrap();

        restore_after_panic();
        assert_eq!(first_journal.modes().len(), 2);
        assert_eq!(second_journal.modes(), vec![cooked_mode().raw(), cooked_mode()]);

        drop(second);
        let restored = second_journal.modes().len();
        restore_after_panic();
        assert_eq!(second_journal.modes().len(), restored);
    }

    #[test]
    fn size_comes_from_device() {
        let device = ScriptedDevice::new(Size::new(120, 40));
        let session = TerminalSession::acquire(device, false).unwrap();
        assert_eq!(session.size().unwrap(), Size::new(120, 40));
    }
}
