//! Transport session: one boot ROM link over one port.
//!
//! The session owns the port, SLIP-encodes outgoing requests, reassembles
//! incoming frames and matches responses to the requests waiting for them.
//! It is a blocking state machine: every method runs on the caller's
//! thread, polling the port with short read timeouts until a response
//! arrives or a deadline passes.
//!
//! ## Example
//!
//! ```rust,no_run
//! use espboot::{BoardKind, NativePort, Session, SessionConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let port = NativePort::open_simple("/dev/ttyUSB0", 115200)?;
//!     let board = BoardKind::Esp12.create(None);
//!     let mut session = Session::new(port, board, SessionConfig::default());
//!
//!     session.open()?;
//!     session.write_flash_region(0x0, &std::fs::read("boot.bin")?)?;
//!     session.finish(true)?;
//!     session.close()?;
//!     Ok(())
//! }
//! ```

pub mod router;
pub mod sync;

use crate::error::{Error, Result};
use crate::event::{EventHandler, FlashEvent};
use crate::port::Port;
use crate::protocol::command::{Command, ResponseFrame, build_request};
use crate::protocol::slip::{self, SlipDecoder};
use crate::target::Board;
use log::{debug, trace};
use std::thread;
use std::time::{Duration, Instant};

pub use router::{RequestId, ResponseRouter};
pub use sync::{LinkState, SyncCounter};

/// Probe attempts per reset cycle.
pub const PROBE_ATTEMPTS: u32 = 10;

/// Consecutive SYNC successes needed before the link counts as locked on.
pub const REQUIRED_SYNC_COUNT: u32 = 10;

/// Size of a single port read.
const READ_CHUNK: usize = 512;

/// Session timing and retry budget.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long to wait for a response to an ordinary command.
    pub response_timeout: Duration,
    /// Extra time FLASH_BEGIN gets per megabyte it has to erase.
    pub erase_timeout_per_mb: Duration,
    /// Overall budget for [`Session::connect`] (`None` = unbounded).
    pub connect_timeout: Option<Duration>,
    /// Maximum reset cycles for [`Session::connect`] (`None` = unbounded).
    pub max_connect_cycles: Option<u32>,
    /// SYNC probes per reset cycle.
    pub probe_attempts: u32,
    /// Consecutive SYNC successes needed for lock-on.
    pub sync_threshold: u32,
    /// Pause after the reset sequence before probing.
    pub reset_settle: Duration,
    /// Pause after each write before draining the port.
    pub command_settle: Duration,
    /// Longest time spent collecting responses after one probe.
    pub probe_window: Duration,
    /// Port read timeout while polling.
    pub poll_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            response_timeout: Duration::from_secs(3),
            erase_timeout_per_mb: Duration::from_secs(30),
            connect_timeout: Some(Duration::from_secs(30)),
            max_connect_cycles: None,
            probe_attempts: PROBE_ATTEMPTS,
            sync_threshold: REQUIRED_SYNC_COUNT,
            reset_settle: Duration::from_millis(100),
            command_settle: Duration::from_millis(10),
            probe_window: Duration::from_millis(100),
            poll_interval: Duration::from_millis(10),
        }
    }
}

impl SessionConfig {
    /// Set the response timeout.
    #[must_use]
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Set the overall connect budget.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Limit the number of reset cycles during connect.
    #[must_use]
    pub fn with_max_connect_cycles(mut self, cycles: Option<u32>) -> Self {
        self.max_connect_cycles = cycles;
        self
    }

    /// Set the pause after each write.
    #[must_use]
    pub fn with_command_settle(mut self, settle: Duration) -> Self {
        self.command_settle = settle;
        self
    }

    /// Set the pause after the reset sequence.
    #[must_use]
    pub fn with_reset_settle(mut self, settle: Duration) -> Self {
        self.reset_settle = settle;
        self
    }

    /// Set how long each SYNC probe listens for responses.
    #[must_use]
    pub fn with_probe_window(mut self, window: Duration) -> Self {
        self.probe_window = window;
        self
    }

    /// Set the read timeout used while polling the port.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// A boot ROM link over one port.
pub struct Session<P: Port> {
    port: P,
    board: Box<dyn Board>,
    config: SessionConfig,
    decoder: SlipDecoder,
    router: ResponseRouter,
    sync_counter: Option<SyncCounter>,
    state: LinkState,
    events: Option<EventHandler>,
    closed: bool,
}

impl<P: Port> Session<P> {
    /// Bind a port and a board. Nothing is sent until [`Session::open`].
    pub fn new(port: P, board: Box<dyn Board>, config: SessionConfig) -> Self {
        Self {
            port,
            board,
            config,
            decoder: SlipDecoder::default(),
            router: ResponseRouter::new(),
            sync_counter: None,
            state: LinkState::Disconnected,
            events: None,
            closed: false,
        }
    }

    /// Deliver progress events to `handler`.
    #[must_use]
    pub fn with_events<F>(mut self, handler: F) -> Self
    where
        F: FnMut(&FlashEvent) + Send + 'static,
    {
        self.events = Some(Box::new(handler));
        self
    }

    /// Prepare the port for polling and synchronize with the boot ROM.
    pub fn open(&mut self) -> Result<()> {
        if self.closed {
            return Err(Error::Transport(format!("{} is closed", self.port.name())));
        }
        let interval = self.config.poll_interval;
        self.port.set_timeout(interval)?;
        self.connect()
    }

    /// Leave bootloader mode (if still in it) and release the port.
    ///
    /// The port is released even when leaving the bootloader fails; the
    /// first error is returned.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }

        let left = if self.state == LinkState::Synchronized {
            debug!("Leaving bootloader before closing {}", self.port.name());
            self.leave_bootloader()
        } else {
            Ok(())
        };

        let released = self.port.close();
        self.closed = true;
        self.state = LinkState::Disconnected;
        self.sync_counter = None;
        debug!("Closed {}", self.port.name());

        left.and(released)
    }

    /// Current link state.
    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Whether the handshake has locked on.
    pub fn is_synchronized(&self) -> bool {
        self.state == LinkState::Synchronized
    }

    /// Board driving this session.
    pub fn board(&self) -> &dyn Board {
        self.board.as_ref()
    }

    /// Session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Get a reference to the underlying port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Send `command` and wait for its response body.
    ///
    /// Commands that must answer with the success marker fail with
    /// [`Error::Protocol`] when they do not.
    pub fn send_command(&mut self, command: Command, payload: &[u8]) -> Result<Vec<u8>> {
        let timeout = self.config.response_timeout;
        self.send_command_with_timeout(command, payload, timeout)
    }

    /// Send `command` without waiting for a response.
    pub fn send_command_ignore_response(&mut self, command: Command, payload: &[u8]) -> Result<()> {
        let packet = self.encode(command, payload)?;
        self.write_packet(command, &packet)
    }

    pub(crate) fn send_command_with_timeout(
        &mut self,
        command: Command,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<Vec<u8>> {
        let packet = self.encode(command, payload)?;
        let id = self.router.register(command);
        if let Err(e) = self.write_packet(command, &packet) {
            self.router.withdraw(id);
            return Err(e);
        }
        self.wait_for(id, command, timeout)
    }

    fn encode(&self, command: Command, payload: &[u8]) -> Result<Vec<u8>> {
        if command == Command::None {
            return Err(Error::InvalidRequest("NONE cannot be sent".into()));
        }
        if self.closed {
            return Err(Error::Transport(format!("{} is closed", self.port.name())));
        }
        build_request(command, payload)
    }

    fn write_packet(&mut self, command: Command, packet: &[u8]) -> Result<()> {
        trace!("Sending {command}: {} bytes", packet.len());
        self.port
            .write_all_bytes(&slip::encode(packet))?;
        thread::sleep(self.config.command_settle);
        self.port.drain_output()?;
        Ok(())
    }

    fn wait_for(&mut self, id: RequestId, command: Command, timeout: Duration) -> Result<Vec<u8>> {
        let deadline = Instant::now() + timeout;

        loop {
            if let Some(response) = self.router.take(id) {
                return if response.is_success() {
                    Ok(response.body)
                } else {
                    Err(Error::Protocol {
                        command,
                        body: response.body,
                    })
                };
            }

            if crate::is_interrupted_requested() {
                self.router.withdraw(id);
                return Err(Error::Cancelled);
            }

            if Instant::now() >= deadline {
                self.router.withdraw(id);
                return Err(Error::Timeout(format!(
                    "no {command} response within {} ms",
                    timeout.as_millis()
                )));
            }

            if let Err(e) = self.poll() {
                self.router.withdraw(id);
                return Err(e);
            }
        }
    }

    /// Read once from the port and dispatch any completed frames.
    ///
    /// Returns whether any bytes arrived.
    pub(crate) fn poll(&mut self) -> Result<bool> {
        let mut buf = [0u8; READ_CHUNK];
        let n = match self.port.read(&mut buf) {
            Ok(n) => n,
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::TimedOut
                        | std::io::ErrorKind::WouldBlock
                        | std::io::ErrorKind::Interrupted
                ) =>
            {
                0
            },
            Err(e) => return Err(Error::Io(e)),
        };
        if n == 0 {
            return Ok(false);
        }

        trace!("Received {n} bytes");
        for frame in self.decoder.feed(&buf[..n]) {
            self.handle_frame(&frame);
        }
        Ok(true)
    }

    /// Keep reading until the port goes quiet or `window` elapses.
    pub(crate) fn pump_until_idle(&mut self, window: Duration) -> Result<()> {
        let deadline = Instant::now() + window;
        while Instant::now() < deadline {
            if !self.poll()? {
                break;
            }
        }
        Ok(())
    }

    /// Discard unread input, including any half-received frame.
    pub(crate) fn flush_input(&mut self) -> Result<()> {
        self.port.flush_input()?;
        self.decoder.reset();
        Ok(())
    }

    fn handle_frame(&mut self, frame: &[u8]) {
        // The ROM sends garbage until it has locked on; drop it quietly.
        let response = match ResponseFrame::parse(frame) {
            Ok(response) => response,
            Err(e) => {
                debug!("Dropping frame: {e}");
                return;
            },
        };

        let command = response.command();
        let success = response.is_success();
        if !success {
            debug!("{command} returned {:02X?}", response.body);
        }

        if command == Command::Sync {
            self.observe_sync(success);
        }

        if let Some(unclaimed) = self.router.dispatch(response) {
            trace!("No one is waiting for {}, dropping", unclaimed.command());
        }
    }

    /// The target left the boot ROM (or is about to).
    pub(crate) fn mark_finished(&mut self) {
        self.sync_counter = None;
        self.state = LinkState::Disconnected;
    }

    pub(crate) fn emit(&mut self, event: FlashEvent) {
        if let Some(handler) = self.events.as_mut() {
            handler(&event);
        }
    }

    /// Emit an error event for a failed public operation.
    pub(crate) fn report<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(ref e) = result {
            self.emit(FlashEvent::from_error(e));
        }
        result
    }
}
