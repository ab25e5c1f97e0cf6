//! Reset and SYNC handshake.
//!
//! ```text
//!  Disconnected --connect()--> Resetting --settle--> Probing
//!                                  ^                   |  |
//!                                  +-- probes spent ---+  |
//!                                                         v
//!                                  10 consecutive SYNC acks: Synchronized
//! ```
//!
//! The boot ROM answers a SYNC with several responses and often garbles
//! the first few, so probes are fired without waiting and a side counter
//! tallies successful SYNC responses as they arrive.

use crate::error::{Error, Result};
use crate::event::FlashEvent;
use crate::port::Port;
use crate::protocol::command::{Command, SYNC_PAYLOAD};
use crate::session::Session;
use log::{debug, info, warn};
use std::thread;
use std::time::Instant;

/// Link state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum LinkState {
    /// No handshake yet (or the link was finished/closed).
    #[default]
    Disconnected,
    /// Toggling the control lines.
    Resetting,
    /// Firing SYNC probes.
    Probing,
    /// Locked on; commands can be issued.
    Synchronized,
}

/// Counts consecutive successful SYNC responses.
#[derive(Debug, Clone)]
pub struct SyncCounter {
    consecutive: u32,
    threshold: u32,
}

impl SyncCounter {
    /// Counter that fires after `threshold` consecutive successes.
    pub fn new(threshold: u32) -> Self {
        Self {
            consecutive: 0,
            threshold,
        }
    }

    /// Record one SYNC response. Returns `true` once the threshold is hit.
    pub fn observe(&mut self, success: bool) -> bool {
        if success {
            self.consecutive += 1;
        } else {
            self.consecutive = 0;
        }
        self.consecutive >= self.threshold
    }

    /// Successes counted so far.
    pub fn count(&self) -> u32 {
        self.consecutive
    }
}

impl<P: Port> Session<P> {
    /// Reset the board and probe until the boot ROM locks on.
    ///
    /// Bounded by [`SessionConfig::connect_timeout`](super::SessionConfig)
    /// and [`SessionConfig::max_connect_cycles`](super::SessionConfig), and
    /// aborted when the interrupt checker fires.
    pub fn connect(&mut self) -> Result<()> {
        let result = self.run_connect();
        if result.is_err() {
            self.sync_counter = None;
            self.state = LinkState::Disconnected;
        }
        self.report(result)
    }

    /// Send one SYNC, wait for its response and mark the link synchronized.
    pub fn sync(&mut self) -> Result<()> {
        let result = self
            .send_command(Command::Sync, &SYNC_PAYLOAD)
            .map(|_| {
                self.sync_counter = None;
                self.state = LinkState::Synchronized;
            });
        if result.is_ok() {
            self.emit(FlashEvent::Synchronized);
        }
        self.report(result)
    }

    fn run_connect(&mut self) -> Result<()> {
        info!(
            "Connecting to {} boot ROM on {}",
            self.board.kind(),
            self.port.name()
        );

        let started = Instant::now();
        let mut cycle = 0u32;

        loop {
            self.check_connect_budget(started, cycle)?;
            cycle += 1;

            if self.connect_attempt(started)? {
                info!("Synchronized after {cycle} reset cycle(s)");
                self.emit(FlashEvent::Synchronized);
                return Ok(());
            }

            warn!("No SYNC lock-on in reset cycle {cycle}, retrying");
        }
    }

    fn check_connect_budget(&self, started: Instant, cycle: u32) -> Result<()> {
        if crate::is_interrupted_requested() {
            return Err(Error::Cancelled);
        }
        if let Some(limit) = self
            .config
            .connect_timeout
            .filter(|limit| started.elapsed() >= *limit)
        {
            return Err(Error::Timeout(format!(
                "boot ROM did not respond within {} s",
                limit.as_secs_f32()
            )));
        }
        if let Some(max) = self
            .config
            .max_connect_cycles
            .filter(|max| cycle >= *max)
        {
            return Err(Error::HandshakeFailed(format!(
                "no lock-on after {max} reset cycle(s)"
            )));
        }
        Ok(())
    }

    /// One reset followed by up to `probe_attempts` SYNC probes.
    fn connect_attempt(&mut self, started: Instant) -> Result<bool> {
        self.state = LinkState::Resetting;
        self.sync_counter = Some(SyncCounter::new(self.config.sync_threshold));
        self.board
            .reset_into_bootloader(&mut self.port)?;
        thread::sleep(self.config.reset_settle);

        self.state = LinkState::Probing;
        for attempt in 1..=self.config.probe_attempts {
            if crate::is_interrupted_requested() {
                return Err(Error::Cancelled);
            }
            if self
                .config
                .connect_timeout
                .is_some_and(|limit| started.elapsed() >= limit)
            {
                break;
            }

            self.flush_input()?;
            debug!("SYNC probe {attempt}/{}", self.config.probe_attempts);
            self.send_command_ignore_response(Command::Sync, &SYNC_PAYLOAD)?;
            let window = self.config.probe_window;
            self.pump_until_idle(window)?;

            if self.state == LinkState::Synchronized {
                return Ok(true);
            }
        }

        Ok(false)
    }

    /// Feed one SYNC response to the lock-on counter, if it is listening.
    pub(crate) fn observe_sync(&mut self, success: bool) {
        let Some(counter) = self.sync_counter.as_mut() else {
            return;
        };
        if counter.observe(success) {
            debug!("{} consecutive SYNC responses, locked on", counter.count());
            self.sync_counter = None;
            self.state = LinkState::Synchronized;
        }
    }
}
