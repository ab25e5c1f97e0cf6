//! Scripted in-memory port for unit tests.

use crate::error::{Error, Result};
use crate::port::{ControlLines, Port};
use crate::protocol::command::{Command, FrameHeader, HEADER_LEN, SUCCESS};
use crate::protocol::slip::{self, SlipDecoder};
use std::collections::VecDeque;
use std::io::{Read, Write};
use std::time::Duration;

type Responder = Box<dyn FnMut(Command, &[u8]) -> Vec<Vec<u8>> + Send>;

/// Build a raw (unencoded) response frame.
pub(crate) fn response(command: Command, body: &[u8]) -> Vec<u8> {
    let mut frame = vec![
        0x01,
        command.code(),
        u8::try_from(body.len()).unwrap(),
        0,
        0,
        0,
        0,
        0,
    ];
    frame.extend_from_slice(body);
    frame
}

/// A request as seen by the target.
#[derive(Debug, Clone)]
pub(crate) struct SentRequest {
    pub header: FrameHeader,
    pub payload: Vec<u8>,
}

pub(crate) struct MockPort {
    inbound: VecDeque<u8>,
    decoder: SlipDecoder,
    responder: Responder,
    pub requests: Vec<SentRequest>,
    pub lines: Vec<ControlLines>,
    pub input_flushes: usize,
    pub closed: bool,
    pub fail_lines: bool,
}

impl MockPort {
    pub(crate) fn new<F>(responder: F) -> Self
    where
        F: FnMut(Command, &[u8]) -> Vec<Vec<u8>> + Send + 'static,
    {
        Self {
            inbound: VecDeque::new(),
            decoder: SlipDecoder::default(),
            responder: Box::new(responder),
            requests: Vec::new(),
            lines: Vec::new(),
            input_flushes: 0,
            closed: false,
            fail_lines: false,
        }
    }

    /// Target that answers every request once with the success marker.
    pub(crate) fn echo_success() -> Self {
        Self::new(|command, _| vec![response(command, &SUCCESS)])
    }

    /// Target that never answers.
    pub(crate) fn silent() -> Self {
        Self::new(|_, _| Vec::new())
    }

    /// Queue raw bytes as if the target had sent them.
    pub(crate) fn push_inbound(&mut self, bytes: &[u8]) {
        self.inbound.extend(bytes);
    }

    /// Queue a response frame, SLIP encoded.
    pub(crate) fn push_response(&mut self, frame: &[u8]) {
        let encoded = slip::encode(frame);
        self.push_inbound(&encoded);
    }

    pub(crate) fn commands(&self) -> Vec<Command> {
        self.requests
            .iter()
            .map(|r| r.header.command)
            .collect()
    }

    pub(crate) fn payloads(&self, command: Command) -> Vec<&[u8]> {
        self.requests
            .iter()
            .filter(|r| r.header.command == command)
            .map(|r| r.payload.as_slice())
            .collect()
    }
}

impl Port for MockPort {
    fn set_timeout(&mut self, _timeout: Duration) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }

    fn flush_input(&mut self) -> Result<()> {
        self.inbound.clear();
        self.input_flushes += 1;
        Ok(())
    }

    fn drain_output(&mut self) -> Result<()> {
        Ok(())
    }

    fn set_control_lines(&mut self, lines: ControlLines) -> Result<()> {
        if self.fail_lines {
            return Err(Error::Transport("line set failed".into()));
        }
        self.lines.push(lines);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

impl Read for MockPort {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.inbound.is_empty() {
            return Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "no data"));
        }
        let n = buf.len().min(self.inbound.len());
        for (slot, byte) in buf.iter_mut().zip(self.inbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for MockPort {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        for frame in self.decoder.feed(buf) {
            let header = FrameHeader::parse(&frame).unwrap();
            let payload = frame[HEADER_LEN..].to_vec();
            let replies = (self.responder)(header.command, &payload);
            self.requests.push(SentRequest { header, payload });
            for reply in replies {
                self.push_response(&reply);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
