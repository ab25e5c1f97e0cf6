//! Request/response correlation.
//!
//! The wire format carries no request identifier, so responses are matched
//! by command. Every request gets its own [`RequestId`], queued per command;
//! a response resolves the oldest outstanding request for its command.
//! Issuing the same command twice therefore queues the second waiter
//! instead of losing a response.

use crate::protocol::command::{Command, ResponseFrame};
use log::debug;
use std::collections::{HashMap, VecDeque};

/// Identifies one outstanding request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

/// Correlation table between requests and responses.
#[derive(Debug, Default)]
pub struct ResponseRouter {
    next_id: u64,
    waiting: HashMap<Command, VecDeque<RequestId>>,
    resolved: HashMap<RequestId, ResponseFrame>,
}

impl ResponseRouter {
    /// Create an empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest in the next unclaimed response to `command`.
    pub fn register(&mut self, command: Command) -> RequestId {
        let id = RequestId(self.next_id);
        self.next_id += 1;

        let queue = self
            .waiting
            .entry(command)
            .or_default();
        if !queue.is_empty() {
            debug!(
                "{command} already awaited by {} request(s), queueing {id:?}",
                queue.len()
            );
        }
        queue.push_back(id);
        id
    }

    /// Hand a response to the oldest waiter for its command.
    ///
    /// Returns the response back if nobody was waiting for it.
    pub fn dispatch(&mut self, response: ResponseFrame) -> Option<ResponseFrame> {
        let Some(id) = self
            .waiting
            .get_mut(&response.command())
            .and_then(VecDeque::pop_front)
        else {
            return Some(response);
        };
        self.resolved.insert(id, response);
        None
    }

    /// Take the response for `id`, if it has arrived.
    pub fn take(&mut self, id: RequestId) -> Option<ResponseFrame> {
        self.resolved.remove(&id)
    }

    /// Forget `id`, whether or not its response arrived.
    pub fn withdraw(&mut self, id: RequestId) {
        self.resolved.remove(&id);
        for queue in self.waiting.values_mut() {
            queue.retain(|&waiting| waiting != id);
        }
    }

    /// Number of requests still waiting for a `command` response.
    pub fn pending(&self, command: Command) -> usize {
        self.waiting
            .get(&command)
            .map_or(0, VecDeque::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::command::{Direction, FrameHeader};

    fn frame(command: Command, body: &[u8]) -> ResponseFrame {
        ResponseFrame {
            header: FrameHeader {
                direction: Direction::Response,
                command,
                size: u16::try_from(body.len()).unwrap(),
                checksum: 0,
            },
            body: body.to_vec(),
        }
    }

    #[test]
    fn test_dispatch_to_waiter() {
        let mut router = ResponseRouter::new();
        let id = router.register(Command::FlashBegin);
        assert!(router.take(id).is_none());

        assert!(router.dispatch(frame(Command::FlashBegin, &[0, 0])).is_none());
        assert_eq!(router.take(id).unwrap().body, vec![0, 0]);
        assert!(router.take(id).is_none());
        assert_eq!(router.pending(Command::FlashBegin), 0);
    }

    #[test]
    fn test_unclaimed_response_returned() {
        let mut router = ResponseRouter::new();
        router.register(Command::FlashData);
        let unclaimed = router.dispatch(frame(Command::Sync, &[0, 0]));
        assert_eq!(unclaimed.unwrap().command(), Command::Sync);
        assert_eq!(router.pending(Command::FlashData), 1);
    }

    #[test]
    fn test_duplicate_requests_are_queued() {
        let mut router = ResponseRouter::new();
        let first = router.register(Command::ReadReg);
        let second = router.register(Command::ReadReg);
        assert_ne!(first, second);
        assert_eq!(router.pending(Command::ReadReg), 2);

        router.dispatch(frame(Command::ReadReg, &[1]));
        router.dispatch(frame(Command::ReadReg, &[2]));

        assert_eq!(router.take(first).unwrap().body, vec![1]);
        assert_eq!(router.take(second).unwrap().body, vec![2]);
    }

    #[test]
    fn test_withdrawn_waiter_does_not_swallow_response() {
        let mut router = ResponseRouter::new();
        let stale = router.register(Command::FlashData);
        let live = router.register(Command::FlashData);
        router.withdraw(stale);

        assert!(router.dispatch(frame(Command::FlashData, &[0, 0])).is_none());
        assert!(router.take(stale).is_none());
        assert!(router.take(live).is_some());
    }
}
