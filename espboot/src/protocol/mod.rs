//! Boot ROM wire protocol: SLIP framing and the command/response format.

pub mod command;
pub mod slip;

// Re-export common types
pub use command::{
    Command, Direction, FrameHeader, ResponseFrame, SUCCESS, SYNC_PAYLOAD, build_header,
    build_request, checksum, parse_header,
};
pub use slip::SlipDecoder;
