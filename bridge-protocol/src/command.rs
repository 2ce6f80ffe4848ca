//! Framed board-control protocol.
//!
//! A request is the 3-byte [`SYNC`] sequence, one opcode byte and, for opcodes that
//! carry data, one payload byte. The reply to every executed request is a 9-byte
//! [`Response`]: the same sync sequence, the echoed opcode, a result kind and a
//! little-endian `u32` result value.
//!
//! Decoding is a pure transition function ([`CommandState::step`]) fed one byte at a
//! time, so a frame split over any number of reads decodes the same as a frame read
//! at once.
use std::fmt::Display;

use crate::error::ReadError;

/// Leading bytes of every request and response frame.
pub const SYNC: [u8; 3] = [0x04, 0x20, 0x69];

/// Length of an encoded [`Response`].
pub const RESPONSE_LEN: usize = 9;

/// Value returned by [`Opcode::Ping`].
pub const PING_PATTERN: u32 = 0x6969_6969;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// Drive the boot-mode line. Payload: mode bit.
    SetBootMode = 0,
    GetBootMode = 1,
    /// Pulse the board reset line low.
    ResetBoard = 2,
    /// Start or stop the XVC service. Payload: enable bit.
    SetXvcRunning = 3,
    GetXvcRunning = 4,
    /// Start or stop the serial bridge. Payload: enable bit.
    SetSerialRunning = 5,
    GetSerialRunning = 6,
    /// Forget the stored network credentials and reboot. Never answered.
    ReconfigureNetwork = 7,
    /// Set the verbose-log flag. Payload: enable bit.
    SetVerbose = 8,
    GetVerbose = 9,
    /// Reboot the bridge. Never answered.
    Reboot = 10,
    /// Answered with [`PING_PATTERN`].
    Ping = 100,
}

impl Opcode {
    /// Whether a payload byte follows the opcode.
    pub fn needs_payload(self) -> bool {
        matches!(
            self,
            Opcode::SetBootMode
                | Opcode::SetXvcRunning
                | Opcode::SetSerialRunning
                | Opcode::SetVerbose
        )
    }

    /// Whether executing the opcode ends the process, so no response ever arrives.
    pub fn is_fail_stop(self) -> bool {
        matches!(self, Opcode::ReconfigureNetwork | Opcode::Reboot)
    }
}

impl TryFrom<u8> for Opcode {
    type Error = ReadError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Opcode::SetBootMode,
            1 => Opcode::GetBootMode,
            2 => Opcode::ResetBoard,
            3 => Opcode::SetXvcRunning,
            4 => Opcode::GetXvcRunning,
            5 => Opcode::SetSerialRunning,
            6 => Opcode::GetSerialRunning,
            7 => Opcode::ReconfigureNetwork,
            8 => Opcode::SetVerbose,
            9 => Opcode::GetVerbose,
            10 => Opcode::Reboot,
            100 => Opcode::Ping,
            other => return Err(ReadError::UnknownOpcode(other)),
        })
    }
}

impl Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}({})", self, *self as u8)
    }
}

/// A fully decoded request.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Request {
    pub opcode: Opcode,
    pub payload: Option<u8>,
}

impl Request {
    pub fn new(opcode: Opcode) -> Request {
        Request {
            opcode,
            payload: None,
        }
    }

    pub fn with_payload(opcode: Opcode, payload: u8) -> Request {
        Request {
            opcode,
            payload: Some(payload),
        }
    }

    /// The payload interpreted as an enable/level bit.
    pub fn flag(&self) -> bool {
        self.payload.is_some_and(|p| p != 0)
    }

    /// Encodes the request. Returns the buffer and the number of valid bytes in it.
    pub fn encode(&self) -> ([u8; 5], usize) {
        let mut frame = [0u8; 5];
        frame[..3].copy_from_slice(&SYNC);
        frame[3] = self.opcode as u8;
        if self.opcode.needs_payload() {
            frame[4] = self.payload.unwrap_or(0);
            (frame, 5)
        } else {
            (frame, 4)
        }
    }
}

/// Kind of the value carried by a [`Response`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ResultKind {
    Status,
    Other(u8),
}

impl From<u8> for ResultKind {
    fn from(value: u8) -> Self {
        match value {
            0 => ResultKind::Status,
            other => ResultKind::Other(other),
        }
    }
}

impl From<ResultKind> for u8 {
    fn from(value: ResultKind) -> Self {
        match value {
            ResultKind::Status => 0,
            ResultKind::Other(other) => other,
        }
    }
}

/// Reply to an executed request.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Response {
    pub opcode: u8,
    pub kind: ResultKind,
    pub value: u32,
}

impl Response {
    pub fn status(opcode: Opcode, value: u32) -> Response {
        Response {
            opcode: opcode as u8,
            kind: ResultKind::Status,
            value,
        }
    }

    pub fn to_bytes(&self) -> [u8; RESPONSE_LEN] {
        let mut frame = [0u8; RESPONSE_LEN];
        frame[..3].copy_from_slice(&SYNC);
        frame[3] = self.opcode;
        frame[4] = self.kind.into();
        frame[5..].copy_from_slice(&self.value.to_le_bytes());
        frame
    }

    pub fn from_bytes(frame: &[u8; RESPONSE_LEN]) -> Result<Response, ReadError> {
        if frame[..3] != SYNC {
            return Err(ReadError::HeaderMismatch([frame[0], frame[1], frame[2]]));
        }
        let mut value = [0u8; 4];
        value.copy_from_slice(&frame[5..]);
        Ok(Response {
            opcode: frame[3],
            kind: frame[4].into(),
            value: u32::from_le_bytes(value),
        })
    }
}

/// Decoder state of a command connection.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum CommandState {
    /// Waiting for the first sync byte.
    #[default]
    Idle,
    /// First sync byte seen.
    Sync1,
    /// Two sync bytes seen.
    Sync2,
    /// Full sync seen, the next byte is the opcode.
    HaveOpcode,
    /// Opcode seen, the next byte is its payload.
    AwaitingPayload(Opcode),
}

impl CommandState {
    /// Feeds one received byte. Returns the next state and, when the byte completes a
    /// frame, the request to execute.
    ///
    /// A byte that breaks the sync sequence is checked again as the start of a new
    /// frame, so no frame is lost when the garbage before it ends in a sync byte.
    /// Unknown opcodes drop the frame silently.
    pub fn step(self, byte: u8) -> (CommandState, Option<Request>) {
        match self {
            CommandState::Idle => (Self::restart(byte), None),
            CommandState::Sync1 if byte == SYNC[1] => (CommandState::Sync2, None),
            CommandState::Sync2 if byte == SYNC[2] => (CommandState::HaveOpcode, None),
            CommandState::Sync1 | CommandState::Sync2 => (Self::restart(byte), None),
            CommandState::HaveOpcode => match Opcode::try_from(byte) {
                Ok(opcode) if opcode.needs_payload() => {
                    (CommandState::AwaitingPayload(opcode), None)
                }
                Ok(opcode) => (CommandState::Idle, Some(Request::new(opcode))),
                Err(_) => (CommandState::Idle, None),
            },
            CommandState::AwaitingPayload(opcode) => (
                CommandState::Idle,
                Some(Request::with_payload(opcode, byte)),
            ),
        }
    }

    fn restart(byte: u8) -> CommandState {
        if byte == SYNC[0] {
            CommandState::Sync1
        } else {
            CommandState::Idle
        }
    }

    /// Position in the frame, `0` (idle) to `4` (awaiting payload).
    pub fn index(&self) -> u8 {
        match self {
            CommandState::Idle => 0,
            CommandState::Sync1 => 1,
            CommandState::Sync2 => 2,
            CommandState::HaveOpcode => 3,
            CommandState::AwaitingPayload(_) => 4,
        }
    }
}
