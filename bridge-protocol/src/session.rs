//! Incremental XVC decoder for non-blocking connections.
//!
//! The session never reads more than the current state needs. The owner asks for the
//! slice still to be filled with [`XvcSession::demand`], reads whatever the connection
//! has into it and reports the count with [`XvcSession::advance`]. Once a state has
//! received exactly the bytes it needs, the session moves on and, at the end of a
//! command, yields a [`SessionEvent`].
//!
//! Only the first two bytes of a command tag are matched (`ge`, `se`, `sh`). The rest
//! of the tag is consumed without being checked.
use crate::error::ReadError;

/// Bytes of the command tag that select the command.
const PREFIX_LEN: usize = 2;
/// `tinfo:`
const GET_INFO_REST: usize = b"getinfo:".len() - PREFIX_LEN;
/// `ttck:` and the 4-byte period
const SET_TCK_REST: usize = b"settck:".len() - PREFIX_LEN + 4;
/// `ift:` and the 4-byte bit count
const SHIFT_REST: usize = b"shift:".len() - PREFIX_LEN + 4;

const HEADER_LEN: usize = 16;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SessionState {
    WaitingCommand,
    GetInfo,
    SetClock,
    ShiftHeader,
    ShiftData,
    Error,
}

/// A completely received command.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SessionEvent {
    GetInfo,
    SetTck { period_ns: u32 },
    /// The vectors are in [`XvcSession::vectors_mut`]: `num_bytes` of TMS followed by
    /// `num_bytes` of TDI.
    Shift { num_bits: u32, num_bytes: usize },
}

#[derive(Debug)]
pub struct XvcSession {
    state: SessionState,
    header: [u8; HEADER_LEN],
    buffer: Box<[u8]>,
    capacity: usize,
    needed: usize,
    position: usize,
    num_bits: u32,
    num_bytes: usize,
}

impl XvcSession {
    /// Creates a session that accepts shifts of up to `capacity` bytes per vector.
    pub fn new(capacity: usize) -> XvcSession {
        XvcSession {
            state: SessionState::WaitingCommand,
            header: [0; HEADER_LEN],
            buffer: vec![0; 2 * capacity].into_boxed_slice(),
            capacity,
            needed: PREFIX_LEN,
            position: 0,
            num_bits: 0,
            num_bytes: 0,
        }
    }

    /// Drops any partially received command.
    pub fn reset(&mut self) {
        self.enter(SessionState::WaitingCommand, PREFIX_LEN);
        self.num_bits = 0;
        self.num_bytes = 0;
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The shift capacity in bytes per vector.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes still missing before the current state can advance.
    pub fn remaining(&self) -> usize {
        self.needed - self.position
    }

    /// The slice that the next received bytes must be written to.
    /// Empty once the session is in the error state.
    pub fn demand(&mut self) -> &mut [u8] {
        let (position, needed) = (self.position, self.needed);
        match self.state {
            SessionState::Error => &mut [],
            SessionState::ShiftData => &mut self.buffer[position..needed],
            _ => &mut self.header[position..needed],
        }
    }

    /// Records that `count` bytes were written to the front of [`XvcSession::demand`].
    ///
    /// # Panics
    ///
    /// Panics if `count` exceeds [`XvcSession::remaining`].
    pub fn advance(&mut self, count: usize) -> Result<Option<SessionEvent>, ReadError> {
        if self.state == SessionState::Error {
            return Err(ReadError::InvalidFormat(
                "Session is in the error state".to_string(),
            ));
        }
        assert!(count <= self.remaining(), "advanced past the demanded bytes");
        self.position += count;
        if self.position < self.needed {
            return Ok(None);
        }
        self.complete()
    }

    /// Copies as much of `input` as the session needs, stopping after the first event.
    /// Returns the number of bytes consumed.
    pub fn feed(&mut self, input: &[u8]) -> Result<(usize, Option<SessionEvent>), ReadError> {
        let mut consumed = 0;
        while consumed < input.len() {
            let target = self.demand();
            let count = target.len().min(input.len() - consumed);
            target[..count].copy_from_slice(&input[consumed..consumed + count]);
            consumed += count;
            if let Some(event) = self.advance(count)? {
                return Ok((consumed, Some(event)));
            }
        }
        Ok((consumed, None))
    }

    /// The TMS and TDI vectors of the last shift. Shifting in place replaces the TMS
    /// vector by the captured TDO bits.
    pub fn vectors_mut(&mut self) -> &mut [u8] {
        &mut self.buffer[..2 * self.num_bytes]
    }

    /// The first vector of the last shift, which holds TDO once the shift ran.
    pub fn tdo(&self) -> &[u8] {
        &self.buffer[..self.num_bytes]
    }

    fn enter(&mut self, state: SessionState, needed: usize) {
        self.state = state;
        self.needed = needed;
        self.position = 0;
    }

    fn fail(&mut self, error: ReadError) -> Result<Option<SessionEvent>, ReadError> {
        self.enter(SessionState::Error, 0);
        Err(error)
    }

    fn complete(&mut self) -> Result<Option<SessionEvent>, ReadError> {
        match self.state {
            SessionState::WaitingCommand => {
                let prefix = [self.header[0], self.header[1]];
                match &prefix {
                    b"ge" => self.enter(SessionState::GetInfo, GET_INFO_REST),
                    b"se" => self.enter(SessionState::SetClock, SET_TCK_REST),
                    b"sh" => self.enter(SessionState::ShiftHeader, SHIFT_REST),
                    prefix => {
                        let prefix = String::from_utf8_lossy(prefix).to_string();
                        return self.fail(ReadError::InvalidCommandPrefix(prefix));
                    }
                }
                Ok(None)
            }
            SessionState::GetInfo => {
                self.enter(SessionState::WaitingCommand, PREFIX_LEN);
                Ok(Some(SessionEvent::GetInfo))
            }
            SessionState::SetClock => {
                let period_ns = read_u32(&self.header[SET_TCK_REST - 4..SET_TCK_REST]);
                self.enter(SessionState::WaitingCommand, PREFIX_LEN);
                Ok(Some(SessionEvent::SetTck { period_ns }))
            }
            SessionState::ShiftHeader => {
                let num_bits = read_u32(&self.header[SHIFT_REST - 4..SHIFT_REST]);
                let num_bytes = num_bits.div_ceil(8) as usize;
                if num_bytes > self.capacity {
                    return self.fail(ReadError::TooManyBytes {
                        max: self.capacity,
                        got: num_bytes,
                    });
                }
                self.num_bits = num_bits;
                self.num_bytes = num_bytes;
                if num_bytes == 0 {
                    self.enter(SessionState::WaitingCommand, PREFIX_LEN);
                    return Ok(Some(SessionEvent::Shift {
                        num_bits,
                        num_bytes,
                    }));
                }
                self.enter(SessionState::ShiftData, 2 * num_bytes);
                Ok(None)
            }
            SessionState::ShiftData => {
                self.enter(SessionState::WaitingCommand, PREFIX_LEN);
                Ok(Some(SessionEvent::Shift {
                    num_bits: self.num_bits,
                    num_bytes: self.num_bytes,
                }))
            }
            SessionState::Error => unreachable!("error state never completes"),
        }
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(bytes);
    u32::from_le_bytes(buf)
}

#[cfg(test)]
mod test {
    use super::*;

    fn shift_request(num_bits: u32, tms: &[u8], tdi: &[u8]) -> Vec<u8> {
        let mut data = b"shift:".to_vec();
        data.extend_from_slice(&num_bits.to_le_bytes());
        data.extend_from_slice(tms);
        data.extend_from_slice(tdi);
        data
    }

    #[test]
    fn getinfo() {
        let mut session = XvcSession::new(64);
        let (consumed, event) = session.feed(b"getinfo:").unwrap();
        assert_eq!(consumed, 8);
        assert_eq!(event, Some(SessionEvent::GetInfo));
        assert_eq!(session.state(), SessionState::WaitingCommand);
    }

    #[test]
    fn settck() {
        let mut session = XvcSession::new(64);
        let mut data = b"settck:".to_vec();
        data.extend_from_slice(&0x1234_5678u32.to_le_bytes());
        let (_, event) = session.feed(&data).unwrap();
        assert_eq!(
            event,
            Some(SessionEvent::SetTck {
                period_ns: 0x1234_5678
            })
        );
    }

    #[test]
    fn shift_exposes_vectors() {
        let mut session = XvcSession::new(64);
        let data = shift_request(13, &[0xAA, 0x0A], &[0x55, 0x15]);
        let (consumed, event) = session.feed(&data).unwrap();
        assert_eq!(consumed, data.len());
        assert_eq!(
            event,
            Some(SessionEvent::Shift {
                num_bits: 13,
                num_bytes: 2
            })
        );
        assert_eq!(session.vectors_mut(), &[0xAA, 0x0A, 0x55, 0x15]);
    }

    #[test]
    fn byte_at_a_time_matches_whole_frame() {
        let data = shift_request(24, &[1, 2, 3], &[4, 5, 6]);
        let mut session = XvcSession::new(64);
        let mut events = Vec::new();
        for byte in &data {
            let (consumed, event) = session.feed(std::slice::from_ref(byte)).unwrap();
            assert_eq!(consumed, 1);
            events.extend(event);
        }
        assert_eq!(
            events,
            vec![SessionEvent::Shift {
                num_bits: 24,
                num_bytes: 3
            }]
        );
        assert_eq!(session.vectors_mut(), &[1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn feed_stops_after_each_event() {
        let mut data = b"getinfo:".to_vec();
        data.extend_from_slice(b"getinfo:");
        let mut session = XvcSession::new(64);
        let (consumed, event) = session.feed(&data).unwrap();
        assert_eq!(consumed, 8);
        assert_eq!(event, Some(SessionEvent::GetInfo));
        let (consumed, event) = session.feed(&data[8..]).unwrap();
        assert_eq!(consumed, 8);
        assert_eq!(event, Some(SessionEvent::GetInfo));
    }

    #[test]
    fn only_the_prefix_is_matched() {
        let mut session = XvcSession::new(64);
        let (_, event) = session.feed(b"gexxxxx:").unwrap();
        assert_eq!(event, Some(SessionEvent::GetInfo));
    }

    #[test]
    fn demand_never_exceeds_the_state() {
        let mut session = XvcSession::new(64);
        assert_eq!(session.demand().len(), 2);
        session.feed(b"sh").unwrap();
        assert_eq!(session.demand().len(), 8);
        session.feed(b"ift:").unwrap();
        assert_eq!(session.remaining(), 4);
        session.feed(&16u32.to_le_bytes()).unwrap();
        assert_eq!(session.state(), SessionState::ShiftData);
        assert_eq!(session.demand().len(), 4);
    }

    #[test]
    fn zero_bit_shift() {
        let mut session = XvcSession::new(64);
        let (_, event) = session.feed(&shift_request(0, &[], &[])).unwrap();
        assert_eq!(
            event,
            Some(SessionEvent::Shift {
                num_bits: 0,
                num_bytes: 0
            })
        );
        assert!(session.tdo().is_empty());
        assert_eq!(session.state(), SessionState::WaitingCommand);
    }

    #[test]
    fn full_capacity_shift() {
        let mut session = XvcSession::new(4);
        let (_, event) = session
            .feed(&shift_request(32, &[0; 4], &[0xff; 4]))
            .unwrap();
        assert_eq!(
            event,
            Some(SessionEvent::Shift {
                num_bits: 32,
                num_bytes: 4
            })
        );
    }

    #[test]
    fn invalid_prefix() {
        let mut session = XvcSession::new(64);
        match session.feed(b"xx") {
            Err(ReadError::InvalidCommandPrefix(p)) => assert_eq!(p, "xx"),
            other => panic!("expected InvalidCommandPrefix, got {:?}", other),
        }
        assert_eq!(session.state(), SessionState::Error);
        assert!(session.demand().is_empty());
        session.reset();
        assert_eq!(session.feed(b"getinfo:").unwrap().1, Some(SessionEvent::GetInfo));
    }

    #[test]
    fn too_many_bytes_shift() {
        let mut session = XvcSession::new(1024);
        let num_bits = (1025 * 8) as u32;
        let mut data = b"shift:".to_vec();
        data.extend_from_slice(&num_bits.to_le_bytes());
        match session.feed(&data) {
            Err(ReadError::TooManyBytes { max, got }) => {
                assert_eq!(max, 1024);
                assert_eq!(got, 1025);
            }
            other => panic!("expected TooManyBytes, got {:?}", other),
        }
        assert_eq!(session.state(), SessionState::Error);
    }

    #[test]
    fn one_bit_over_capacity_is_rejected() {
        let mut session = XvcSession::new(4);
        let mut data = b"shift:".to_vec();
        data.extend_from_slice(&33u32.to_le_bytes());
        assert!(matches!(
            session.feed(&data),
            Err(ReadError::TooManyBytes { max: 4, got: 5 })
        ));
    }
}
