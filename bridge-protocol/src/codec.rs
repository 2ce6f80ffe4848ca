/// Blocking read and write implementations for the protocol messages
use std::io::{self, BufRead, BufReader, Read, Write};

use crate::{
    command::{RESPONSE_LEN, Request, Response},
    error::ReadError,
    protocol::{Message, Version, XvcInfo},
};

const XVC_INFO_PREFIX: &[u8] = b"xvcServer";

impl XvcInfo {
    pub fn write_to(&self, writer: &mut impl Write) -> io::Result<()> {
        writeln!(
            writer,
            "xvcServer_v{}:{}",
            self.version(),
            self.max_vector_len()
        )
    }

    pub fn from_reader(reader: &mut impl Read) -> Result<XvcInfo, ReadError> {
        let mut buf_reader = BufReader::with_capacity(32, reader);
        let mut line = Vec::with_capacity(32);
        let _ = buf_reader.read_until(b'\n', &mut line)?;

        let line = line.trim_ascii_end();

        // Parse format: "xvcServer_v{version}:{max_vector_len_bytes}"
        let rest = line
            .strip_prefix(XVC_INFO_PREFIX)
            .and_then(|rest| rest.strip_prefix(b"_v"))
            .ok_or_else(|| ReadError::InvalidFormat("Invalid prefix in info message".to_string()))?;

        let colon_index = rest.iter().position(|l| *l == b':').ok_or_else(|| {
            ReadError::InvalidFormat("Missing ':' separator in info message".to_string())
        })?;
        let (version_part, len_part) = rest.split_at(colon_index);

        let version = match version_part {
            b"1.0" => Version::V1_0,
            _ => {
                return Err(ReadError::UnsupportedVersion(
                    String::from_utf8_lossy(version_part).to_string(),
                ));
            }
        };

        let max_vector_len = str::from_utf8(&len_part[1..])?.parse::<u32>()?;

        Ok(XvcInfo::new(version, max_vector_len))
    }
}

impl Message {
    const CMD_NAME_GET_INFO: &[u8; 7] = b"getinfo";
    const CMD_NAME_SET_TCK: &[u8; 6] = b"settck";
    const CMD_NAME_SHIFT: &[u8; 5] = b"shift";
    const CMD_DELIMITER: u8 = b':';

    pub fn write_to(&self, writer: &mut impl Write) -> io::Result<()> {
        match self {
            Message::GetInfo => {
                writer.write_all(Self::CMD_NAME_GET_INFO)?;
                writer.write_all(&[Self::CMD_DELIMITER])
            }
            Message::SetTck { period_ns } => {
                writer.write_all(Self::CMD_NAME_SET_TCK)?;
                writer.write_all(&[Self::CMD_DELIMITER])?;
                writer.write_all(&period_ns.to_le_bytes())
            }
            Message::Shift { num_bits, tms, tdi } => {
                writer.write_all(Self::CMD_NAME_SHIFT)?;
                writer.write_all(&[Self::CMD_DELIMITER])?;
                writer.write_all(&num_bits.to_le_bytes())?;
                writer.write_all(tms)?;
                writer.write_all(tdi)
            }
        }
    }
}

impl Request {
    pub fn write_to(&self, writer: &mut impl Write) -> io::Result<()> {
        let (frame, len) = self.encode();
        writer.write_all(&frame[..len])
    }
}

impl Response {
    pub fn write_to(&self, writer: &mut impl Write) -> io::Result<()> {
        writer.write_all(&self.to_bytes())
    }

    pub fn from_reader(reader: &mut impl Read) -> Result<Response, ReadError> {
        let mut frame = [0u8; RESPONSE_LEN];
        reader.read_exact(&mut frame)?;
        Response::from_bytes(&frame)
    }
}

#[cfg(feature = "tokio")]
pub use self::framed::ResponseCodec;

#[cfg(feature = "tokio")]
mod framed {
    use bytes::{Buf, BufMut, BytesMut};
    use tokio_util::codec::{Decoder, Encoder};

    use crate::{
        command::{RESPONSE_LEN, Request, Response},
        error::ReadError,
    };

    /// Client side codec of the command connection: encodes requests, decodes responses.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct ResponseCodec;

    impl Decoder for ResponseCodec {
        type Item = Response;
        type Error = ReadError;

        fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Response>, ReadError> {
            if src.len() < RESPONSE_LEN {
                src.reserve(RESPONSE_LEN - src.len());
                return Ok(None);
            }
            let mut frame = [0u8; RESPONSE_LEN];
            src.copy_to_slice(&mut frame);
            Response::from_bytes(&frame).map(Some)
        }
    }

    impl Encoder<Request> for ResponseCodec {
        type Error = ReadError;

        fn encode(&mut self, item: Request, dst: &mut BytesMut) -> Result<(), ReadError> {
            let (frame, len) = item.encode();
            dst.put_slice(&frame[..len]);
            Ok(())
        }
    }

}

#[test]
fn write_server_info() {
    let mut out = Vec::new();
    XvcInfo::default().write_to(&mut out).unwrap();
    assert_eq!(out, b"xvcServer_v1.0:512\n".to_vec());
}

#[test]
fn read_server_info() {
    let data = b"xvcServer_v1.0:32\n";
    let mut cursor = std::io::Cursor::new(data);
    let info = XvcInfo::from_reader(&mut cursor).unwrap();
    assert_eq!(info.version(), Version::V1_0);
    assert_eq!(info.max_vector_len(), 32)
}

#[cfg(test)]
mod test {
    use crate::command::{Opcode, Request, Response};
    use crate::error::ReadError;
    use crate::protocol::{Message, XvcInfo};
    use std::io::Cursor;

    #[test]
    fn write_getinfo() {
        let mut out = Vec::new();
        Message::GetInfo.write_to(&mut out).unwrap();
        assert_eq!(out, b"getinfo:".to_vec());
    }

    #[test]
    fn write_settck() {
        let period: u32 = 0x1234_5678;
        let mut out = Vec::new();
        Message::SetTck { period_ns: period }
            .write_to(&mut out)
            .unwrap();
        let mut expected = b"settck:".to_vec();
        expected.extend_from_slice(&period.to_le_bytes());
        assert_eq!(out, expected);
    }

    #[test]
    fn write_shift() {
        let tms = vec![0xAAu8; 2].into_boxed_slice();
        let tdi = vec![0x55u8; 2].into_boxed_slice();
        let mut out = Vec::new();
        Message::Shift {
            num_bits: 13,
            tms: tms.clone(),
            tdi: tdi.clone(),
        }
        .write_to(&mut out)
        .unwrap();

        let mut expected = b"shift:".to_vec();
        expected.extend_from_slice(&13u32.to_le_bytes());
        expected.extend_from_slice(&tms);
        expected.extend_from_slice(&tdi);
        assert_eq!(out, expected);
    }

    #[test]
    fn info_with_bad_version() {
        let mut cursor = Cursor::new(b"xvcServer_v2.3:32\n");
        match XvcInfo::from_reader(&mut cursor) {
            Err(ReadError::UnsupportedVersion(v)) => assert_eq!(v, "2.3"),
            other => panic!("expected UnsupportedVersion, got {:?}", other),
        }
    }

    #[test]
    fn info_with_bad_prefix() {
        let mut cursor = Cursor::new(b"xvcClient_v1.0:32\n");
        assert!(matches!(
            XvcInfo::from_reader(&mut cursor),
            Err(ReadError::InvalidFormat(_))
        ));
    }

    #[test]
    fn request_write_omits_payload_when_not_needed() {
        let mut out = Vec::new();
        Request {
            opcode: Opcode::GetXvcRunning,
            payload: Some(1),
        }
        .write_to(&mut out)
        .unwrap();
        assert_eq!(out, vec![0x04, 0x20, 0x69, 4]);
    }

    #[test]
    fn response_from_reader() {
        let mut out = Vec::new();
        Response::status(Opcode::GetBootMode, 1)
            .write_to(&mut out)
            .unwrap();
        let response = Response::from_reader(&mut Cursor::new(out)).unwrap();
        assert_eq!(response.opcode, Opcode::GetBootMode as u8);
        assert_eq!(response.value, 1);
    }

    #[test]
    fn truncated_response() {
        let mut cursor = Cursor::new(vec![0x04, 0x20, 0x69, 1]);
        assert!(matches!(
            Response::from_reader(&mut cursor),
            Err(ReadError::IoError(_))
        ));
    }
}
