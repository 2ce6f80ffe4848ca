//! # Bridge Client
//!
//! Clients for the two framed services of the XVC-serial bridge.
//!
//! ## Overview
//!
//! - [`XvcClient`]: blocking Xilinx Virtual Cable (XVC) 1.0 client for remote JTAG
//!   shifting.
//! - [`CommandClient`]: blocking client of the board-control command port.
//! - [`AsyncCommandClient`]: the same on top of tokio.
//!
//! The serial bridge is a raw byte stream; any TCP client (`nc`, `socat`) works.
//!
//! ## Basic Usage
//!
//! ### Controlling the Board
//!
//! ```ignore
//! use bridge_client::CommandClient;
//!
//! let mut client = CommandClient::connect("192.168.4.1:42069")?;
//! client.set_boot_mode(false)?;
//! client.reset_board()?;
//! client.set_xvc_running(true)?;
//! ```
//!
//! ### Performing JTAG Shifts
//!
//! ```ignore
//! use bridge_client::XvcClient;
//!
//! let mut client = XvcClient::new("192.168.4.1:2542")?;
//! let info = client.get_info()?;
//! println!("Max vector size: {} bytes", info.max_vector_len());
//!
//! // 8 bits through the chain
//! let tdo = client.shift(8, &[0x00], &[0xA5])?;
//! ```
//!
//! ## Timeouts
//!
//! The bridge drops malformed command frames without answering, so every command
//! request waits at most [`DEFAULT_TIMEOUT`] for its response. Opcodes that reboot
//! the bridge are never answered and are not waited for.
use std::{
    io::{self, Read},
    net::{TcpStream, ToSocketAddrs},
    time::Duration,
};

use bridge_protocol::{
    Message, XvcInfo,
    codec::ResponseCodec,
    command::{Opcode, PING_PATTERN, RESPONSE_LEN, Request, Response},
    error::ReadError,
};
use bytes::BytesMut;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpStream as AsyncTcpStream, ToSocketAddrs as AsyncToSocketAddrs},
};
use tokio_util::codec::Decoder;

/// How long a command request waits for its response.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// XVC client for remote JTAG operations.
pub struct XvcClient {
    tcp: TcpStream,
}

impl XvcClient {
    pub fn new(addr: impl ToSocketAddrs) -> io::Result<XvcClient> {
        let tcp = TcpStream::connect(addr)?;
        tcp.set_nodelay(true)?;
        Ok(XvcClient { tcp })
    }

    /// Query the protocol version and the shift capacity.
    pub fn get_info(&mut self) -> Result<XvcInfo, ReadError> {
        Message::GetInfo.write_to(&mut self.tcp)?;
        XvcInfo::from_reader(&mut self.tcp)
    }

    /// Set the JTAG Test Clock (TCK) period.
    /// # Returns
    ///
    /// The TCK period reported back. The bridge clocks at a fixed rate and echoes
    /// the request.
    pub fn set_tck(&mut self, period_ns: u32) -> io::Result<u32> {
        Message::SetTck { period_ns }.write_to(&mut self.tcp)?;
        let mut buf = [0u8; 4];
        self.tcp.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    /// Perform a JTAG shift operation.
    ///
    /// # Arguments
    ///
    /// * `num_bits` - Number of bits to shift
    /// * `tms` - Test Mode Select vector (length must be ⌈num_bits / 8⌉)
    /// * `tdi` - Test Data In vector (length must be ⌈num_bits / 8⌉)
    ///
    /// # Returns
    ///
    /// Test Data Out vector from the JTAG chain of the same length as `tms` and `tdi`.
    ///
    /// A shift larger than the capacity from [`XvcClient::get_info`] makes the bridge
    /// close the connection, which surfaces here as an I/O error.
    pub fn shift(&mut self, num_bits: u32, tms: &[u8], tdi: &[u8]) -> io::Result<Box<[u8]>> {
        Message::Shift {
            num_bits,
            tms: tms.into(),
            tdi: tdi.into(),
        }
        .write_to(&mut self.tcp)?;
        let mut buf = vec![0; num_bits.div_ceil(8) as usize];
        self.tcp.read_exact(&mut buf)?;
        Ok(buf.into_boxed_slice())
    }
}

fn check_echo(request: &Request, response: Response) -> Result<Response, ReadError> {
    if response.opcode != request.opcode as u8 {
        return Err(ReadError::InvalidFormat(format!(
            "Response for opcode {} while waiting for {}",
            response.opcode, request.opcode
        )));
    }
    Ok(response)
}

/// Blocking client of the command port.
pub struct CommandClient {
    tcp: TcpStream,
}

impl CommandClient {
    pub fn connect(addr: impl ToSocketAddrs) -> io::Result<CommandClient> {
        let tcp = TcpStream::connect(addr)?;
        tcp.set_nodelay(true)?;
        tcp.set_read_timeout(Some(DEFAULT_TIMEOUT))?;
        Ok(CommandClient { tcp })
    }

    pub fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.tcp.set_read_timeout(Some(timeout))
    }

    /// Sends a request and waits for the response.
    ///
    /// Returns `None` for opcodes that reboot the bridge, without waiting.
    pub fn request(&mut self, request: Request) -> Result<Option<Response>, ReadError> {
        log::debug!("Sending {}", request.opcode);
        request.write_to(&mut self.tcp)?;
        if request.opcode.is_fail_stop() {
            return Ok(None);
        }
        let response = Response::from_reader(&mut self.tcp)?;
        check_echo(&request, response).map(Some)
    }

    fn query(&mut self, request: Request) -> Result<u32, ReadError> {
        match self.request(request)? {
            Some(response) => Ok(response.value),
            None => Ok(0),
        }
    }

    fn flag(&mut self, request: Request) -> Result<bool, ReadError> {
        self.query(request).map(|value| value != 0)
    }

    pub fn boot_mode(&mut self) -> Result<bool, ReadError> {
        self.flag(Request::new(Opcode::GetBootMode))
    }

    pub fn set_boot_mode(&mut self, mode: bool) -> Result<bool, ReadError> {
        self.flag(Request::with_payload(Opcode::SetBootMode, mode as u8))
    }

    /// Pulses the target's reset line.
    pub fn reset_board(&mut self) -> Result<(), ReadError> {
        self.query(Request::new(Opcode::ResetBoard)).map(|_| ())
    }

    pub fn xvc_running(&mut self) -> Result<bool, ReadError> {
        self.flag(Request::new(Opcode::GetXvcRunning))
    }

    /// Returns whether the service runs afterwards.
    pub fn set_xvc_running(&mut self, enable: bool) -> Result<bool, ReadError> {
        self.flag(Request::with_payload(Opcode::SetXvcRunning, enable as u8))
    }

    pub fn serial_running(&mut self) -> Result<bool, ReadError> {
        self.flag(Request::new(Opcode::GetSerialRunning))
    }

    /// Returns whether the service runs afterwards.
    pub fn set_serial_running(&mut self, enable: bool) -> Result<bool, ReadError> {
        self.flag(Request::with_payload(Opcode::SetSerialRunning, enable as u8))
    }

    pub fn verbose(&mut self) -> Result<bool, ReadError> {
        self.flag(Request::new(Opcode::GetVerbose))
    }

    pub fn set_verbose(&mut self, enable: bool) -> Result<bool, ReadError> {
        self.flag(Request::with_payload(Opcode::SetVerbose, enable as u8))
    }

    /// Whether the bridge answered with the ping pattern.
    pub fn ping(&mut self) -> Result<bool, ReadError> {
        self.query(Request::new(Opcode::Ping))
            .map(|value| value == PING_PATTERN)
    }

    pub fn reboot(mut self) -> Result<(), ReadError> {
        self.request(Request::new(Opcode::Reboot)).map(|_| ())
    }

    /// Makes the bridge forget its network credentials and reboot into provisioning.
    pub fn reconfigure_network(mut self) -> Result<(), ReadError> {
        self.request(Request::new(Opcode::ReconfigureNetwork))
            .map(|_| ())
    }
}

/// Tokio client of the command port.
pub struct AsyncCommandClient {
    tcp: AsyncTcpStream,
    codec: ResponseCodec,
    buffer: BytesMut,
    timeout: Duration,
}

impl AsyncCommandClient {
    pub async fn connect(addr: impl AsyncToSocketAddrs) -> io::Result<AsyncCommandClient> {
        let tcp = AsyncTcpStream::connect(addr).await?;
        tcp.set_nodelay(true)?;
        Ok(AsyncCommandClient {
            tcp,
            codec: ResponseCodec,
            buffer: BytesMut::with_capacity(RESPONSE_LEN),
            timeout: DEFAULT_TIMEOUT,
        })
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Sends a request and waits for the response.
    ///
    /// Returns `None` for opcodes that reboot the bridge, without waiting.
    pub async fn request(&mut self, request: Request) -> Result<Option<Response>, ReadError> {
        let (frame, len) = request.encode();
        self.tcp.write_all(&frame[..len]).await?;
        if request.opcode.is_fail_stop() {
            return Ok(None);
        }
        let response = tokio::time::timeout(self.timeout, self.read_response())
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "no response from bridge"))??;
        check_echo(&request, response).map(Some)
    }

    async fn read_response(&mut self) -> Result<Response, ReadError> {
        loop {
            if let Some(response) = self.codec.decode(&mut self.buffer)? {
                return Ok(response);
            }
            if self.tcp.read_buf(&mut self.buffer).await? == 0 {
                return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
            }
        }
    }

    pub async fn ping(&mut self) -> Result<bool, ReadError> {
        let response = self.request(Request::new(Opcode::Ping)).await?;
        Ok(response.is_some_and(|r| r.value == PING_PATTERN))
    }
}
