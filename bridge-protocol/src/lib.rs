//! # Bridge Protocol Library
//!
//! Wire formats spoken by the XVC-serial bridge. The bridge listens on three ports;
//! two of them carry a protocol defined here:
//!
//! - **XVC** ([Xilinx Virtual Cable](https://github.com/Xilinx/XilinxVirtualCable) 1.0):
//!   remote JTAG shifting. [`Message`] and [`XvcInfo`] are the client side,
//!   [`session::XvcSession`] is the incremental decoder the bridge runs on a
//!   non-blocking connection.
//! - **Command**: a small framed request/response protocol controlling the target
//!   board's reset and boot-mode lines and which bridge services run.
//!   See [`command`].
//!
//! The third port, the serial bridge, is a raw byte stream.
//!
//! ## Byte order
//!
//! Every multi-byte integer on either wire is little-endian.
//!
//! ## Message Format
//!
//! - **GetInfo**: `getinfo:`
//! - **SetTck**: `settck:<period in ns: u32>`, answered by the same 4 bytes
//! - **Shift**: `shift:<num_bits: u32><TMS vector><TDI vector>`, answered by the TDO vector
//! - **XvcInfo**: `xvcServer_v{version}:<max_vector_len>\n`
//! - **Command request**: `04 20 69 <opcode> [payload]`
//! - **Command response**: `04 20 69 <opcode> <kind> <value: u32>`
//!
//! ## Decoding a command stream
//!
//! ```
//! use bridge_protocol::command::{CommandState, Opcode, Request};
//!
//! let mut state = CommandState::default();
//! let mut decoded = None;
//! for byte in [0x04, 0x20, 0x69, 0x00, 0x01] {
//!     let (next, request) = state.step(byte);
//!     state = next;
//!     decoded = decoded.or(request);
//! }
//! assert_eq!(decoded, Some(Request::with_payload(Opcode::SetBootMode, 1)));
//! ```
//!
//! ## Decoding an XVC stream
//!
//! ```
//! use bridge_protocol::session::{SessionEvent, XvcSession};
//!
//! let mut session = XvcSession::new(512);
//! let (_, event) = session.feed(b"getinfo:").unwrap();
//! assert_eq!(event, Some(SessionEvent::GetInfo));
//! ```
//!
//! ## Error Handling
//!
//! This library uses the [`error::ReadError`] type for protocol parsing errors.

pub mod protocol;
pub use protocol::*;
pub mod codec;
pub mod command;
pub mod error;
pub mod session;
