//! Software stand-ins for the platform: pins, UART, clock and an in-memory network.
//!
//! Handles are cheap clones sharing state, so a test can keep a probe on a pin or
//! socket it handed to the device.
use std::{
    collections::{HashMap, VecDeque},
    io::{self, ErrorKind},
    net::SocketAddr,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering},
    },
};

use crate::{
    hal::{DigitalPin, Level, PinMode, Provisioning, SerialPort, System},
    net::{Connection, Listener, Network},
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct LineState {
    high: AtomicBool,
    rising_edges: AtomicUsize,
}

/// A wire. Any number of pins may be attached to it.
#[derive(Debug, Clone, Default)]
pub struct SimLine {
    state: Arc<LineState>,
}

impl SimLine {
    pub fn new() -> SimLine {
        SimLine::default()
    }

    /// Drives the wire from outside the bridge, e.g. a button or the target.
    pub fn set(&self, level: Level) {
        let was_high = self.state.high.swap(level.is_high(), Ordering::SeqCst);
        if !was_high && level.is_high() {
            self.state.rising_edges.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub fn level(&self) -> Level {
        self.state.high.load(Ordering::SeqCst).into()
    }

    pub fn rising_edges(&self) -> usize {
        self.state.rising_edges.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
struct PinState {
    output: AtomicBool,
    fail_next: AtomicBool,
}

/// A GPIO attached to a [`SimLine`]. Writes only reach the line while the pin is an
/// output; reads always see the line.
#[derive(Debug, Clone)]
pub struct SimPin {
    line: SimLine,
    state: Arc<PinState>,
}

impl SimPin {
    pub fn new(line: &SimLine) -> SimPin {
        SimPin {
            line: line.clone(),
            state: Arc::new(PinState {
                output: AtomicBool::new(false),
                fail_next: AtomicBool::new(false),
            }),
        }
    }

    pub fn mode(&self) -> PinMode {
        if self.state.output.load(Ordering::SeqCst) {
            PinMode::Output
        } else {
            PinMode::Input
        }
    }

    /// Makes the next switch to output fail.
    pub fn fail_next_configuration(&self) {
        self.state.fail_next.store(true, Ordering::SeqCst);
    }
}

impl DigitalPin for SimPin {
    fn set_mode(&mut self, mode: PinMode) -> io::Result<()> {
        if mode == PinMode::Output && self.state.fail_next.swap(false, Ordering::SeqCst) {
            return Err(io::Error::other("simulated pin failure"));
        }
        self.state
            .output
            .store(mode == PinMode::Output, Ordering::SeqCst);
        Ok(())
    }

    fn write(&mut self, level: Level) {
        if self.mode() == PinMode::Output {
            self.line.set(level);
        }
    }

    fn read(&self) -> Level {
        self.line.level()
    }
}

#[derive(Debug, Default)]
struct SerialState {
    baud: Option<u32>,
    stalled: bool,
    from_target: VecDeque<u8>,
    to_target: Vec<u8>,
}

/// A UART with the target on the other side.
#[derive(Debug, Clone, Default)]
pub struct SimSerial {
    state: Arc<Mutex<SerialState>>,
}

impl SimSerial {
    pub fn new() -> SimSerial {
        SimSerial::default()
    }

    /// Baud rate while open.
    pub fn baud(&self) -> Option<u32> {
        lock(&self.state).baud
    }

    /// Queues bytes sent by the target. Dropped while the UART is closed.
    pub fn target_sends(&self, data: &[u8]) {
        let mut state = lock(&self.state);
        if state.baud.is_some() {
            state.from_target.extend(data);
        }
    }

    /// Takes the bytes the target received so far.
    pub fn target_received(&self) -> Vec<u8> {
        std::mem::take(&mut lock(&self.state).to_target)
    }

    /// While stalled the transmitter takes no bytes, like a UART held off by flow
    /// control.
    pub fn set_stalled(&self, stalled: bool) {
        lock(&self.state).stalled = stalled;
    }
}

impl SerialPort for SimSerial {
    fn begin(&mut self, baud: u32) -> io::Result<()> {
        lock(&self.state).baud = Some(baud);
        Ok(())
    }

    fn end(&mut self) {
        let mut state = lock(&self.state);
        state.baud = None;
        state.from_target.clear();
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = lock(&self.state);
        let count = buf.len().min(state.from_target.len());
        for (slot, byte) in buf.iter_mut().zip(state.from_target.drain(..count)) {
            *slot = byte;
        }
        Ok(count)
    }

    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut state = lock(&self.state);
        if state.baud.is_none() {
            return Err(io::Error::new(ErrorKind::NotConnected, "UART is closed"));
        }
        if state.stalled {
            return Ok(0);
        }
        state.to_target.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Clock that only moves when told to (or when the bridge delays), and a
/// provisioning stub.
///
/// [`System::reboot`] panics with `"reboot requested"`.
#[derive(Debug, Clone)]
pub struct SimSystem {
    now: Arc<AtomicU32>,
    connects: Arc<AtomicBool>,
    credential_resets: Arc<AtomicUsize>,
}

impl Default for SimSystem {
    fn default() -> Self {
        SimSystem {
            now: Arc::new(AtomicU32::new(0)),
            connects: Arc::new(AtomicBool::new(true)),
            credential_resets: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl SimSystem {
    pub fn new() -> SimSystem {
        SimSystem::default()
    }

    pub fn set_millis(&self, now: u32) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, ms: u32) {
        let now = self.now.load(Ordering::SeqCst);
        self.now.store(now.wrapping_add(ms), Ordering::SeqCst);
    }

    /// Whether [`Provisioning::try_connect`] succeeds.
    pub fn set_network_available(&self, available: bool) {
        self.connects.store(available, Ordering::SeqCst);
    }

    pub fn credential_resets(&self) -> usize {
        self.credential_resets.load(Ordering::SeqCst)
    }
}

impl System for SimSystem {
    fn millis(&self) -> u32 {
        self.now.load(Ordering::SeqCst)
    }

    fn delay_ms(&mut self, ms: u32) {
        self.advance(ms);
    }

    fn reboot(&mut self) -> ! {
        panic!("reboot requested")
    }
}

impl Provisioning for SimSystem {
    fn try_connect(&mut self) -> bool {
        self.connects.load(Ordering::SeqCst)
    }

    fn reset_credentials(&mut self) {
        self.credential_resets.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
struct Pipe {
    to_device: VecDeque<u8>,
    to_client: Vec<u8>,
    /// Most bytes the client side buffers before writes stop being taken.
    window: Option<usize>,
    client_closed: bool,
    device_closed: bool,
}

type SharedPipe = Arc<Mutex<Pipe>>;

#[derive(Debug, Default)]
struct NetState {
    pending: HashMap<u16, VecDeque<SharedPipe>>,
}

/// In-memory [`Network`]. Ports are plain numbers; `listen(0)` is not supported.
#[derive(Debug, Clone, Default)]
pub struct SimNetwork {
    state: Arc<Mutex<NetState>>,
}

impl SimNetwork {
    pub fn new() -> SimNetwork {
        SimNetwork::default()
    }

    pub fn is_listening(&self, port: u16) -> bool {
        lock(&self.state).pending.contains_key(&port)
    }

    /// Opens a connection to `port`. Refused (`None`) if nothing listens there.
    pub fn connect(&self, port: u16) -> Option<SimClient> {
        let mut state = lock(&self.state);
        let queue = state.pending.get_mut(&port)?;
        let pipe = SharedPipe::default();
        queue.push_back(pipe.clone());
        Some(SimClient { pipe })
    }
}

impl Network for SimNetwork {
    type Listener = SimListener;

    fn listen(&mut self, port: u16) -> io::Result<SimListener> {
        let mut state = lock(&self.state);
        if state.pending.contains_key(&port) {
            return Err(ErrorKind::AddrInUse.into());
        }
        state.pending.insert(port, VecDeque::new());
        Ok(SimListener {
            port,
            network: self.state.clone(),
        })
    }
}

#[derive(Debug)]
pub struct SimListener {
    port: u16,
    network: Arc<Mutex<NetState>>,
}

impl Listener for SimListener {
    type Connection = SimConnection;

    fn accept(&mut self) -> io::Result<Option<SimConnection>> {
        let mut state = lock(&self.network);
        let queue = state
            .pending
            .get_mut(&self.port)
            .ok_or_else(|| io::Error::from(ErrorKind::NotConnected))?;
        Ok(queue.pop_front().map(|pipe| SimConnection { pipe }))
    }

    fn local_port(&self) -> u16 {
        self.port
    }
}

impl Drop for SimListener {
    fn drop(&mut self) {
        let mut state = lock(&self.network);
        for pipe in state.pending.remove(&self.port).into_iter().flatten() {
            lock(&pipe).device_closed = true;
        }
    }
}

/// Device side of an in-memory connection.
#[derive(Debug)]
pub struct SimConnection {
    pipe: SharedPipe,
}

impl Connection for SimConnection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut pipe = lock(&self.pipe);
        if pipe.to_device.is_empty() {
            return if pipe.client_closed {
                Err(ErrorKind::UnexpectedEof.into())
            } else {
                Ok(0)
            };
        }
        let count = buf.len().min(pipe.to_device.len());
        for (slot, byte) in buf.iter_mut().zip(pipe.to_device.drain(..count)) {
            *slot = byte;
        }
        Ok(count)
    }

    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut pipe = lock(&self.pipe);
        if pipe.client_closed {
            return Err(ErrorKind::BrokenPipe.into());
        }
        let room = match pipe.window {
            Some(window) => window.saturating_sub(pipe.to_client.len()),
            None => data.len(),
        };
        let count = data.len().min(room);
        pipe.to_client.extend_from_slice(&data[..count]);
        Ok(count)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn peer(&self) -> Option<SocketAddr> {
        None
    }
}

impl Drop for SimConnection {
    fn drop(&mut self) {
        lock(&self.pipe).device_closed = true;
    }
}

/// Client side of an in-memory connection. Dropping it closes the connection.
#[derive(Debug)]
pub struct SimClient {
    pipe: SharedPipe,
}

impl SimClient {
    pub fn send(&self, data: &[u8]) {
        lock(&self.pipe).to_device.extend(data);
    }

    /// Takes everything the device wrote so far.
    pub fn received(&self) -> Vec<u8> {
        std::mem::take(&mut lock(&self.pipe).to_client)
    }

    /// Limits how many unread bytes the device may leave for this client. `None`
    /// lifts the limit.
    pub fn set_window(&self, window: Option<usize>) {
        lock(&self.pipe).window = window;
    }

    /// Whether the device closed its end.
    pub fn is_closed(&self) -> bool {
        lock(&self.pipe).device_closed
    }
}

impl Drop for SimClient {
    fn drop(&mut self) {
        lock(&self.pipe).client_closed = true;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn pin_writes_need_output_mode() {
        let line = SimLine::new();
        let mut pin = SimPin::new(&line);
        pin.write(Level::High);
        assert_eq!(line.level(), Level::Low);
        pin.set_mode(PinMode::Output).unwrap();
        pin.write(Level::High);
        assert_eq!(line.level(), Level::High);
        assert_eq!(line.rising_edges(), 1);
        let probe = pin.clone();
        pin.set_mode(PinMode::Input).unwrap();
        assert_eq!(probe.mode(), PinMode::Input);
    }

    #[test]
    fn network_round_trip() {
        let mut network = SimNetwork::new();
        assert!(network.connect(7).is_none());
        let mut listener = network.listen(7).unwrap();
        assert!(network.listen(7).is_err());
        assert!(listener.accept().unwrap().is_none());

        let client = network.connect(7).unwrap();
        let mut conn = listener.accept().unwrap().unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(conn.read(&mut buf).unwrap(), 0);
        client.send(b"abcdef");
        assert_eq!(conn.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"abcd");
        assert_eq!(conn.write(b"xy").unwrap(), 2);
        assert_eq!(client.received(), b"xy".to_vec());
        client.set_window(Some(3));
        assert_eq!(conn.write(b"abcd").unwrap(), 3);
        assert_eq!(conn.write(b"d").unwrap(), 0);
        assert_eq!(client.received(), b"abc".to_vec());

        drop(conn);
        assert!(client.is_closed());
        drop(listener);
        assert!(!network.is_listening(7));
    }

    #[test]
    fn closed_client_reads_as_eof() {
        let mut network = SimNetwork::new();
        let mut listener = network.listen(1).unwrap();
        let client = network.connect(1).unwrap();
        let mut conn = listener.accept().unwrap().unwrap();
        client.send(b"z");
        drop(client);
        let mut buf = [0u8; 4];
        assert_eq!(conn.read(&mut buf).unwrap(), 1);
        assert_eq!(
            conn.read(&mut buf).unwrap_err().kind(),
            ErrorKind::UnexpectedEof
        );
    }

    #[test]
    fn serial_drops_target_output_while_closed() {
        let mut serial = SimSerial::new();
        serial.target_sends(b"lost");
        serial.begin(115_200).unwrap();
        serial.target_sends(b"kept");
        let mut buf = [0u8; 8];
        assert_eq!(serial.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf[..4], b"kept");

        serial.set_stalled(true);
        assert_eq!(serial.write(b"held").unwrap(), 0);
        serial.set_stalled(false);
        assert_eq!(serial.write(b"sent").unwrap(), 4);
        assert_eq!(serial.target_received(), b"sent".to_vec());
    }
}
