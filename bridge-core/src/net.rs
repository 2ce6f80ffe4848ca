//! Non-blocking byte streams.
//!
//! Every call returns immediately: "nothing to do yet" is `Ok(None)` / `Ok(0)`, and an
//! error means the endpoint is gone. Dropping a connection or listener closes it.
use std::{
    io::{self, ErrorKind, Read, Write},
    net::{IpAddr, SocketAddr, TcpListener, TcpStream},
    time::{Duration, Instant},
};

pub trait Connection {
    /// Reads what has arrived so far. `Ok(0)` means nothing is pending; an error
    /// (including end of stream) means the peer is gone.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Writes as much of `data` as the peer takes right now. `Ok(0)` means it
    /// takes nothing at the moment.
    fn write(&mut self, data: &[u8]) -> io::Result<usize>;

    fn flush(&mut self) -> io::Result<()>;

    fn peer(&self) -> Option<SocketAddr>;
}

pub trait Listener {
    type Connection: Connection;

    /// Returns a pending connection, if any.
    fn accept(&mut self) -> io::Result<Option<Self::Connection>>;

    fn local_port(&self) -> u16;
}

pub trait Network {
    type Listener: Listener;

    fn listen(&mut self, port: u16) -> io::Result<Self::Listener>;
}

/// [`Network`] on top of non-blocking std sockets.
#[derive(Debug, Clone)]
pub struct TcpNetwork {
    ip: IpAddr,
    write_timeout: Duration,
}

impl TcpNetwork {
    pub fn new(ip: IpAddr, write_timeout: Duration) -> TcpNetwork {
        TcpNetwork { ip, write_timeout }
    }
}

impl Network for TcpNetwork {
    type Listener = TcpEndpoint;

    fn listen(&mut self, port: u16) -> io::Result<TcpEndpoint> {
        let listener = TcpListener::bind(SocketAddr::new(self.ip, port))?;
        listener.set_nonblocking(true)?;
        log::debug!("Listening on {}", listener.local_addr()?);
        Ok(TcpEndpoint {
            listener,
            write_timeout: self.write_timeout,
        })
    }
}

#[derive(Debug)]
pub struct TcpEndpoint {
    listener: TcpListener,
    write_timeout: Duration,
}

impl Listener for TcpEndpoint {
    type Connection = TcpConnection;

    fn accept(&mut self) -> io::Result<Option<TcpConnection>> {
        match self.listener.accept() {
            Ok((stream, peer)) => {
                stream.set_nonblocking(true)?;
                stream.set_nodelay(true)?;
                Ok(Some(TcpConnection {
                    stream,
                    peer,
                    write_timeout: self.write_timeout,
                    stalled_since: None,
                }))
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn local_port(&self) -> u16 {
        self.listener
            .local_addr()
            .map(|addr| addr.port())
            .unwrap_or_default()
    }
}

/// A client socket. Output that makes no progress for the write timeout is an
/// error.
#[derive(Debug)]
pub struct TcpConnection {
    stream: TcpStream,
    peer: SocketAddr,
    write_timeout: Duration,
    stalled_since: Option<Instant>,
}

impl Connection for TcpConnection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        match self.stream.read(buf) {
            Ok(0) => Err(io::Error::new(
                ErrorKind::UnexpectedEof,
                "peer closed the connection",
            )),
            Ok(count) => Ok(count),
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => {
                Ok(0)
            }
            Err(err) => Err(err),
        }
    }

    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        match self.stream.write(data) {
            Ok(0) => Err(ErrorKind::WriteZero.into()),
            Ok(count) => {
                self.stalled_since = None;
                Ok(count)
            }
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => {
                let since = *self.stalled_since.get_or_insert_with(Instant::now);
                if since.elapsed() > self.write_timeout {
                    return Err(ErrorKind::TimedOut.into());
                }
                Ok(0)
            }
            Err(err) => Err(err),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }

    fn peer(&self) -> Option<SocketAddr> {
        Some(self.peer)
    }
}

/// Bytes written but not yet taken by a peer that is slower than the bridge.
///
/// A reply goes in whole and leaves in whatever pieces the peer accepts, so the
/// scheduler never waits on a socket or UART.
#[derive(Debug, Default)]
pub struct Outbox {
    data: Vec<u8>,
    sent: usize,
}

impl Outbox {
    pub fn new() -> Outbox {
        Outbox::default()
    }

    pub fn is_empty(&self) -> bool {
        self.sent == self.data.len()
    }

    /// Bytes still waiting.
    pub fn len(&self) -> usize {
        self.data.len() - self.sent
    }

    pub fn push(&mut self, data: &[u8]) {
        if self.is_empty() {
            self.clear();
        }
        self.data.extend_from_slice(data);
    }

    /// Hands queued bytes to `write` until they are gone or `write` takes nothing.
    /// Returns whether the outbox is empty afterwards.
    pub fn drain<W>(&mut self, mut write: W) -> io::Result<bool>
    where
        W: FnMut(&[u8]) -> io::Result<usize>,
    {
        while !self.is_empty() {
            match write(&self.data[self.sent..])? {
                0 => return Ok(false),
                count => self.sent += count,
            }
        }
        self.clear();
        Ok(true)
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.sent = 0;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::{net::Ipv4Addr, thread};

    fn accept_one(endpoint: &mut TcpEndpoint) -> TcpConnection {
        let start = Instant::now();
        loop {
            if let Some(conn) = endpoint.accept().unwrap() {
                return conn;
            }
            assert!(start.elapsed() < Duration::from_secs(5), "no connection");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn accept_read_write() {
        let mut network = TcpNetwork::new(Ipv4Addr::LOCALHOST.into(), Duration::from_secs(1));
        let mut endpoint = network.listen(0).unwrap();
        assert!(endpoint.accept().unwrap().is_none());

        let mut client = TcpStream::connect((Ipv4Addr::LOCALHOST, endpoint.local_port())).unwrap();
        let mut conn = accept_one(&mut endpoint);
        assert!(conn.peer().is_some());

        let mut buf = [0u8; 8];
        assert_eq!(conn.read(&mut buf).unwrap(), 0);

        client.write_all(b"ping").unwrap();
        let start = Instant::now();
        let mut received = 0;
        while received < 4 {
            received += conn.read(&mut buf[received..]).unwrap();
            assert!(start.elapsed() < Duration::from_secs(5));
        }
        assert_eq!(&buf[..4], b"ping");

        assert_eq!(conn.write(b"pong").unwrap(), 4);
        let mut reply = [0u8; 4];
        client.read_exact(&mut reply).unwrap();
        assert_eq!(&reply, b"pong");

        drop(client);
        let start = Instant::now();
        loop {
            match conn.read(&mut buf) {
                Ok(_) => assert!(start.elapsed() < Duration::from_secs(5)),
                Err(err) => {
                    assert_eq!(err.kind(), ErrorKind::UnexpectedEof);
                    break;
                }
            }
        }
    }

    #[test]
    fn unread_output_never_blocks() {
        let mut network = TcpNetwork::new(Ipv4Addr::LOCALHOST.into(), Duration::from_millis(50));
        let mut endpoint = network.listen(0).unwrap();
        let _client = TcpStream::connect((Ipv4Addr::LOCALHOST, endpoint.local_port())).unwrap();
        let mut conn = accept_one(&mut endpoint);

        // the client never reads, so the socket buffers fill up
        let chunk = [0x55u8; 64 * 1024];
        let start = Instant::now();
        while conn.write(&chunk).unwrap() > 0 {
            assert!(start.elapsed() < Duration::from_secs(5), "socket never filled");
        }
        let start = Instant::now();
        assert_eq!(conn.write(&chunk).unwrap(), 0);
        assert!(start.elapsed() < Duration::from_millis(20));

        thread::sleep(Duration::from_millis(100));
        assert_eq!(conn.write(&chunk).unwrap_err().kind(), ErrorKind::TimedOut);
    }

    #[test]
    fn outbox_keeps_the_unsent_tail() {
        let mut outbox = Outbox::new();
        assert!(outbox.drain(|_| unreachable!()).unwrap());
        outbox.push(b"abcdef");

        let mut sink = Vec::new();
        let mut room = 4;
        let done = outbox
            .drain(|data| {
                let count = data.len().min(room);
                room -= count;
                sink.extend_from_slice(&data[..count]);
                Ok(count)
            })
            .unwrap();
        assert!(!done);
        assert_eq!(outbox.len(), 2);

        outbox.push(b"gh");
        let done = outbox
            .drain(|data| {
                sink.extend_from_slice(data);
                Ok(data.len())
            })
            .unwrap();
        assert!(done);
        assert!(outbox.is_empty());
        assert_eq!(sink, b"abcdefgh");

        outbox.push(b"x");
        assert!(outbox.drain(|_| Err(ErrorKind::BrokenPipe.into())).is_err());
        assert_eq!(outbox.len(), 1);
    }
}
