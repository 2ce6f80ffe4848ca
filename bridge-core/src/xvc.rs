//! XVC service: one client at a time, decoded incrementally on every tick.
use std::io::ErrorKind;

use bridge_protocol::{
    Version, XvcInfo,
    error::ReadError,
    session::{SessionEvent, XvcSession},
};
use log::Level;

use crate::{
    XvcBackend,
    error::BridgeError,
    net::{Connection, Listener, Network, Outbox},
};

#[derive(Debug)]
pub struct XvcService<L: Listener, B: XvcBackend> {
    port: u16,
    backend: B,
    session: XvcSession,
    max_vector_size: u32,
    listener: Option<L>,
    client: Option<L::Connection>,
    output: Outbox,
}

impl<L: Listener, B: XvcBackend> XvcService<L, B> {
    /// Creates a stopped service. The backend's pins are tri-stated.
    pub fn new(mut backend: B, port: u16, max_vector_size: u32) -> XvcService<L, B> {
        backend.deactivate();
        XvcService {
            port,
            backend,
            session: XvcSession::new(max_vector_size as usize),
            max_vector_size,
            listener: None,
            client: None,
            output: Outbox::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.listener.is_some()
    }

    pub fn has_client(&self) -> bool {
        self.client.is_some()
    }

    /// The port actually listened on while running.
    pub fn local_port(&self) -> Option<u16> {
        self.listener.as_ref().map(Listener::local_port)
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Reply bytes the client has not taken yet.
    pub fn pending_output(&self) -> usize {
        self.output.len()
    }

    /// Drives the JTAG pins and opens the listening port. Does nothing if running.
    pub fn start<N>(&mut self, network: &mut N) -> Result<(), BridgeError>
    where
        N: Network<Listener = L>,
    {
        if self.is_running() {
            return Ok(());
        }
        self.backend.activate()?;
        match network.listen(self.port) {
            Ok(listener) => {
                log::info!("XVC service listening on port {}", listener.local_port());
                self.session.reset();
                self.listener = Some(listener);
                Ok(())
            }
            Err(source) => {
                self.backend.deactivate();
                Err(BridgeError::Listen {
                    port: self.port,
                    source,
                })
            }
        }
    }

    /// Closes the client and the listening port and tri-states the JTAG pins.
    pub fn stop(&mut self) {
        if let Some(mut client) = self.client.take() {
            let flushed = self
                .output
                .drain(|data| client.write(data))
                .and_then(|_| client.flush());
            if let Err(err) = flushed {
                log::debug!("Flushing XVC client failed: {}", err);
            }
        }
        if self.listener.take().is_some() {
            log::info!("XVC service stopped");
        }
        self.output.clear();
        self.session.reset();
        self.backend.deactivate();
    }

    /// Accepts a client if there is none, otherwise consumes what the client sent
    /// until one reply has been queued or no more bytes are pending.
    ///
    /// Never waits for the client to take a reply. Until the previous reply is
    /// gone nothing more is read from the client.
    pub fn tick(&mut self, verbose: bool) {
        let Some(listener) = self.listener.as_mut() else {
            return;
        };
        let Some(client) = self.client.as_mut() else {
            match listener.accept() {
                Ok(Some(client)) => {
                    match client.peer() {
                        Some(peer) => log::info!("New XVC client connection from {}", peer),
                        None => log::info!("New XVC client connection"),
                    }
                    self.session.reset();
                    self.client = Some(client);
                }
                Ok(None) => {}
                Err(err) => log::error!("XVC accept error: {}", err),
            }
            return;
        };

        let level = if verbose { Level::Info } else { Level::Debug };
        let served = serve(
            client,
            &mut self.output,
            &mut self.session,
            &mut self.backend,
            self.max_vector_size,
            level,
        );
        match served {
            Ok(()) => {}
            Err(ReadError::IoError(err))
                if matches!(
                    err.kind(),
                    ErrorKind::UnexpectedEof
                        | ErrorKind::ConnectionAborted
                        | ErrorKind::ConnectionReset
                        | ErrorKind::BrokenPipe
                ) =>
            {
                log::info!("XVC client disconnected");
                self.drop_client();
            }
            Err(err) => {
                log::error!("XVC client error: {}, closing connection", err);
                self.drop_client();
            }
        }
    }

    fn drop_client(&mut self) {
        self.client = None;
        self.output.clear();
        self.session.reset();
    }
}

fn serve<C: Connection, B: XvcBackend>(
    client: &mut C,
    output: &mut Outbox,
    session: &mut XvcSession,
    backend: &mut B,
    max_vector_size: u32,
    level: Level,
) -> Result<(), ReadError> {
    if !output.drain(|data| client.write(data))? {
        return Ok(());
    }
    loop {
        let count = client.read(session.demand())?;
        if count == 0 {
            return Ok(());
        }
        let Some(event) = session.advance(count)? else {
            continue;
        };
        match event {
            SessionEvent::GetInfo => {
                log::log!(level, "Received GetInfo message");
                let mut reply = Vec::with_capacity(32);
                XvcInfo::new(Version::V1_0, max_vector_size).write_to(&mut reply)?;
                output.push(&reply);
            }
            SessionEvent::SetTck { period_ns } => {
                log::log!(level, "Received SetTck message: period_ns={}", period_ns);
                let period_ns = backend.set_tck(period_ns);
                output.push(&period_ns.to_le_bytes());
            }
            SessionEvent::Shift {
                num_bits,
                num_bytes,
            } => {
                log::log!(
                    level,
                    "Received Shift message: num_bits={}, num_bytes={}",
                    num_bits,
                    num_bytes
                );
                backend.shift(num_bits, num_bytes, session.vectors_mut());
                output.push(session.tdo());
            }
        }
        output.drain(|data| client.write(data))?;
        return Ok(());
    }
}
