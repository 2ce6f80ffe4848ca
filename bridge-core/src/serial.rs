//! Raw byte pump between one TCP client and the target UART.
use crate::{
    error::BridgeError,
    hal::SerialPort,
    net::{Connection, Listener, Network, Outbox},
};

#[derive(Debug)]
pub struct SerialBridge<L: Listener, U: SerialPort> {
    port: u16,
    baud: u32,
    uart: U,
    buffer: Box<[u8]>,
    to_uart: Outbox,
    to_client: Outbox,
    listener: Option<L>,
    client: Option<L::Connection>,
}

impl<L: Listener, U: SerialPort> SerialBridge<L, U> {
    /// Creates a stopped bridge. The UART is closed so its pins stay tri-stated.
    pub fn new(mut uart: U, port: u16, baud: u32, buffer_size: usize) -> SerialBridge<L, U> {
        uart.end();
        SerialBridge {
            port,
            baud,
            uart,
            buffer: vec![0; buffer_size.max(1)].into_boxed_slice(),
            to_uart: Outbox::new(),
            to_client: Outbox::new(),
            listener: None,
            client: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.listener.is_some()
    }

    pub fn has_client(&self) -> bool {
        self.client.is_some()
    }

    pub fn local_port(&self) -> Option<u16> {
        self.listener.as_ref().map(Listener::local_port)
    }

    /// Bytes read but not yet taken by the UART and by the client.
    pub fn pending(&self) -> (usize, usize) {
        (self.to_uart.len(), self.to_client.len())
    }

    /// Opens the UART and the listening port. Does nothing if running.
    pub fn start<N>(&mut self, network: &mut N) -> Result<(), BridgeError>
    where
        N: Network<Listener = L>,
    {
        if self.is_running() {
            return Ok(());
        }
        self.uart.begin(self.baud)?;
        match network.listen(self.port) {
            Ok(listener) => {
                log::info!(
                    "Serial bridge listening on port {} at {} baud",
                    listener.local_port(),
                    self.baud
                );
                self.listener = Some(listener);
                Ok(())
            }
            Err(source) => {
                self.uart.end();
                Err(BridgeError::Listen {
                    port: self.port,
                    source,
                })
            }
        }
    }

    /// Closes the client, the listening port and the UART.
    pub fn stop(&mut self) {
        if let Some(mut client) = self.client.take() {
            let flushed = self
                .to_client
                .drain(|data| client.write(data))
                .and_then(|_| client.flush());
            if let Err(err) = flushed {
                log::debug!("Flushing serial client failed: {}", err);
            }
        }
        if self.listener.take().is_some() {
            log::info!("Serial bridge stopped");
            let uart = &mut self.uart;
            let flushed = self
                .to_uart
                .drain(|data| uart.write(data))
                .and_then(|_| uart.flush());
            if let Err(err) = flushed {
                log::warn!("Flushing UART failed: {}", err);
            }
        }
        self.to_uart.clear();
        self.to_client.clear();
        self.uart.end();
    }

    /// Accepts a client if there is none, otherwise moves at most one buffer of
    /// bytes in each direction.
    ///
    /// A side that is slower than the other keeps its bytes queued, and nothing
    /// more is read for it until they are gone.
    pub fn tick(&mut self) {
        let Some(listener) = self.listener.as_mut() else {
            return;
        };
        let Some(client) = self.client.as_mut() else {
            match listener.accept() {
                Ok(Some(client)) => {
                    match client.peer() {
                        Some(peer) => log::info!("New serial client connection from {}", peer),
                        None => log::info!("New serial client connection"),
                    }
                    self.client = Some(client);
                }
                Ok(None) => {}
                Err(err) => log::error!("Serial accept error: {}", err),
            }
            return;
        };

        if self.to_uart.is_empty() {
            match client.read(&mut self.buffer) {
                Ok(count) => self.to_uart.push(&self.buffer[..count]),
                Err(err) => {
                    log::info!("Serial client disconnected: {}", err);
                    self.drop_client();
                    return;
                }
            }
        }
        let uart = &mut self.uart;
        if let Err(err) = self.to_uart.drain(|data| uart.write(data)) {
            log::error!("UART write failed: {}", err);
            self.to_uart.clear();
        }

        if self.to_client.is_empty() {
            match self.uart.read(&mut self.buffer) {
                Ok(count) => self.to_client.push(&self.buffer[..count]),
                Err(err) => log::error!("UART read failed: {}", err),
            }
        }
        if let Err(err) = self.to_client.drain(|data| client.write(data)) {
            log::info!("Serial client disconnected: {}", err);
            self.drop_client();
        }
    }

    fn drop_client(&mut self) {
        self.client = None;
        self.to_uart.clear();
        self.to_client.clear();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::sim::{SimListener, SimNetwork, SimSerial};

    const PORT: u16 = 2222;

    fn bridge(buffer_size: usize) -> (SerialBridge<SimListener, SimSerial>, SimSerial, SimNetwork) {
        let uart = SimSerial::new();
        let bridge = SerialBridge::new(uart.clone(), PORT, 115_200, buffer_size);
        (bridge, uart, SimNetwork::new())
    }

    #[test]
    fn start_opens_uart() {
        let (mut bridge, uart, mut network) = bridge(64);
        assert_eq!(uart.baud(), None);
        bridge.start(&mut network).unwrap();
        assert_eq!(uart.baud(), Some(115_200));
        assert!(network.is_listening(PORT));

        bridge.stop();
        assert_eq!(uart.baud(), None);
        assert!(!network.is_listening(PORT));
        assert!(!bridge.is_running());
    }

    #[test]
    fn listen_failure_closes_uart() {
        let (mut bridge, uart, mut network) = bridge(64);
        let _taken = network.listen(PORT).unwrap();
        match bridge.start(&mut network) {
            Err(BridgeError::Listen { port, .. }) => assert_eq!(port, PORT),
            other => panic!("expected listen error, got {:?}", other),
        }
        assert_eq!(uart.baud(), None);
        assert!(!bridge.is_running());
    }

    #[test]
    fn bytes_flow_both_ways() {
        let (mut bridge, uart, mut network) = bridge(64);
        bridge.start(&mut network).unwrap();
        let client = network.connect(PORT).unwrap();
        bridge.tick();
        assert!(bridge.has_client());

        client.send(b"hello target");
        uart.target_sends(b"hello host");
        bridge.tick();
        assert_eq!(uart.target_received(), b"hello target".to_vec());
        assert_eq!(client.received(), b"hello host".to_vec());
    }

    #[test]
    fn one_buffer_per_direction_per_tick() {
        let (mut bridge, uart, mut network) = bridge(4);
        bridge.start(&mut network).unwrap();
        let client = network.connect(PORT).unwrap();
        bridge.tick();

        client.send(b"abcdefgh");
        uart.target_sends(b"123456");
        bridge.tick();
        assert_eq!(uart.target_received(), b"abcd".to_vec());
        assert_eq!(client.received(), b"1234".to_vec());
        bridge.tick();
        assert_eq!(uart.target_received(), b"efgh".to_vec());
        assert_eq!(client.received(), b"56".to_vec());
    }

    #[test]
    fn disconnect_frees_the_slot() {
        let (mut bridge, _uart, mut network) = bridge(64);
        bridge.start(&mut network).unwrap();
        let client = network.connect(PORT).unwrap();
        bridge.tick();
        drop(client);
        bridge.tick();
        assert!(!bridge.has_client());
        assert!(bridge.is_running());

        let _client = network.connect(PORT).unwrap();
        bridge.tick();
        assert!(bridge.has_client());
    }

    #[test]
    fn stop_closes_client() {
        let (mut bridge, _uart, mut network) = bridge(64);
        bridge.start(&mut network).unwrap();
        let client = network.connect(PORT).unwrap();
        bridge.tick();
        bridge.stop();
        assert!(client.is_closed());
    }

    #[test]
    fn stalled_uart_holds_back_the_client() {
        let (mut bridge, uart, mut network) = bridge(4);
        bridge.start(&mut network).unwrap();
        let client = network.connect(PORT).unwrap();
        bridge.tick();

        uart.set_stalled(true);
        client.send(b"abcdefgh");
        uart.target_sends(b"ok");
        bridge.tick();
        bridge.tick();
        assert!(uart.target_received().is_empty());
        assert_eq!(bridge.pending(), (4, 0));
        // the other direction keeps moving
        assert_eq!(client.received(), b"ok".to_vec());

        uart.set_stalled(false);
        bridge.tick();
        assert_eq!(uart.target_received(), b"abcd".to_vec());
        bridge.tick();
        assert_eq!(uart.target_received(), b"efgh".to_vec());
        assert_eq!(bridge.pending(), (0, 0));
    }

    #[test]
    fn slow_client_gets_the_rest_later() {
        let (mut bridge, uart, mut network) = bridge(8);
        bridge.start(&mut network).unwrap();
        let client = network.connect(PORT).unwrap();
        bridge.tick();

        client.set_window(Some(3));
        uart.target_sends(b"U-Boot> ");
        bridge.tick();
        assert_eq!(client.received(), b"U-B".to_vec());
        assert_eq!(bridge.pending(), (0, 5));
        client.set_window(None);
        bridge.tick();
        assert_eq!(client.received(), b"oot> ".to_vec());
        assert_eq!(bridge.pending(), (0, 0));
    }
}
