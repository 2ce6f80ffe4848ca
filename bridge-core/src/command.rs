//! Command port: accepts one client and decodes its byte stream into requests.
use bridge_protocol::command::{CommandState, Request, Response};

use crate::{
    error::BridgeError,
    net::{Connection, Listener, Network, Outbox},
};

#[derive(Debug)]
pub struct CommandService<L: Listener> {
    listener: Option<L>,
    client: Option<L::Connection>,
    state: CommandState,
    output: Outbox,
}

impl<L: Listener> Default for CommandService<L> {
    fn default() -> Self {
        CommandService {
            listener: None,
            client: None,
            state: CommandState::Idle,
            output: Outbox::new(),
        }
    }
}

impl<L: Listener> CommandService<L> {
    pub fn new() -> CommandService<L> {
        CommandService::default()
    }

    pub fn open<N>(&mut self, network: &mut N, port: u16) -> Result<(), BridgeError>
    where
        N: Network<Listener = L>,
    {
        let listener = network
            .listen(port)
            .map_err(|source| BridgeError::Listen { port, source })?;
        log::info!("Command service listening on port {}", listener.local_port());
        self.listener = Some(listener);
        Ok(())
    }

    pub fn local_port(&self) -> Option<u16> {
        self.listener.as_ref().map(Listener::local_port)
    }

    pub fn has_client(&self) -> bool {
        self.client.is_some()
    }

    pub fn state(&self) -> CommandState {
        self.state
    }

    /// Accepts a client if there is none. Otherwise feeds the pending bytes one at a
    /// time to the decoder and returns as soon as a request is complete.
    ///
    /// Nothing is decoded while an earlier response is still waiting for the client.
    pub fn poll(&mut self, verbose: bool) -> Option<Request> {
        let listener = self.listener.as_mut()?;
        let Some(client) = self.client.as_mut() else {
            match listener.accept() {
                Ok(Some(client)) => {
                    match client.peer() {
                        Some(peer) => log::info!("New command client connection from {}", peer),
                        None => log::info!("New command client connection"),
                    }
                    self.state = CommandState::Idle;
                    self.client = Some(client);
                }
                Ok(None) => {}
                Err(err) => log::error!("Command accept error: {}", err),
            }
            return None;
        };

        match self.output.drain(|data| client.write(data)) {
            Ok(true) => {}
            Ok(false) => return None,
            Err(err) => {
                log::info!("Command client disconnected: {}", err);
                self.drop_client();
                return None;
            }
        }

        let mut byte = [0u8; 1];
        loop {
            match client.read(&mut byte) {
                Ok(0) => return None,
                Ok(_) => {
                    let (next, request) = self.state.step(byte[0]);
                    if verbose {
                        log::info!(
                            "Command byte {:#04x}: state {} -> {}",
                            byte[0],
                            self.state.index(),
                            next.index()
                        );
                    }
                    self.state = next;
                    if request.is_some() {
                        return request;
                    }
                }
                Err(err) => {
                    log::info!("Command client disconnected: {}", err);
                    self.drop_client();
                    return None;
                }
            }
        }
    }

    /// Sends a response to the current client. What the client does not take now
    /// goes out on later polls.
    pub fn respond(&mut self, response: &Response) {
        let Some(client) = self.client.as_mut() else {
            return;
        };
        self.output.push(&response.to_bytes());
        if let Err(err) = self.output.drain(|data| client.write(data)) {
            log::info!("Command client disconnected: {}", err);
            self.drop_client();
        }
    }

    /// Response bytes the client has not taken yet.
    pub fn pending_output(&self) -> usize {
        self.output.len()
    }

    fn drop_client(&mut self) {
        self.client = None;
        self.state = CommandState::Idle;
        self.output.clear();
    }
}
