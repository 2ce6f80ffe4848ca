use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("Could not configure {role} pin")]
    Pin {
        role: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("Could not listen on port {port}")]
    Listen {
        port: u16,
        #[source]
        source: io::Error,
    },
}
