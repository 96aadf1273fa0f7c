//! Startup failures and their exit codes

use crate::config::ConfigError;
use crate::input::{BridgeError, KeyboardError};
use crate::server::ServerError;
use crate::transport::TransportError;

/// Usage or configuration error
pub const EXIT_CONFIG: u8 = 2;
/// The host windowing system cannot be used
pub const EXIT_BACKEND: u8 = 3;
/// The Wayland socket name is taken
pub const EXIT_SOCKET_IN_USE: u8 = 4;
/// Any other I/O failure while starting up
pub const EXIT_IO: u8 = 5;

/// Errors that stop the compositor before it serves clients
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("host backend unavailable: {0}")]
    Backend(String),
    #[error(transparent)]
    Server(#[from] ServerError),
    #[error("cannot compile keymap")]
    Keymap(#[from] KeyboardError),
    #[error("cannot start input bridge")]
    Bridge(#[from] BridgeError),
    #[error("cannot create event loop")]
    EventLoop(#[source] calloop::Error),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl StartupError {
    pub fn exit_code(&self) -> u8 {
        match self {
            StartupError::Config(ConfigError::RuntimeDir { .. }) => EXIT_IO,
            StartupError::Config(_) | StartupError::Keymap(_) => EXIT_CONFIG,
            StartupError::Bridge(BridgeError::Keyboard(_)) => EXIT_CONFIG,
            StartupError::Backend(_) => EXIT_BACKEND,
            StartupError::Server(ServerError::SocketInUse(_)) => EXIT_SOCKET_IN_USE,
            StartupError::Transport(TransportError::Bind { source, .. })
                if source.kind() == std::io::ErrorKind::AddrInUse =>
            {
                EXIT_SOCKET_IN_USE
            }
            StartupError::Server(_)
            | StartupError::Bridge(_)
            | StartupError::EventLoop(_)
            | StartupError::Transport(_) => EXIT_IO,
        }
    }
}

/// Exit code for an error escaping `main`
///
/// The first [`StartupError`] in the chain decides; anything else is an
/// I/O failure.
pub fn exit_code_for(err: &anyhow::Error) -> u8 {
    err.chain()
        .find_map(|e| e.downcast_ref::<StartupError>())
        .map_or(EXIT_IO, StartupError::exit_code)
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::path::PathBuf;

    use anyhow::Context;

    use super::*;
    use crate::transport::Endpoint;

    #[test]
    fn test_exit_codes() {
        let config = StartupError::Config(ConfigError::InvalidQueueDepth);
        assert_eq!(config.exit_code(), EXIT_CONFIG);

        let in_use = StartupError::Server(ServerError::SocketInUse(PathBuf::from("/run/wayland-0")));
        assert_eq!(in_use.exit_code(), EXIT_SOCKET_IN_USE);

        let backend = StartupError::Backend("no display".into());
        assert_eq!(backend.exit_code(), EXIT_BACKEND);

        let runtime = StartupError::Config(ConfigError::RuntimeDir {
            path: PathBuf::from("/nope"),
            source: io::Error::from(io::ErrorKind::PermissionDenied),
        });
        assert_eq!(runtime.exit_code(), EXIT_IO);

        let relay = StartupError::Transport(TransportError::Bind {
            endpoint: Endpoint::Tcp("localhost:1".into()),
            source: io::Error::from(io::ErrorKind::AddrInUse),
        });
        assert_eq!(relay.exit_code(), EXIT_SOCKET_IN_USE);
    }

    #[test]
    fn test_exit_code_found_through_context() {
        let err = Err::<(), _>(StartupError::Backend("no window server".into()))
            .context("starting cocoa backend")
            .unwrap_err();
        assert_eq!(exit_code_for(&err), EXIT_BACKEND);

        let plain = anyhow::anyhow!("something else");
        assert_eq!(exit_code_for(&plain), EXIT_IO);
    }
}
