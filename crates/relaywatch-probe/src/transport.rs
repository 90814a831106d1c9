//! Local stream transports

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::{ProbeError, TransportAddr};

pub trait AsyncIo: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T> AsyncIo for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

pub type IoBox = Box<dyn AsyncIo>;

/// Opens a fresh byte stream to the probe target
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<IoBox, ProbeError>;
}

/// Connector for the platform's native local transport
#[derive(Debug, Clone)]
pub struct LocalConnector {
    addr: TransportAddr,
}

impl LocalConnector {
    pub fn new(addr: TransportAddr) -> Self {
        Self { addr }
    }

    pub fn addr(&self) -> &TransportAddr {
        &self.addr
    }
}

#[async_trait]
impl Connector for LocalConnector {
    async fn connect(&self) -> Result<IoBox, ProbeError> {
        match &self.addr {
            TransportAddr::UnixSocket(path) => connect_unix(path).await,
            TransportAddr::NamedPipe(name) => connect_pipe(name).await,
        }
    }
}

#[cfg(unix)]
async fn connect_unix(path: &std::path::Path) -> Result<IoBox, ProbeError> {
    let stream = tokio::net::UnixStream::connect(path)
        .await
        .map_err(|source| ProbeError::Connect {
            address: path.display().to_string(),
            source,
        })?;
    Ok(Box::new(stream))
}

#[cfg(not(unix))]
async fn connect_unix(path: &std::path::Path) -> Result<IoBox, ProbeError> {
    Err(ProbeError::UnsupportedTransport(path.display().to_string()))
}

#[cfg(windows)]
async fn connect_pipe(name: &str) -> Result<IoBox, ProbeError> {
    use std::time::Duration;
    use tokio::net::windows::named_pipe::ClientOptions;

    const ERROR_PIPE_BUSY: i32 = 231;

    // All instances busy: wait for one to free up. The probe timeout bounds this.
    loop {
        match ClientOptions::new().open(name) {
            Ok(client) => return Ok(Box::new(client)),
            Err(e) if e.raw_os_error() == Some(ERROR_PIPE_BUSY) => {
                tracing::debug!(pipe = %name, "Named pipe busy, retrying");
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            Err(source) => {
                return Err(ProbeError::Connect {
                    address: name.to_string(),
                    source,
                });
            }
        }
    }
}

#[cfg(not(windows))]
async fn connect_pipe(name: &str) -> Result<IoBox, ProbeError> {
    Err(ProbeError::UnsupportedTransport(name.to_string()))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn connects_to_unix_socket() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("relay.sock");
        let _listener = tokio::net::UnixListener::bind(&path).unwrap();

        let connector = LocalConnector::new(TransportAddr::UnixSocket(path));
        assert!(connector.connect().await.is_ok());
    }

    #[tokio::test]
    async fn missing_socket_is_a_connect_error() {
        let dir = tempdir().unwrap();
        let connector = LocalConnector::new(TransportAddr::UnixSocket(dir.path().join("absent.sock")));

        match connector.connect().await {
            Err(ProbeError::Connect { address, .. }) => assert!(address.ends_with("absent.sock")),
            other => panic!("Unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn named_pipe_unsupported_off_windows() {
        let connector = LocalConnector::new(TransportAddr::NamedPipe(r"\\.\pipe\test".into()));
        assert!(matches!(
            connector.connect().await,
            Err(ProbeError::UnsupportedTransport(_))
        ));
    }
}
