//! Probe endpoint addressing

use http::Uri;
use relaywatch_util::{is_named_pipe, DEFAULT_BASE_URL};
use std::fmt;
use std::path::PathBuf;

use crate::ProbeError;

/// Local transport address
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportAddr {
    /// Filesystem path of a Unix domain socket
    UnixSocket(PathBuf),
    /// Windows pipe name, e.g. `\\.\pipe\docker_engine`
    NamedPipe(String),
}

impl TransportAddr {
    /// Classify an address by its shape
    pub fn parse(address: &str) -> Self {
        if is_named_pipe(address) {
            Self::NamedPipe(address.to_string())
        } else {
            Self::UnixSocket(PathBuf::from(address))
        }
    }
}

impl fmt::Display for TransportAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportAddr::UnixSocket(path) => write!(f, "{}", path.display()),
            TransportAddr::NamedPipe(name) => f.write_str(name),
        }
    }
}

/// Where health probes are sent
///
/// The base URL never reaches the network: its host becomes the `Host`
/// header and its path prefixes every request path.
#[derive(Debug, Clone)]
pub struct ProbeEndpoint {
    pub transport: TransportAddr,
    base_url: Uri,
}

impl ProbeEndpoint {
    pub fn new(transport: TransportAddr, base_url: &str) -> Result<Self, ProbeError> {
        let invalid = |reason: &str| ProbeError::InvalidUrl {
            url: base_url.to_string(),
            reason: reason.to_string(),
        };

        let uri = base_url
            .parse::<Uri>()
            .map_err(|e| invalid(&e.to_string()))?;

        if uri.host().is_none() {
            return Err(invalid("missing host"));
        }
        if uri.query().is_some() {
            return Err(invalid("query not allowed"));
        }

        Ok(Self {
            transport,
            base_url: uri,
        })
    }

    /// Endpoint for an address with the placeholder base URL
    pub fn from_address(address: &str) -> Self {
        Self {
            transport: TransportAddr::parse(address),
            base_url: Uri::from_static(DEFAULT_BASE_URL),
        }
    }

    /// Value for the `Host` header
    pub fn host(&self) -> &str {
        self.base_url.host().unwrap_or("localhost")
    }

    pub fn base_url(&self) -> &Uri {
        &self.base_url
    }

    /// Origin-form request target for `path` under the base URL
    pub fn request_path(&self, path: &str) -> String {
        let prefix = self.base_url.path().trim_end_matches('/');
        let path = path.trim_start_matches('/');
        format!("{}/{}", prefix, path)
    }
}

impl fmt::Display for ProbeEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.transport, self.base_url)
    }
}
