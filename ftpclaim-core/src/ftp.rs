use std::fs::File;
use std::io;
use std::path::Path;
use std::time::Duration;

use ftp::FtpStream;
use ftp::types::FileType;
use thiserror::Error;
use tracing::{debug, warn};

pub const DEFAULT_FTP_PORT: u16 = 21;

#[derive(Debug, Error)]
pub enum FtpError {
    #[error("invalid ftp host: {0:?}")]
    InvalidHost(String),
    #[error("connection to {address} failed: {source}")]
    Connect {
        address: String,
        #[source]
        source: ftp::FtpError,
    },
    #[error("connection timed out after {0:?}")]
    Timeout(Duration),
    #[error("login rejected for user {user}: {source}")]
    Login {
        user: String,
        #[source]
        source: ftp::FtpError,
    },
    #[error("cannot change directory to {path}: {source}")]
    ChangeDir {
        path: String,
        #[source]
        source: ftp::FtpError,
    },
    #[error("cannot list {path}: {source}")]
    List {
        path: String,
        #[source]
        source: ftp::FtpError,
    },
    #[error("cannot retrieve {path}: {source}")]
    Retrieve {
        path: String,
        #[source]
        source: ftp::FtpError,
    },
    #[error("ftp command failed: {0}")]
    Command(#[source] ftp::FtpError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("remote task failed: {0}")]
    Task(String),
}

/// Where and how to log in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FtpEndpoint {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub io_timeout: Option<Duration>,
}

impl FtpEndpoint {
    /// Accepts `host` or `host:port`.
    pub fn parse(
        host_port: &str,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, FtpError> {
        let trimmed = host_port.trim();
        if trimmed.is_empty() {
            return Err(FtpError::InvalidHost(host_port.to_string()));
        }
        let (host, port) = match trimmed.rsplit_once(':') {
            Some((host, port)) if !host.contains(':') => {
                let port = port
                    .parse::<u16>()
                    .ok()
                    .filter(|port| *port > 0)
                    .ok_or_else(|| FtpError::InvalidHost(host_port.to_string()))?;
                (host, port)
            }
            _ => (trimmed, DEFAULT_FTP_PORT),
        };
        if host.is_empty() {
            return Err(FtpError::InvalidHost(host_port.to_string()));
        }
        Ok(Self {
            host: host.to_string(),
            port,
            user: user.into(),
            password: password.into(),
            io_timeout: None,
        })
    }

    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = Some(timeout);
        self
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Blocking primitives the folder coordinator needs from a remote tree.
pub trait RemoteSession {
    fn change_dir(&mut self, path: &str) -> Result<(), FtpError>;

    /// Entry names under `path` (or the working directory), in server order.
    fn list_names(&mut self, path: Option<&str>) -> Result<Vec<String>, FtpError>;

    /// Streams a remote file into `local_path`, truncating any existing file.
    fn retrieve_to(&mut self, remote_path: &str, local_path: &Path) -> Result<u64, FtpError>;

    fn close(&mut self);
}

/// Opens fresh sessions; cloned into blocking worker tasks.
pub trait RemoteConnector: Clone + Send + Sync + 'static {
    type Session: RemoteSession + Send + 'static;

    fn connect(&self) -> Result<Self::Session, FtpError>;
}

pub struct FtpSession {
    stream: FtpStream,
    address: String,
}

impl FtpSession {
    pub fn connect(endpoint: &FtpEndpoint) -> Result<Self, FtpError> {
        let address = endpoint.address();
        debug!(%address, "connecting to ftp server");
        let mut stream = FtpStream::connect((endpoint.host.as_str(), endpoint.port)).map_err(
            |source| FtpError::Connect {
                address: address.clone(),
                source,
            },
        )?;
        if let Some(timeout) = endpoint.io_timeout {
            stream.get_ref().set_read_timeout(Some(timeout))?;
            stream.get_ref().set_write_timeout(Some(timeout))?;
        }
        stream
            .login(&endpoint.user, &endpoint.password)
            .map_err(|source| FtpError::Login {
                user: endpoint.user.clone(),
                source,
            })?;
        stream
            .transfer_type(FileType::Binary)
            .map_err(FtpError::Command)?;
        Ok(Self { stream, address })
    }
}

impl RemoteSession for FtpSession {
    fn change_dir(&mut self, path: &str) -> Result<(), FtpError> {
        self.stream
            .cwd(path)
            .map_err(|source| FtpError::ChangeDir {
                path: path.to_string(),
                source,
            })
    }

    fn list_names(&mut self, path: Option<&str>) -> Result<Vec<String>, FtpError> {
        self.stream
            .nlst(path)
            .map_err(|source| FtpError::List {
                path: path.unwrap_or(".").to_string(),
                source,
            })
    }

    fn retrieve_to(&mut self, remote_path: &str, local_path: &Path) -> Result<u64, FtpError> {
        self.stream
            .retr(remote_path, |reader| {
                let mut file = File::create(local_path).map_err(ftp::FtpError::ConnectionError)?;
                io::copy(reader, &mut file).map_err(ftp::FtpError::ConnectionError)
            })
            .map_err(|source| FtpError::Retrieve {
                path: remote_path.to_string(),
                source,
            })
    }

    fn close(&mut self) {
        if let Err(err) = self.stream.quit() {
            warn!(address = %self.address, "closing ftp session failed: {err}");
        }
    }
}

#[derive(Debug, Clone)]
pub struct FtpConnector {
    endpoint: FtpEndpoint,
}

impl FtpConnector {
    pub fn new(endpoint: FtpEndpoint) -> Self {
        Self { endpoint }
    }

    pub fn endpoint(&self) -> &FtpEndpoint {
        &self.endpoint
    }
}

impl RemoteConnector for FtpConnector {
    type Session = FtpSession;

    fn connect(&self) -> Result<FtpSession, FtpError> {
        FtpSession::connect(&self.endpoint)
    }
}
