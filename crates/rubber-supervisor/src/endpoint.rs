//! Resolution of the supervisor server endpoint from the listener environment.
//!
//! Supervisor exports `SUPERVISOR_SERVER_URL` (and optionally credentials)
//! to every event listener it spawns. The URL is either `unix:///path` for
//! the control socket or `http://host[:port]` for the inet server.

use std::env;
use std::fmt;
use std::str::FromStr;

use camino::Utf8PathBuf;
use thiserror::Error;
use url::Url;

/// Environment variable holding the supervisor server URL.
pub const SERVER_URL_ENV: &str = "SUPERVISOR_SERVER_URL";
/// Environment variable holding the optional XML-RPC username.
pub const USERNAME_ENV: &str = "SUPERVISOR_USERNAME";
/// Environment variable holding the optional XML-RPC password.
pub const PASSWORD_ENV: &str = "SUPERVISOR_PASSWORD";

/// Where supervisor's XML-RPC interface listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEndpoint {
    /// Unix domain socket endpoint.
    Unix {
        /// Socket path.
        path: Utf8PathBuf,
    },
    /// HTTP endpoint.
    Http {
        /// Host name or address.
        host: String,
        /// TCP port.
        port: u16,
    },
}

impl ServerEndpoint {
    /// Builds a Unix domain socket endpoint.
    #[must_use]
    pub fn unix(path: impl Into<Utf8PathBuf>) -> Self {
        Self::Unix { path: path.into() }
    }

    /// Builds an HTTP endpoint.
    #[must_use]
    pub fn http(host: impl Into<String>, port: u16) -> Self {
        Self::Http {
            host: host.into(),
            port,
        }
    }

    /// Value for the HTTP `Host` header.
    pub(crate) fn host_header(&self) -> String {
        match self {
            Self::Unix { .. } => String::from("localhost"),
            Self::Http { host, port } => format!("{host}:{port}"),
        }
    }
}

impl fmt::Display for ServerEndpoint {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unix { path } => write!(formatter, "unix://{path}"),
            Self::Http { host, port } => write!(formatter, "http://{host}:{port}"),
        }
    }
}

impl FromStr for ServerEndpoint {
    type Err = EndpointError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let url = Url::parse(input)?;
        match url.scheme() {
            "unix" => {
                let path = url.path();
                if path.is_empty() {
                    return Err(EndpointError::MissingUnixPath(input.to_owned()));
                }
                Ok(Self::unix(path))
            }
            "http" => {
                let host = url
                    .host_str()
                    .ok_or_else(|| EndpointError::MissingHost(input.to_owned()))?;
                let port = url
                    .port_or_known_default()
                    .ok_or_else(|| EndpointError::MissingHost(input.to_owned()))?;
                Ok(Self::http(host, port))
            }
            other => Err(EndpointError::UnsupportedScheme(other.to_owned())),
        }
    }
}

/// HTTP basic-auth credentials for supervisor's XML-RPC interface.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    /// Creates a credential pair.
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Account name.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    pub(crate) fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Connection details supervisor hands to its event listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorEnvironment {
    endpoint: ServerEndpoint,
    credentials: Option<Credentials>,
}

impl SupervisorEnvironment {
    /// Creates the environment from explicit parts.
    #[must_use]
    pub const fn new(endpoint: ServerEndpoint, credentials: Option<Credentials>) -> Self {
        Self {
            endpoint,
            credentials,
        }
    }

    /// Reads the listener environment of the current process.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError::MissingServerUrl`] when the process was not
    /// launched by supervisor, or a parse error for a malformed URL.
    pub fn from_env() -> Result<Self, EndpointError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Resolves the environment through `lookup`, which maps variable names
    /// to values.
    ///
    /// # Errors
    ///
    /// See [`SupervisorEnvironment::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, EndpointError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let url = lookup(SERVER_URL_ENV).ok_or(EndpointError::MissingServerUrl)?;
        let endpoint = url.parse::<ServerEndpoint>()?;
        let credentials = lookup(USERNAME_ENV)
            .filter(|username| !username.is_empty())
            .map(|username| Credentials::new(username, lookup(PASSWORD_ENV).unwrap_or_default()));
        Ok(Self::new(endpoint, credentials))
    }

    /// Server endpoint.
    #[must_use]
    pub const fn endpoint(&self) -> &ServerEndpoint {
        &self.endpoint
    }

    /// Optional basic-auth credentials.
    #[must_use]
    pub const fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }
}

/// Errors raised while resolving the supervisor endpoint.
#[derive(Debug, Error)]
pub enum EndpointError {
    /// The process was not started as a supervisor event listener.
    #[error("rubber must be run as a supervisor event listener (SUPERVISOR_SERVER_URL is not set)")]
    MissingServerUrl,
    /// Scheme was neither `unix` nor `http`.
    #[error("unsupported supervisor server scheme '{0}'")]
    UnsupportedScheme(String),
    /// HTTP URL had no host.
    #[error("missing host in supervisor server URL '{0}'")]
    MissingHost(String),
    /// Unix URL had no socket path.
    #[error("missing socket path in supervisor server URL '{0}'")]
    MissingUnixPath(String),
    /// URL failed to parse.
    #[error("invalid supervisor server URL: {0}")]
    Url(#[from] url::ParseError),
}
