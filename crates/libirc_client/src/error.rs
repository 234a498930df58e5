//! Per-subsystem error types. Each one is a small hand-written enum with a `Display`/`Error`
//! impl, following the style already used by `stream::StreamError` rather than reaching for a
//! derive macro.

use std::fmt;

/// Errors surfaced by [`crate::linesocket::LineSocket`] and the reader/writer tasks it spawns.
#[derive(Debug)]
pub enum SocketError {
    /// The peer closed the connection. Any complete lines buffered before the close are
    /// delivered to the inbound queue before this is raised.
    Eof,
    BrokenPipe,
    Io(std::io::Error),
    Tls(crate::stream::StreamError),
    /// None of the resolved addresses could be connected to within the per-address timeout.
    ConnectFailed,
    Dns(std::io::Error),
}

impl fmt::Display for SocketError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocketError::Eof => write!(f, "connection closed by peer"),
            SocketError::BrokenPipe => write!(f, "broken pipe"),
            SocketError::Io(err) => write!(f, "I/O error: {}", err),
            SocketError::Tls(err) => write!(f, "TLS error: {}", err),
            SocketError::ConnectFailed => write!(f, "could not connect to any resolved address"),
            SocketError::Dns(err) => write!(f, "DNS resolution failed: {}", err),
        }
    }
}

impl std::error::Error for SocketError {}

impl From<std::io::Error> for SocketError {
    fn from(err: std::io::Error) -> Self {
        SocketError::Io(err)
    }
}

impl From<crate::stream::StreamError> for SocketError {
    fn from(err: crate::stream::StreamError) -> Self {
        SocketError::Tls(err)
    }
}

/// Raised by the message parser when a line can't be split into `prefix command args`.
#[derive(Debug)]
pub struct ParseError {
    pub reason: String,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "could not parse IRC line: {}", self.reason)
    }
}

impl std::error::Error for ParseError {}

/// Raised by [`crate::signals::SignalTable::wait`].
#[derive(Debug)]
pub enum SignalError {
    /// No `emit` arrived for this signal name within the requested timeout.
    Timeout,
}

impl fmt::Display for SignalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalError::Timeout => write!(f, "timed out waiting for signal"),
        }
    }
}

impl std::error::Error for SignalError {}

/// Raised by [`crate::component::ComponentManager`].
#[derive(Debug)]
pub enum ComponentError {
    /// A component's `depends_on` named a component that was never loaded or configured.
    UnknownDependency(String),
    /// Waiting for a dependency to finish loading timed out.
    DependencyTimeout(String),
    /// `components.load`/`plugins.load` named something with no registered factory.
    NotRegistered(String),
    /// The component's own factory or `init` rejected its config or setup.
    InitFailed(String),
}

impl fmt::Display for ComponentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComponentError::UnknownDependency(name) => {
                write!(f, "unknown component dependency: {}", name)
            }
            ComponentError::DependencyTimeout(name) => {
                write!(f, "timed out waiting for component dependency: {}", name)
            }
            ComponentError::NotRegistered(name) => {
                write!(f, "no component factory registered under the name {:?}", name)
            }
            ComponentError::InitFailed(reason) => write!(f, "component init failed: {}", reason),
        }
    }
}

impl std::error::Error for ComponentError {}

/// Raised by the [`crate::storage`] module.
#[derive(Debug)]
pub enum StorageError {
    Driver(String),
    Serialize(serde_json::Error),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::Driver(msg) => write!(f, "storage driver error: {}", msg),
            StorageError::Serialize(err) => write!(f, "serialization error: {}", err),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialize(err)
    }
}

/// Raised by [`crate::events::Events::unobserve`].
#[derive(Debug)]
pub enum EventError {
    /// The observer handed to `unobserve` was never registered for that name.
    NotObserved,
}

impl fmt::Display for EventError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventError::NotObserved => write!(f, "observer was not registered for this event"),
        }
    }
}

impl std::error::Error for EventError {}

/// Raised while parsing a `host[:port]` server address string.
#[derive(Debug)]
pub struct ServerAddrError {
    pub input: String,
}

impl fmt::Display for ServerAddrError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "could not parse server address: {:?}", self.input)
    }
}

impl std::error::Error for ServerAddrError {}
