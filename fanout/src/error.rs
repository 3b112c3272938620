//! Error types for the `fanout` crate.
//!
//! Follows the workspace pattern: a root `Error` struct holding an error kind
//! tree plus the optional underlying cause.

use std::error::Error as StdError;
use std::fmt;

#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: ErrorKind,
}

/// Major categories of errors in the fanout subsystem.
#[derive(Debug, PartialEq)]
pub enum ErrorKind {
    Registry(RegistryErrorKind),
    Broker(BrokerErrorKind),
}

/// Errors from connection registry operations.
#[derive(Debug, PartialEq)]
pub enum RegistryErrorKind {
    /// The same connection handle was registered twice.
    AlreadyRegistered,
    /// The registry has been shut down and accepts no new connections.
    Closed,
}

/// Errors from the upstream pub/sub broker.
#[derive(Debug, PartialEq)]
pub enum BrokerErrorKind {
    /// The broker address could not be parsed or reached.
    Connect,
    Subscribe,
    Publish,
    /// The upstream subscription ended or delivered something unusable.
    Receive,
}

impl Error {
    pub fn registry(kind: RegistryErrorKind) -> Self {
        Error {
            source: None,
            error_kind: ErrorKind::Registry(kind),
        }
    }

    pub fn broker<E>(kind: BrokerErrorKind, source: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        Error {
            source: Some(source.into()),
            error_kind: ErrorKind::Broker(kind),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.error_kind {
            ErrorKind::Registry(kind) => write!(f, "Registry error: {:?}", kind)?,
            ErrorKind::Broker(kind) => write!(f, "Broker error: {:?}", kind)?,
        }
        if let Some(source) = &self.source {
            write!(f, " ({source})")?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}
