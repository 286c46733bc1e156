//! Error types for SFTP client operations
//!
//! NIST 800-53: SI-11 (Error Handling)
//! Implementation: Two classes of failure. Fatal errors mean the reply stream
//! can no longer be parsed and the connection must be dropped. Operational
//! errors (server STATUS codes, local file failures) leave the connection
//! usable for further requests.

use crate::protocol::{MessageType, StatusCode};
use thiserror::Error;

/// Result type alias for SFTP operations
pub type Result<T> = std::result::Result<T, Error>;

/// SFTP error types
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error on the transport streams
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The server closed its end while a message was expected
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    /// A message exceeded the protocol size limit
    #[error("Message too long: {0} bytes")]
    MessageTooLong(u32),

    /// SFTP protocol error
    ///
    /// NIST 800-53: SI-11
    /// Implementation: malformed body, unknown opcode, exhausted id space
    #[error("SFTP protocol error: {0}")]
    Protocol(String),

    /// A reply carried a different id than the request it answers
    #[error("ID mismatch ({got} != {expected})")]
    IdMismatch {
        /// Id of the request that was sent
        expected: u32,
        /// Id found in the reply
        got: u32,
    },

    /// A reply of a type the pending request cannot produce, or with an id
    /// that matches no outstanding request
    #[error("Unexpected reply {kind:?} for request {id}")]
    UnexpectedReply {
        /// Reply type received
        kind: MessageType,
        /// Id carried by the reply
        id: u32,
    },

    /// The version exchange failed
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// The server answered with a non-success status
    ///
    /// NIST 800-53: SI-11
    /// Implementation: reported to the caller, connection stays usable
    #[error("{code}{}", message_suffix(.message))]
    Status {
        /// Status code sent by the server
        code: StatusCode,
        /// Optional diagnostic text sent by the server
        message: String,
    },

    /// The negotiated protocol does not offer the operation
    #[error("Operation not supported: {0}")]
    Unsupported(String),

    /// Transfer source or destination is not a regular file
    #[error("Not a regular file: {0}")]
    NotRegularFile(String),

    /// Failure on the caller-supplied local sink or source
    #[error("Local I/O error: {0}")]
    LocalIo(std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

fn message_suffix(message: &str) -> String {
    if message.is_empty() {
        String::new()
    } else {
        format!(" ({})", message)
    }
}

impl Error {
    /// Build a status error without server text
    pub fn status(code: StatusCode) -> Self {
        Error::Status {
            code,
            message: String::new(),
        }
    }

    /// Check if the connection must be abandoned
    ///
    /// # Returns
    ///
    /// `true` when the reply stream is desynchronized or gone
    ///
    /// # NIST 800-53: SI-11 (Error Handling)
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Io(_)
                | Error::ConnectionClosed(_)
                | Error::MessageTooLong(_)
                | Error::Protocol(_)
                | Error::IdMismatch { .. }
                | Error::UnexpectedReply { .. }
                | Error::Handshake(_)
        )
    }

    /// Status code carried by a server failure
    pub fn status_code(&self) -> Option<StatusCode> {
        match self {
            Error::Status { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Check if the server reported the path as missing
    pub fn is_not_found(&self) -> bool {
        self.status_code() == Some(StatusCode::NoSuchFile)
    }
}
