//! # Ferry SFTP
//!
//! Client side of the SSH File Transfer Protocol, versions 0 through 3.
//!
//! This crate implements the protocol as defined in:
//! - draft-ietf-secsh-filexfer-02: SSH File Transfer Protocol
//! - OpenSSH PROTOCOL: `posix-rename@openssh.com`, `statvfs@openssh.com`,
//!   `fstatvfs@openssh.com`
//!
//! The SSH transport is not part of this crate. [`Client::init`] takes any
//! pair of async byte streams that already reach an SFTP server, such as the
//! stdout/stdin of `ssh -s host sftp`.
//!
//! ## Features
//!
//! - Version negotiation with extension discovery
//! - Metadata operations (stat, setstat, rename, symlink, realpath, statvfs)
//! - Directory listing with path traversal filtering
//! - Pipelined downloads and uploads with an adaptive request window
//! - Cooperative cancellation through [`CancellationToken`]

pub mod client;
pub mod config;
pub mod download;
pub mod error;
pub mod extensions;
pub mod local;
pub mod protocol;
pub mod readdir;
pub mod upload;
pub mod wire;

pub use client::Client;
pub use config::{Config, LogFormat, LoggingConfig, SshConfig};
pub use download::TransferSummary;
pub use error::{Error, Result};
pub use extensions::Extensions;
pub use local::{LocalSink, LocalSource};
pub use protocol::{FileAttrs, OpenFlags, StatVfs, StatusCode};
pub use tokio_util::sync::CancellationToken;
pub use wire::{DirEntry, Handle};
