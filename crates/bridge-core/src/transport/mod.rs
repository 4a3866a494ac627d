//! Serial channel acquisition.
//!
//! A [`Connector`] knows how to find and open the device's byte stream. It
//! hands back independent read and write halves; the [`Session`] takes
//! ownership of both for the lifetime of one connection and drops them on
//! close. Nothing in this module parses bytes.
//!
//! # Implementations
//!
//! - [`TtyConnector`] (feature `tty`, unix only): a USB-CDC or UART device
//!   node such as `/dev/ttyACM0`
//! - Any in-memory pipe, e.g. [`tokio::io::duplex`], for tests and
//!   simulators
//!
//! # Example
//!
//! ```ignore
//! use ohw_bridge_core::{Session, transport::TtyConnector};
//!
//! let session = Session::new(TtyConnector::discover());
//! session.connect().await?;
//! ```
//!
//! [`Session`]: crate::Session

#[cfg(all(unix, feature = "tty"))]
pub mod tty;

#[cfg(all(unix, feature = "tty"))]
pub use tty::TtyConnector;

use core::future::Future;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::config::PortSettings;
use crate::error::Result;

/// Opens the serial channel to a device.
///
/// Implementations must apply `settings` before returning, so the first byte
/// read is already at the right line speed.
pub trait Connector: Send + Sync + 'static {
    /// Read half of an open channel.
    type Reader: AsyncRead + Unpin + Send + 'static;

    /// Write half of an open channel.
    type Writer: AsyncWrite + Unpin + Send + 'static;

    /// Acquires and opens the channel.
    ///
    /// # Errors
    ///
    /// - [`Error::TransportUnavailable`] if there is no channel to acquire
    /// - [`Error::PortOpen`] if the device refuses to open or configure
    ///
    /// [`Error::TransportUnavailable`]: crate::Error::TransportUnavailable
    /// [`Error::PortOpen`]: crate::Error::PortOpen
    fn open(
        &self,
        settings: &PortSettings,
    ) -> impl Future<Output = Result<(Self::Reader, Self::Writer)>> + Send;
}
