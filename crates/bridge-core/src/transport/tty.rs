//! USB-CDC / UART device nodes.
//!
//! The node is opened non-blocking and registered with the tokio reactor
//! through [`AsyncFd`]. Dropping a pending read simply forgets the readiness
//! wait, so a closed session leaves no thread parked on the descriptor, and
//! the descriptor itself closes once both halves are dropped.

use std::fs::{self, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use nix::fcntl::OFlag;
use nix::sys::termios::{
    self, BaudRate, ControlFlags, SetArg, SpecialCharacterIndices, cfmakeraw, cfsetspeed,
};
use tokio::io::unix::AsyncFd;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::{debug, info};

use super::Connector;
use crate::config::{DataBits, Parity, PortSettings, StopBits};
use crate::error::{Error, Result};

/// Directory scanned for candidate devices.
const DEVICE_DIR: &str = "/dev";

/// Name prefixes of serial devices a wallet may enumerate as.
const DEVICE_PREFIXES: [&str; 4] = ["ttyACM", "ttyUSB", "cu.usbmodem", "cu.usbserial"];

/// Opens a serial device node in raw mode.
#[derive(Debug, Clone, Default)]
pub struct TtyConnector {
    /// Explicit device path; `None` picks the first discovered device.
    path: Option<PathBuf>,
}

impl TtyConnector {
    /// Connector for a specific device node.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    /// Connector that opens the first device found by [`list_devices`](Self::list_devices).
    #[must_use]
    pub const fn discover() -> Self {
        Self { path: None }
    }

    /// The configured device path, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Lists serial device nodes that look like a USB wallet, sorted by name.
    #[must_use]
    pub fn list_devices() -> Vec<PathBuf> {
        let Ok(entries) = fs::read_dir(DEVICE_DIR) else {
            return Vec::new();
        };

        let mut devices: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_str().is_some_and(is_device_name))
            .map(|entry| entry.path())
            .collect();
        devices.sort();
        devices
    }
}

impl Connector for TtyConnector {
    type Reader = TtyReader;
    type Writer = TtyWriter;

    async fn open(&self, settings: &PortSettings) -> Result<(TtyReader, TtyWriter)> {
        let path = self.path.clone();
        let settings = *settings;

        let file = tokio::task::spawn_blocking(move || {
            let path = match path {
                Some(path) => path,
                None => TtyConnector::list_devices()
                    .into_iter()
                    .next()
                    .ok_or(Error::TransportUnavailable)?,
            };
            open_raw(&path, &settings)
        })
        .await
        .map_err(|e| Error::PortOpen(e.to_string()))??;

        let fd = AsyncFd::new(file)
            .map_err(|e| Error::PortOpen(format!("register with reactor: {e}")))?;
        let fd = Arc::new(fd);
        Ok((
            TtyReader {
                fd: Arc::clone(&fd),
            },
            TtyWriter { fd },
        ))
    }
}

/// Read half of an open device node.
#[derive(Debug)]
pub struct TtyReader {
    fd: Arc<AsyncFd<fs::File>>,
}

/// Write half of an open device node.
#[derive(Debug)]
pub struct TtyWriter {
    fd: Arc<AsyncFd<fs::File>>,
}

impl AsyncRead for TtyReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        loop {
            let mut guard = ready!(self.fd.poll_read_ready(cx))?;

            let unfilled = buf.initialize_unfilled();
            match guard.try_io(|inner| inner.get_ref().read(unfilled)) {
                Ok(Ok(len)) => {
                    buf.advance(len);
                    return Poll::Ready(Ok(()));
                }
                Ok(Err(err)) => return Poll::Ready(Err(err)),
                Err(_would_block) => {}
            }
        }
    }
}

impl AsyncWrite for TtyWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        loop {
            let mut guard = ready!(self.fd.poll_write_ready(cx))?;

            match guard.try_io(|inner| inner.get_ref().write(buf)) {
                Ok(result) => return Poll::Ready(result),
                Err(_would_block) => {}
            }
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        // Writes go straight to the line discipline.
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Opens `path` and applies `settings` in raw mode.
fn open_raw(path: &Path, settings: &PortSettings) -> Result<fs::File> {
    let port_err = |what: &str, e: &dyn core::fmt::Display| {
        Error::PortOpen(format!("{}: {what}: {e}", path.display()))
    };

    debug!(path = %path.display(), "opening device");
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags((OFlag::O_NOCTTY | OFlag::O_NONBLOCK).bits())
        .open(path)
        .map_err(|e| port_err("open", &e))?;

    let mut tio = termios::tcgetattr(&file).map_err(|e| port_err("tcgetattr", &e))?;
    cfmakeraw(&mut tio);

    let baud = baud_rate(settings.baud_rate).ok_or_else(|| {
        Error::PortOpen(format!("unsupported baud rate {}", settings.baud_rate))
    })?;
    cfsetspeed(&mut tio, baud).map_err(|e| port_err("cfsetspeed", &e))?;

    tio.control_flags.remove(
        ControlFlags::CSIZE | ControlFlags::PARENB | ControlFlags::PARODD | ControlFlags::CSTOPB,
    );
    tio.control_flags.insert(match settings.data_bits {
        DataBits::Seven => ControlFlags::CS7,
        DataBits::Eight => ControlFlags::CS8,
    });
    match settings.parity {
        Parity::None => {}
        Parity::Even => tio.control_flags.insert(ControlFlags::PARENB),
        Parity::Odd => tio
            .control_flags
            .insert(ControlFlags::PARENB | ControlFlags::PARODD),
    }
    if settings.stop_bits == StopBits::Two {
        tio.control_flags.insert(ControlFlags::CSTOPB);
    }
    tio.control_flags
        .insert(ControlFlags::CLOCAL | ControlFlags::CREAD);

    // Byte-at-a-time delivery, no inter-byte timer.
    tio.control_chars[SpecialCharacterIndices::VMIN as usize] = 1;
    tio.control_chars[SpecialCharacterIndices::VTIME as usize] = 0;

    termios::tcsetattr(&file, SetArg::TCSANOW, &tio).map_err(|e| port_err("tcsetattr", &e))?;

    info!(path = %path.display(), baud = settings.baud_rate, "device opened");
    Ok(file)
}

/// Maps a line speed to its termios constant.
const fn baud_rate(rate: u32) -> Option<BaudRate> {
    Some(match rate {
        9_600 => BaudRate::B9600,
        19_200 => BaudRate::B19200,
        38_400 => BaudRate::B38400,
        57_600 => BaudRate::B57600,
        115_200 => BaudRate::B115200,
        _ => return None,
    })
}

fn is_device_name(name: &str) -> bool {
    DEVICE_PREFIXES.iter().any(|prefix| name.starts_with(prefix))
}

#[cfg(test)]
mod tests {
    use std::os::fd::OwnedFd;
    use std::time::Duration;

    use bytes::Bytes;
    use nix::pty::{OpenptyResult, Winsize, openpty};
    use nix::sys::termios::Termios;
    use tokio::sync::mpsc;

    use super::*;
    use crate::frame;
    use crate::message::RawCodec;
    use crate::session::Session;

    /// A pseudo-terminal standing in for the wallet: the test writes and
    /// reads the master end, the connector opens the slave node.
    struct Pty {
        master: fs::File,
        _slave: OwnedFd,
        path: PathBuf,
    }

    fn pty() -> Pty {
        let OpenptyResult { master, slave } =
            openpty(None::<&Winsize>, None::<&Termios>).unwrap();
        let path = nix::unistd::ttyname(&slave).unwrap();
        Pty {
            master: fs::File::from(master),
            _slave: slave,
            path,
        }
    }

    #[test]
    fn recognizes_device_names() {
        assert!(is_device_name("ttyACM0"));
        assert!(is_device_name("ttyUSB3"));
        assert!(is_device_name("cu.usbmodem14101"));
        assert!(!is_device_name("tty0"));
        assert!(!is_device_name("null"));
    }

    #[test]
    fn fixed_baud_rate_is_supported() {
        assert_eq!(baud_rate(115_200), Some(BaudRate::B115200));
        assert_eq!(baud_rate(12_345), None);
    }

    #[test]
    fn connector_paths() {
        assert_eq!(TtyConnector::discover().path(), None);
        assert_eq!(
            TtyConnector::new("/dev/ttyACM0").path(),
            Some(Path::new("/dev/ttyACM0"))
        );
    }

    #[tokio::test]
    async fn missing_device_fails_to_open() {
        let connector = TtyConnector::new("/dev/ohw-bridge-does-not-exist");

        let result = connector.open(&PortSettings::FIXED).await;

        assert!(matches!(result, Err(Error::PortOpen(_))));
    }

    #[tokio::test]
    async fn regular_file_is_not_a_tty() {
        let path = std::env::temp_dir().join(format!("ohw-bridge-tty-{}", std::process::id()));
        fs::write(&path, b"").unwrap();

        let result = TtyConnector::new(&path).open(&PortSettings::FIXED).await;
        fs::remove_file(&path).unwrap();

        assert!(matches!(result, Err(Error::PortOpen(_))));
    }

    #[tokio::test]
    async fn send_reaches_device() {
        let mut pty = pty();
        let session = Session::with_codec(TtyConnector::new(&pty.path), RawCodec);
        session.connect().await.unwrap();

        session.send(b"ping").await.unwrap();

        let mut packet = [0u8; 9];
        pty.master.read_exact(&mut packet).unwrap();
        assert_eq!(&packet[..5], &[0xE2, 0x82, 0xBF, 0x00, 0x04]);
        assert_eq!(&packet[5..], b"ping");
        session.close().await;
    }

    #[tokio::test]
    async fn reply_after_reconnect_reaches_new_session() {
        let mut pty = pty();
        let session = Session::with_codec(TtyConnector::new(&pty.path), RawCodec);
        let (tx, mut rx) = mpsc::unbounded_channel();
        session.on_message(move |payload: Bytes| {
            tx.send(payload).ok();
        });

        session.connect().await.unwrap();
        session.close().await;
        session.connect().await.unwrap();
        pty.master
            .write_all(&frame::encode(b"reply").unwrap())
            .unwrap();

        let payload = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("reply lost after reconnect")
            .unwrap();
        assert_eq!(&payload[..], b"reply");
        session.close().await;
    }

    #[test]
    fn runtime_shuts_down_after_close() {
        let pty = pty();
        let path = pty.path.clone();
        let (done_tx, done_rx) = std::sync::mpsc::channel();

        std::thread::spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            runtime.block_on(async {
                let session = Session::new(TtyConnector::new(path));
                session.connect().await.unwrap();
                session.close().await;
            });
            drop(runtime);
            done_tx.send(()).ok();
        });

        done_rx
            .recv_timeout(Duration::from_secs(3))
            .expect("runtime hung on a pending device read");
        drop(pty);
    }
}
