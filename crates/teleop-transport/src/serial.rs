//! Unix tty 串口适配器
//!
//! 使用 `nix` termios 将 tty 配置为 raw 模式（8N1，无流控），
//! 读取通过 `poll` 实现超时。

use crate::{
    SerialPort, SerialRxAdapter, SerialTxAdapter, SplittableSerial, TransportDeviceError,
    TransportDeviceErrorKind, TransportError,
};
use nix::fcntl::OFlag;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use nix::sys::termios::{
    self, BaudRate, ControlFlags, FlushArg, SetArg, SpecialCharacterIndices,
};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::os::fd::AsFd;
use std::os::unix::fs::OpenOptionsExt;
use std::time::Duration;
use tracing::{debug, trace};

/// 默认读超时
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(10);

/// 波特率数值转 termios 常量
pub fn baud_rate(baud: u32) -> Result<BaudRate, TransportError> {
    let rate = match baud {
        9600 => BaudRate::B9600,
        19200 => BaudRate::B19200,
        38400 => BaudRate::B38400,
        57600 => BaudRate::B57600,
        115200 => BaudRate::B115200,
        230400 => BaudRate::B230400,
        #[cfg(target_os = "linux")]
        460800 => BaudRate::B460800,
        #[cfg(target_os = "linux")]
        921600 => BaudRate::B921600,
        #[cfg(target_os = "linux")]
        1000000 => BaudRate::B1000000,
        #[cfg(target_os = "linux")]
        1500000 => BaudRate::B1500000,
        #[cfg(target_os = "linux")]
        2000000 => BaudRate::B2000000,
        #[cfg(target_os = "linux")]
        3000000 => BaudRate::B3000000,
        #[cfg(target_os = "linux")]
        4000000 => BaudRate::B4000000,
        other => {
            return Err(TransportDeviceError::new(
                TransportDeviceErrorKind::UnsupportedConfig,
                format!("Unsupported baud rate: {}", other),
            )
            .into());
        },
    };
    Ok(rate)
}

fn open_error(path: &str, e: std::io::Error) -> TransportError {
    let kind = match e.kind() {
        std::io::ErrorKind::NotFound => TransportDeviceErrorKind::NotFound,
        std::io::ErrorKind::PermissionDenied => TransportDeviceErrorKind::AccessDenied,
        _ => TransportDeviceErrorKind::Backend,
    };
    TransportDeviceError::new(kind, format!("Failed to open '{}': {}", path, e)).into()
}

fn termios_error(path: &str, e: nix::errno::Errno) -> TransportError {
    TransportDeviceError::new(
        TransportDeviceErrorKind::UnsupportedConfig,
        format!("Failed to configure '{}' as a serial port: {}", path, e),
    )
    .into()
}

/// 等待可读后读取
fn read_with_timeout(
    file: &mut File,
    buf: &mut [u8],
    timeout: Duration,
) -> Result<usize, TransportError> {
    let timeout_ms = timeout.as_millis().min(65535) as u16;
    let revents = {
        let mut fds = [PollFd::new(file.as_fd(), PollFlags::POLLIN)];
        match poll(&mut fds, PollTimeout::from(timeout_ms)) {
            Ok(0) => return Err(TransportError::Timeout),
            Ok(_) => fds[0].revents().unwrap_or(PollFlags::empty()),
            Err(nix::errno::Errno::EINTR) => return Err(TransportError::Timeout),
            Err(e) => {
                return Err(TransportError::Io(std::io::Error::other(format!(
                    "poll failed: {}",
                    e
                ))));
            },
        }
    };

    if revents.intersects(PollFlags::POLLHUP | PollFlags::POLLERR | PollFlags::POLLNVAL)
        && !revents.contains(PollFlags::POLLIN)
    {
        return Err(TransportDeviceError::new(
            TransportDeviceErrorKind::NoDevice,
            "serial device hung up",
        )
        .into());
    }

    match file.read(buf) {
        Ok(0) => Err(TransportError::Timeout),
        Ok(n) => {
            trace!("Serial RX {} bytes: {}", n, hex::encode_upper(&buf[..n]));
            Ok(n)
        },
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Err(TransportError::Timeout),
        Err(e) if e.kind() == std::io::ErrorKind::Interrupted => Err(TransportError::Timeout),
        // USB 串口拔出后 read 返回 EIO
        Err(e) if e.raw_os_error() == Some(nix::errno::Errno::EIO as i32) => {
            Err(TransportDeviceError::new(
                TransportDeviceErrorKind::NoDevice,
                format!("serial device I/O error: {}", e),
            )
            .into())
        },
        Err(e) => Err(TransportError::Io(e)),
    }
}

fn write_all_logged(file: &mut File, data: &[u8]) -> Result<(), TransportError> {
    file.write_all(data)?;
    file.flush()?;
    trace!("Serial TX: {}", hex::encode_upper(data));
    Ok(())
}

/// tty 串口
///
/// ```no_run
/// use teleop_transport::{SerialPort, TtySerialPort};
///
/// let mut port = TtySerialPort::open("/dev/ttyUSB0", 2_000_000).unwrap();
/// port.write_all(&[0xAA, 0x14, 0x00, 0xEC, 0x55]).unwrap();
/// ```
#[derive(Debug)]
pub struct TtySerialPort {
    file: File,
    path: String,
    read_timeout: Duration,
}

impl TtySerialPort {
    /// 打开并配置串口（raw、8N1、无流控）
    pub fn open(path: impl Into<String>, baud: u32) -> Result<Self, TransportError> {
        let path = path.into();
        let rate = baud_rate(baud)?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(OFlag::O_NOCTTY.bits())
            .open(&path)
            .map_err(|e| open_error(&path, e))?;

        let mut tio = termios::tcgetattr(&file).map_err(|e| termios_error(&path, e))?;
        termios::cfmakeraw(&mut tio);
        termios::cfsetspeed(&mut tio, rate).map_err(|e| termios_error(&path, e))?;
        tio.control_flags |= ControlFlags::CLOCAL | ControlFlags::CREAD;
        tio.control_flags &= !(ControlFlags::CSTOPB | ControlFlags::PARENB | ControlFlags::CRTSCTS);
        tio.control_chars[SpecialCharacterIndices::VMIN as usize] = 0;
        tio.control_chars[SpecialCharacterIndices::VTIME as usize] = 0;
        termios::tcsetattr(&file, SetArg::TCSANOW, &tio).map_err(|e| termios_error(&path, e))?;
        termios::tcflush(&file, FlushArg::TCIOFLUSH).map_err(|e| termios_error(&path, e))?;

        debug!("Serial port '{}' opened at {} baud", path, baud);

        Ok(Self {
            file,
            path,
            read_timeout: DEFAULT_READ_TIMEOUT,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl SerialPort for TtySerialPort {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        read_with_timeout(&mut self.file, buf, self.read_timeout)
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError> {
        write_all_logged(&mut self.file, data)
    }

    fn set_read_timeout(&mut self, timeout: Duration) {
        self.read_timeout = timeout;
    }
}

impl SplittableSerial for TtySerialPort {
    type RxAdapter = TtySerialRx;
    type TxAdapter = TtySerialTx;

    fn split(self) -> Result<(Self::RxAdapter, Self::TxAdapter), TransportError> {
        let tx_file = self.file.try_clone()?;
        trace!("Serial port '{}' split into RX and TX halves", self.path);
        Ok((
            TtySerialRx {
                file: self.file,
                read_timeout: self.read_timeout,
            },
            TtySerialTx { file: tx_file },
        ))
    }
}

/// 串口只读半
#[derive(Debug)]
pub struct TtySerialRx {
    file: File,
    read_timeout: Duration,
}

impl SerialRxAdapter for TtySerialRx {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        read_with_timeout(&mut self.file, buf, self.read_timeout)
    }
}

/// 串口只写半
#[derive(Debug)]
pub struct TtySerialTx {
    file: File,
}

impl SerialTxAdapter for TtySerialTx {
    fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError> {
        write_all_logged(&mut self.file, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_baud_rate_mapping() {
        assert!(baud_rate(115200).is_ok());
        assert!(matches!(
            baud_rate(12345),
            Err(TransportError::Device(TransportDeviceError {
                kind: TransportDeviceErrorKind::UnsupportedConfig,
                ..
            }))
        ));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_high_baud_rates_on_linux() {
        assert!(baud_rate(2_000_000).is_ok());
        assert!(baud_rate(921_600).is_ok());
    }

    #[test]
    fn test_open_missing_device() {
        let err = TtySerialPort::open("/dev/does-not-exist-teleop", 115200).unwrap_err();
        match err {
            TransportError::Device(e) => {
                assert_eq!(e.kind, TransportDeviceErrorKind::NotFound);
                assert!(e.is_fatal());
            },
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_open_regular_file_is_not_a_tty() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let path = file.path().to_string_lossy().into_owned();
        let err = TtySerialPort::open(path, 115200).unwrap_err();
        assert!(matches!(
            err,
            TransportError::Device(TransportDeviceError {
                kind: TransportDeviceErrorKind::UnsupportedConfig,
                ..
            })
        ));
    }
}
