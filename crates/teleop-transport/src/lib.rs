//! # Teleop Transport Layer
//!
//! 传输层抽象：CAN 总线与串口字节流两种能力接口，以及对应的适配器。
//!
//! - [`CanAdapter`]：按帧收发（`receive` 超时返回 [`TransportError::Timeout`]，表示"暂无数据"）
//! - [`SerialPort`]：按字节流收发
//!
//! 两者都可以分离（split）为 RX/TX 两半，RX 交给读线程，TX 由发送方共享。
//!
//! ## 适配器
//!
//! | 适配器 | 平台 | 说明 |
//! |---|---|---|
//! | `SocketCanAdapter` | Linux | 基于 `socketcan` crate |
//! | `TtySerialPort` | Unix | 基于 `nix` termios |
//! | [`MockCanAdapter`] / [`MockSerialPort`] | 全平台 | 内存实现，用于测试与 `--mock` 模式 |

use std::time::Duration;
use thiserror::Error;

pub use teleop_protocol::BusFrame;

pub mod mock;

#[cfg(target_os = "linux")]
pub mod socketcan;

#[cfg(unix)]
pub mod serial;

pub use mock::{MockCanAdapter, MockCanHandle, MockSerialHandle, MockSerialPort};

#[cfg(target_os = "linux")]
pub use socketcan::{SocketCanAdapter, SocketCanRxAdapter, SocketCanTxAdapter};

#[cfg(unix)]
pub use serial::{TtySerialPort, TtySerialRx, TtySerialTx};

/// 传输层统一错误类型
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Device Error: {0}")]
    Device(#[from] TransportDeviceError),
    /// 读取超时（暂无数据，可重试）
    #[error("Read timeout")]
    Timeout,
    #[error("Transport closed")]
    Closed,
    #[error("Device not started")]
    NotStarted,
}

impl TransportError {
    /// 是否为致命错误（读线程应停止，会话转为 Disconnected）
    pub fn is_fatal(&self) -> bool {
        match self {
            TransportError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::NotFound
                    | std::io::ErrorKind::PermissionDenied
                    | std::io::ErrorKind::UnexpectedEof
            ),
            TransportError::Device(e) => e.is_fatal(),
            TransportError::Closed | TransportError::NotStarted => true,
            TransportError::Timeout => false,
        }
    }
}

/// 设备/后端错误的结构化分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportDeviceErrorKind {
    Unknown,
    NotFound,
    NoDevice,
    AccessDenied,
    Busy,
    UnsupportedConfig,
    InvalidFrame,
    Backend,
}

/// 结构化设备错误
#[derive(Error, Debug, Clone)]
#[error("{kind:?}: {message}")]
pub struct TransportDeviceError {
    pub kind: TransportDeviceErrorKind,
    pub message: String,
}

impl TransportDeviceError {
    pub fn new(kind: TransportDeviceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind,
            TransportDeviceErrorKind::NoDevice
                | TransportDeviceErrorKind::AccessDenied
                | TransportDeviceErrorKind::NotFound
        )
    }
}

impl From<String> for TransportDeviceError {
    fn from(message: String) -> Self {
        Self::new(TransportDeviceErrorKind::Unknown, message)
    }
}

impl From<&str> for TransportDeviceError {
    fn from(message: &str) -> Self {
        Self::new(TransportDeviceErrorKind::Unknown, message)
    }
}

// ============================================================================
// CAN
// ============================================================================

/// CAN 适配器
pub trait CanAdapter {
    fn send(&mut self, frame: BusFrame) -> Result<(), TransportError>;

    /// 接收一帧，超时返回 `TransportError::Timeout`
    fn receive(&mut self) -> Result<BusFrame, TransportError>;

    fn set_receive_timeout(&mut self, _timeout: Duration) {}

    fn receive_timeout(&mut self, timeout: Duration) -> Result<BusFrame, TransportError> {
        self.set_receive_timeout(timeout);
        self.receive()
    }

    fn try_receive(&mut self) -> Result<Option<BusFrame>, TransportError> {
        match self.receive_timeout(Duration::ZERO) {
            Ok(frame) => Ok(Some(frame)),
            Err(TransportError::Timeout) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// CAN 只读半（读线程独占）
pub trait CanRxAdapter {
    fn receive(&mut self) -> Result<BusFrame, TransportError>;
}

/// CAN 只写半（发送方共享，外部加锁）
pub trait CanTxAdapter {
    fn send(&mut self, frame: BusFrame) -> Result<(), TransportError>;
}

/// 可分离为 RX/TX 的 CAN 适配器
pub trait SplittableAdapter: CanAdapter {
    type RxAdapter: CanRxAdapter;
    type TxAdapter: CanTxAdapter;
    fn split(self) -> Result<(Self::RxAdapter, Self::TxAdapter), TransportError>;
}

// ============================================================================
// 串口
// ============================================================================

/// 串口字节流
pub trait SerialPort {
    /// 读取可用字节，超时返回 `TransportError::Timeout`
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError>;

    fn set_read_timeout(&mut self, _timeout: Duration) {}
}

/// 串口只读半
pub trait SerialRxAdapter {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;
}

/// 串口只写半
pub trait SerialTxAdapter {
    fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError>;
}

/// 可分离为 RX/TX 的串口
pub trait SplittableSerial: SerialPort {
    type RxAdapter: SerialRxAdapter;
    type TxAdapter: SerialTxAdapter;
    fn split(self) -> Result<(Self::RxAdapter, Self::TxAdapter), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_is_not_fatal() {
        assert!(!TransportError::Timeout.is_fatal());
    }

    #[test]
    fn test_device_error_fatality() {
        let err = TransportError::Device(TransportDeviceError::new(
            TransportDeviceErrorKind::NoDevice,
            "unplugged",
        ));
        assert!(err.is_fatal());

        let err = TransportError::Device(TransportDeviceError::new(
            TransportDeviceErrorKind::Busy,
            "tx queue full",
        ));
        assert!(!err.is_fatal());

        let err: TransportDeviceError = "whatever".into();
        assert_eq!(err.kind, TransportDeviceErrorKind::Unknown);
    }

    #[test]
    fn test_io_error_fatality() {
        let broken = TransportError::Io(std::io::Error::from(std::io::ErrorKind::BrokenPipe));
        assert!(broken.is_fatal());
        let interrupted = TransportError::Io(std::io::Error::from(std::io::ErrorKind::Interrupted));
        assert!(!interrupted.is_fatal());
        assert!(TransportError::Closed.is_fatal());
    }

    #[test]
    fn test_error_display() {
        let err = TransportDeviceError::new(TransportDeviceErrorKind::NotFound, "can9 missing");
        assert_eq!(err.to_string(), "NotFound: can9 missing");
        assert_eq!(TransportError::Timeout.to_string(), "Read timeout");
    }
}
