//! 驱动层错误类型定义

use teleop_protocol::{FragmentPart, ProtocolError};
use teleop_transport::TransportError;
use thiserror::Error;

use crate::TransportKind;

/// 驱动层错误类型
#[derive(Error, Debug)]
pub enum DriverError {
    /// 传输层错误
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// 协议编码/解析错误
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// 分片缓存错误
    #[error("Fragment cache error: {0}")]
    Cache(#[from] CacheError),

    /// 会话已关闭或连接已断开
    #[error("Session is not connected")]
    NotConnected,

    /// 当前传输不支持该操作（例如 CAN 上的数据推送开关）
    #[error("'{operation}' is not supported on the {transport} transport")]
    Unsupported {
        operation: &'static str,
        transport: TransportKind,
    },

    /// 读线程或调度线程启动失败
    #[error("IO thread error: {0}")]
    IoThread(String),

    /// 无效配置
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// 分片缓存错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// 分片携带的关节数与序号不符
    #[error("{part:?} fragment must carry {expected} values, got {actual}")]
    WrongCount {
        part: FragmentPart,
        expected: usize,
        actual: usize,
    },

    /// 遥测记录只属于单臂
    #[error("fragments belong to a single arm, not 'both'")]
    NotSingleArm,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_error_display() {
        let driver_error = DriverError::Transport(TransportError::Timeout);
        assert_eq!(driver_error.to_string(), "Transport error: Read timeout");

        let driver_error = DriverError::Protocol(ProtocolError::InvalidLength {
            expected: 8,
            actual: 4,
        });
        let msg = driver_error.to_string();
        assert!(msg.starts_with("Protocol error:"), "{}", msg);

        assert_eq!(
            DriverError::NotConnected.to_string(),
            "Session is not connected"
        );

        let driver_error = DriverError::Unsupported {
            operation: "enable-stream",
            transport: TransportKind::Can,
        };
        assert_eq!(
            driver_error.to_string(),
            "'enable-stream' is not supported on the can transport"
        );
    }

    #[test]
    fn test_from_transport_error() {
        let driver_error: DriverError = TransportError::Closed.into();
        match driver_error {
            DriverError::Transport(e) => assert!(matches!(e, TransportError::Closed)),
            _ => panic!("Expected Transport variant"),
        }
    }

    #[test]
    fn test_from_protocol_error() {
        let driver_error: DriverError = ProtocolError::InvalidCanId { id: 0x923 }.into();
        match driver_error {
            DriverError::Protocol(ProtocolError::InvalidCanId { id }) => assert_eq!(id, 0x923),
            _ => panic!("Expected Protocol variant"),
        }
    }

    #[test]
    fn test_cache_error_display() {
        let err = CacheError::WrongCount {
            part: FragmentPart::Second,
            expected: 3,
            actual: 4,
        };
        assert_eq!(err.to_string(), "Second fragment must carry 3 values, got 4");

        let driver_error: DriverError = err.into();
        assert!(driver_error.to_string().starts_with("Fragment cache error:"));
    }
}
