//! 会话事件
//!
//! 读线程与调度线程解码后的结果通过同一个有序通道送给使用方。

use teleop_protocol::{Arm, JOINTS_PER_ARM, ResultCode, VersionInfo};

use crate::CommandKind;

/// 连接状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

/// 遥测数据来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TelemetrySource {
    /// 串口数据推送（56 字节帧）
    SerialPush,
    /// 串口 GET_ARM_DATA 应答
    SerialResponse,
    /// CAN 分片重组
    Bus,
}

/// 错误分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ErrorKind {
    /// 帧结构错误（已由重同步处理）
    Structural,
    /// 校验和错误，帧已丢弃
    Checksum,
    /// 意外命令字、结果码或数据格式错误
    Protocol,
    /// 重试耗尽仍无应答
    Timeout,
    /// 底层 I/O 错误
    Transport,
}

/// 使用方收到的事件
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    ConnectionChanged(ConnectionState),
    /// 单臂完整记录（度）
    Telemetry {
        arm: Arm,
        values: [f32; JOINTS_PER_ARM],
        source: TelemetrySource,
    },
    Version {
        hardware: u8,
        software: u8,
    },
    /// 命令执行结果；`result` 仅串口应答携带
    CommandResult {
        command: CommandKind,
        ok: bool,
        result: Option<ResultCode>,
        detail: Option<String>,
    },
    Error {
        kind: ErrorKind,
        message: String,
    },
}

impl Event {
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Event::Error {
            kind,
            message: message.into(),
        }
    }

    /// 版本号事件转为可格式化的 [`VersionInfo`]
    pub fn version_info(&self) -> Option<VersionInfo> {
        match self {
            Event::Version { hardware, software } => Some(VersionInfo {
                hardware: *hardware,
                software: *software,
            }),
            _ => None,
        }
    }
}
