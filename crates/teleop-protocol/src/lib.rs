//! # Teleop Protocol
//!
//! 遥操臂控制器通信协议定义（无硬件依赖）
//!
//! ## 模块
//!
//! - `ids`: 串口命令字、结果码、CAN ID 常量
//! - `frame`: 串口帧编码与校验和
//! - `deframer`: 串口字节流拆帧（粘包/拆包/错位重同步）
//! - `feedback`: 反馈数据解析（臂数据推送、CAN 分片、版本号、标定结果）
//! - `control`: 请求帧构建（串口命令帧、CAN 请求帧）
//!
//! ## 字节序
//!
//! - 串口：多字节数值为小端（Little-Endian），臂数据为 IEEE-754 float
//! - CAN：关节数据为大端（Motorola）i16，单位 0.1°

pub mod control;
pub mod deframer;
pub mod feedback;
pub mod frame;
pub mod ids;

// 重新导出常用类型
pub use control::*;
pub use deframer::{Deframer, Poll};
pub use feedback::*;
pub use frame::{Frame, checksum, decode_and_validate, encode};
pub use ids::*;

use thiserror::Error;

/// CAN 2.0 标准帧的统一抽象
///
/// 协议层与传输层之间的中间类型：
///
/// ```text
/// Protocol Layer (teleop-protocol)
///     ↓ BusFrame::new() 构建 / data_slice() 解析
/// BusFrame (此类型)
///     ↓ 转换逻辑在传输层实现
/// Transport Layer (teleop-transport)
///     ↓ SocketCAN / Mock
/// Hardware
/// ```
///
/// - **Copy**：固定 8 字节，无堆分配
/// - **仅标准帧**：控制器只使用 11-bit ID
///
/// ```rust
/// use teleop_protocol::BusFrame;
///
/// let frame = BusFrame::new(0x65, &[1, 2, 3, 4]);
/// assert_eq!(frame.id(), 0x65);
/// assert_eq!(frame.data_slice(), &[1, 2, 3, 4]);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BusFrame {
    /// CAN ID（11-bit 标准帧）
    pub id: u16,

    /// 帧数据（固定 8 字节，未使用部分为 0）
    pub data: [u8; 8],

    /// 有效数据长度 (0-8)
    pub len: u8,

    /// 接收时间戳（微秒），0 表示不可用
    pub timestamp_us: u64,
}

impl BusFrame {
    /// 创建标准帧，超过 8 字节的部分被截断
    pub fn new(id: u16, data: &[u8]) -> Self {
        let mut fixed_data = [0u8; 8];
        let len = data.len().min(8);
        fixed_data[..len].copy_from_slice(&data[..len]);

        Self {
            id,
            data: fixed_data,
            len: len as u8,
            timestamp_us: 0,
        }
    }

    /// 设置时间戳（传输层接收时调用）
    pub fn with_timestamp(mut self, timestamp_us: u64) -> Self {
        self.timestamp_us = timestamp_us;
        self
    }

    /// 获取数据切片（只包含有效数据）
    pub fn data_slice(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }

    /// 获取 CAN ID
    pub fn id(&self) -> u16 {
        self.id
    }
}

/// 协议解析错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Invalid frame length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("Payload too large: {len} bytes (max {max})")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("Checksum mismatch: frame carries 0x{expected:02X}, computed 0x{computed:02X}")]
    ChecksumMismatch { expected: u8, computed: u8 },

    #[error("Invalid CAN ID: 0x{id:X}")]
    InvalidCanId { id: u16 },

    #[error("Unknown command type: 0x{code:02X}")]
    UnknownCommand { code: u8 },

    #[error("Response for command 0x{command:02X} carries no result code")]
    EmptyResponse { command: u8 },

    #[error("Parse error: {0}")]
    ParseError(String),
}

/// 字节序转换工具函数
///
/// CAN 关节数据为大端 i16，串口数值为小端。
/// 大端字节序转 i16
pub fn bytes_to_i16_be(bytes: [u8; 2]) -> i16 {
    i16::from_be_bytes(bytes)
}

/// i16 转大端字节序
pub fn i16_to_bytes_be(value: i16) -> [u8; 2] {
    value.to_be_bytes()
}

/// i16 转小端字节序
pub fn i16_to_bytes_le(value: i16) -> [u8; 2] {
    value.to_le_bytes()
}

/// 小端字节序转 f32
pub fn bytes_to_f32_le(bytes: [u8; 4]) -> f32 {
    f32::from_le_bytes(bytes)
}

/// f32 转小端字节序
pub fn f32_to_bytes_le(value: f32) -> [u8; 4] {
    value.to_le_bytes()
}
