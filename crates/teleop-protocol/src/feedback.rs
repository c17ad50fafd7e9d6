//! 反馈数据解析
//!
//! - 串口：臂数据推送（56 字节，14 个小端 f32）与命令应答（结果码 + 数据）
//! - CAN：关节分片（大端 i16，单位 0.1°）、版本应答、标定应答

use crate::frame::Frame;
use crate::ids::{ARM_DATA_LEN, CommandType, FragmentPart, JOINTS_PER_ARM, ResultCode};
use crate::{ProtocolError, bytes_to_f32_le, bytes_to_i16_be};
use bytes::Bytes;

// ============================================================================
// 臂数据
// ============================================================================

/// 双臂关节角度（度）
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ArmTelemetry {
    pub left: [f32; JOINTS_PER_ARM],
    pub right: [f32; JOINTS_PER_ARM],
}

/// 解析 56 字节臂数据：前 7 个 float 为左臂，后 7 个为右臂
///
/// 多余字节被忽略；不足 56 字节返回 `InvalidLength`。
pub fn parse_arm_data(data: &[u8]) -> Result<ArmTelemetry, ProtocolError> {
    if data.len() < ARM_DATA_LEN {
        return Err(ProtocolError::InvalidLength {
            expected: ARM_DATA_LEN,
            actual: data.len(),
        });
    }

    let mut values = [0f32; 2 * JOINTS_PER_ARM];
    for (value, chunk) in values.iter_mut().zip(data[..ARM_DATA_LEN].chunks_exact(4)) {
        *value = bytes_to_f32_le([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }

    let mut telemetry = ArmTelemetry::default();
    telemetry.left.copy_from_slice(&values[..JOINTS_PER_ARM]);
    telemetry.right.copy_from_slice(&values[JOINTS_PER_ARM..]);
    Ok(telemetry)
}

// ============================================================================
// CAN 分片
// ============================================================================

/// 解析关节分片：每 2 字节一个大端 i16
///
/// 第一分片需要 8 字节（4 个值），第二分片需要 6 字节（3 个值），多余字节忽略。
pub fn parse_fragment(part: FragmentPart, data: &[u8]) -> Result<Vec<i16>, ProtocolError> {
    let count = part.value_count();
    let needed = count * 2;
    if data.len() < needed {
        return Err(ProtocolError::InvalidLength {
            expected: needed,
            actual: data.len(),
        });
    }

    Ok(data[..needed]
        .chunks_exact(2)
        .map(|pair| bytes_to_i16_be([pair[0], pair[1]]))
        .collect())
}

/// 原始值（0.1°）转换为角度
pub fn raw_to_degrees(raw: i16) -> f32 {
    raw as f32 / 10.0
}

// ============================================================================
// 版本号
// ============================================================================

/// 固件版本
///
/// 版本号字节格式：`[硬件版本] [软件版本] [保留] [保留]`，
/// 例如 `72 64 01 00` 表示硬件 V1.1.4、软件 V1.0.0。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VersionInfo {
    pub hardware: u8,
    pub software: u8,
}

impl VersionInfo {
    /// 从至少 2 字节的数据中解析
    pub fn parse(data: &[u8]) -> Result<Self, ProtocolError> {
        match data {
            [hardware, software, ..] => Ok(Self {
                hardware: *hardware,
                software: *software,
            }),
            _ => Err(ProtocolError::InvalidLength {
                expected: 2,
                actual: data.len(),
            }),
        }
    }

    pub fn hardware_string(&self) -> String {
        format_version(self.hardware)
    }

    pub fn software_string(&self) -> String {
        format_version(self.software)
    }
}

impl std::fmt::Display for VersionInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "hardware {}, software {}",
            self.hardware_string(),
            self.software_string()
        )
    }
}

/// 版本码转 `V<maj>.<min>.<patch>`，例如 114 -> `V1.1.4`
pub fn format_version(code: u8) -> String {
    format!("V{}.{}.{}", code / 100, (code % 100) / 10, code % 10)
}

// ============================================================================
// CAN 标定应答
// ============================================================================

/// 标定应答：byte0 == 1 表示成功
pub fn parse_calibrate_result(data: &[u8]) -> Result<bool, ProtocolError> {
    match data.first() {
        Some(&result) => Ok(result == 1),
        None => Err(ProtocolError::InvalidLength {
            expected: 1,
            actual: 0,
        }),
    }
}

// ============================================================================
// 串口帧分类
// ============================================================================

/// 已校验串口帧的语义分类
#[derive(Debug, Clone, PartialEq)]
pub enum SerialMessage {
    /// 臂数据推送（数据区恰好 56 字节，无应答语义）
    ArmPush(ArmTelemetry),
    /// 命令应答：数据区第 1 字节为结果码，其余为应答数据
    Response {
        command: CommandType,
        result: ResultCode,
        body: Bytes,
    },
}

impl SerialMessage {
    /// 对已校验的帧进行分类
    ///
    /// - 空数据区：`EmptyResponse`
    /// - 未知命令字：`UnknownCommand`
    pub fn classify(frame: &Frame) -> Result<Self, ProtocolError> {
        if frame.data_length as usize == ARM_DATA_LEN {
            return parse_arm_data(&frame.payload).map(SerialMessage::ArmPush);
        }

        if frame.payload.is_empty() {
            return Err(ProtocolError::EmptyResponse {
                command: frame.command_type,
            });
        }

        let command = CommandType::try_from(frame.command_type).map_err(|_| {
            ProtocolError::UnknownCommand {
                code: frame.command_type,
            }
        })?;
        let result = ResultCode::from(frame.payload[0]);
        let body = frame.payload.slice(1..);

        Ok(SerialMessage::Response {
            command,
            result,
            body,
        })
    }
}
