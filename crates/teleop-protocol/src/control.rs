//! 请求帧构建
//!
//! 串口命令帧由 [`crate::frame::encode`] 编码；CAN 请求帧固定 8 字节全 0。

use crate::frame::{checksum, encode};
use crate::ids::{
    Arm, CAN_MAX_DATA_LENGTH, CommandType, FRAME_HEADER, FRAME_TAIL, ID_CALIBRATE,
    ID_GET_VERSION, MAX_STANDARD_ID,
};
use crate::{BusFrame, ProtocolError, i16_to_bytes_le};

// ============================================================================
// 串口命令
// ============================================================================

/// 无数据区的命令帧
pub fn empty_command(command: CommandType) -> [u8; 5] {
    let cmd = u8::from(command);
    [FRAME_HEADER, cmd, 0x00, checksum(cmd, 0x00, &[]), FRAME_TAIL]
}

/// 带数据区的命令帧
pub fn build_command(command: CommandType, payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    encode(command.into(), payload)
}

pub fn get_version_command() -> [u8; 5] {
    empty_command(CommandType::GetVersion)
}

pub fn calibrate_command() -> [u8; 5] {
    empty_command(CommandType::Calibrate)
}

pub fn enable_stream_command() -> [u8; 5] {
    empty_command(CommandType::EnableStream)
}

pub fn disable_stream_command() -> [u8; 5] {
    empty_command(CommandType::DisableStream)
}

pub fn get_arm_data_command() -> [u8; 5] {
    empty_command(CommandType::GetArmData)
}

/// 单关节设定值（扭矩控制 / 参数设置）
///
/// 协议文档尚未给出缩放系数，数值按原值截断为整数。
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct JointSetpoint {
    /// 关节 ID
    pub id: u8,
    pub position: f32,
    pub speed: f32,
    pub acceleration: f32,
    pub torque: f32,
}

impl JointSetpoint {
    /// 数据区布局（8 字节）：
    ///
    /// | 字节 | 字段 |
    /// |---|---|
    /// | 0 | id |
    /// | 1-2 | position (i16 LE) |
    /// | 3-4 | speed (i16 LE) |
    /// | 5 | acceleration (u8) |
    /// | 6-7 | torque (i16 LE) |
    ///
    /// 浮点到整数的转换向零截断并饱和到字段范围（NaN 为 0）。
    pub fn to_payload(&self) -> [u8; 8] {
        let position = i16_to_bytes_le(self.position as i16);
        let speed = i16_to_bytes_le(self.speed as i16);
        let torque = i16_to_bytes_le(self.torque as i16);
        [
            self.id,
            position[0],
            position[1],
            speed[0],
            speed[1],
            self.acceleration as u8,
            torque[0],
            torque[1],
        ]
    }
}

/// 扭矩控制命令
pub fn torque_control_command(setpoint: &JointSetpoint) -> Vec<u8> {
    encode_fixed(CommandType::TorqueControl, &setpoint.to_payload())
}

/// 参数设置命令（数据区布局同扭矩控制）
pub fn set_params_command(setpoint: &JointSetpoint) -> Vec<u8> {
    encode_fixed(CommandType::SetParams, &setpoint.to_payload())
}

fn encode_fixed(command: CommandType, payload: &[u8; 8]) -> Vec<u8> {
    let cmd = u8::from(command);
    let mut out = Vec::with_capacity(payload.len() + 5);
    out.push(FRAME_HEADER);
    out.push(cmd);
    out.push(payload.len() as u8);
    out.extend_from_slice(payload);
    out.push(checksum(cmd, payload.len() as u8, payload));
    out.push(FRAME_TAIL);
    out
}

// ============================================================================
// CAN 请求
// ============================================================================

/// 臂数据请求帧（0x02 / 0x03 / 0x04）
pub fn arm_request_frame(arm: Arm) -> BusFrame {
    BusFrame::new(arm.request_id(), &[0u8; CAN_MAX_DATA_LENGTH])
}

/// 标定请求帧（0xC1）
pub fn calibrate_frame() -> BusFrame {
    BusFrame::new(ID_CALIBRATE, &[0u8; CAN_MAX_DATA_LENGTH])
}

/// 获取版本请求帧（0x64）
pub fn get_version_frame() -> BusFrame {
    BusFrame::new(ID_GET_VERSION, &[0u8; CAN_MAX_DATA_LENGTH])
}

/// 自定义帧：任意标准 ID，数据不超过 8 字节
pub fn custom_frame(id: u16, data: &[u8]) -> Result<BusFrame, ProtocolError> {
    if id > MAX_STANDARD_ID {
        return Err(ProtocolError::InvalidCanId { id });
    }
    if data.len() > CAN_MAX_DATA_LENGTH {
        return Err(ProtocolError::PayloadTooLarge {
            len: data.len(),
            max: CAN_MAX_DATA_LENGTH,
        });
    }
    Ok(BusFrame::new(id, data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_commands() {
        assert_eq!(get_version_command(), [0xAA, 0x14, 0x00, 0xEC, 0x55]);
        assert_eq!(calibrate_command(), [0xAA, 0x17, 0x00, 0xE9, 0x55]);
        assert_eq!(enable_stream_command(), [0xAA, 0x15, 0x00, 0xEB, 0x55]);
        assert_eq!(disable_stream_command(), [0xAA, 0x16, 0x00, 0xEA, 0x55]);
        assert_eq!(get_arm_data_command(), [0xAA, 0x01, 0x00, 0xFF, 0x55]);
    }

    #[test]
    fn test_empty_command_matches_encode() {
        let encoded = encode(0x15, &[]).unwrap();
        assert_eq!(enable_stream_command().as_slice(), encoded.as_slice());
    }

    #[test]
    fn test_setpoint_payload_layout() {
        let setpoint = JointSetpoint {
            id: 3,
            position: 1000.0,
            speed: -2.0,
            acceleration: 50.0,
            torque: 300.7,
        };
        assert_eq!(
            setpoint.to_payload(),
            [3, 0xE8, 0x03, 0xFE, 0xFF, 50, 0x2C, 0x01]
        );
    }

    #[test]
    fn test_setpoint_saturates() {
        let setpoint = JointSetpoint {
            id: 1,
            position: 1.0e9,
            speed: -1.0e9,
            acceleration: 999.0,
            torque: f32::NAN,
        };
        let p = setpoint.to_payload();
        assert_eq!(&p[1..3], &i16::MAX.to_le_bytes());
        assert_eq!(&p[3..5], &i16::MIN.to_le_bytes());
        assert_eq!(p[5], 255);
        assert_eq!(&p[6..8], &[0, 0]);
    }

    #[test]
    fn test_torque_control_command() {
        let setpoint = JointSetpoint {
            id: 1,
            ..Default::default()
        };
        let bytes = torque_control_command(&setpoint);
        assert_eq!(bytes.len(), 13);
        assert_eq!(&bytes[..3], &[0xAA, 0x20, 0x08]);
        assert_eq!(bytes, build_command(CommandType::TorqueControl, &setpoint.to_payload()).unwrap());
        assert_eq!(set_params_command(&setpoint)[1], 0x21);
    }

    #[test]
    fn test_can_request_frames() {
        let left = arm_request_frame(Arm::Left);
        assert_eq!(left.id, 0x02);
        assert_eq!(left.len, 8);
        assert_eq!(left.data, [0u8; 8]);
        assert_eq!(arm_request_frame(Arm::Both).id, 0x04);
        assert_eq!(calibrate_frame().id, 0xC1);
        assert_eq!(get_version_frame().id, 0x64);
    }

    #[test]
    fn test_custom_frame() {
        let frame = custom_frame(0x123, &[1, 2, 3]).unwrap();
        assert_eq!(frame.data_slice(), &[1, 2, 3]);
        assert_eq!(
            custom_frame(0x800, &[]),
            Err(ProtocolError::InvalidCanId { id: 0x800 })
        );
        assert!(matches!(
            custom_frame(0x10, &[0u8; 9]),
            Err(ProtocolError::PayloadTooLarge { len: 9, max: 8 })
        ));
    }
}
