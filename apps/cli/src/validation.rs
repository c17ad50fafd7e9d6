//! 输入验证模块
//!
//! 命令行中 CAN ID、十六进制数据与关节设定值的解析和检查。

use anyhow::Result;
use teleop_protocol::{CAN_MAX_DATA_LENGTH, JointSetpoint, MAX_STANDARD_ID};

/// 解析 CAN 标准帧 ID（`0x1A3` 或十进制 `419`）
///
/// 供 clap `value_parser` 使用。
pub fn parse_can_id(s: &str) -> Result<u16, String> {
    let s = s.trim();
    let id = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => s.parse::<u16>(),
    }
    .map_err(|e| format!("无效的 CAN ID '{}': {}", s, e))?;

    if id > MAX_STANDARD_ID {
        return Err(format!(
            "CAN ID 0x{:X} 超出标准帧范围 (最大 0x{:03X})",
            id, MAX_STANDARD_ID
        ));
    }
    Ok(id)
}

/// 解析十六进制字节串
///
/// 以空白或逗号分隔（`"01 02 ff"`、`"0x01,0x02"`）；空串表示无数据。
pub fn parse_hex_bytes(s: &str) -> Result<Vec<u8>> {
    let bytes = s
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|token| !token.is_empty())
        .map(|token| {
            let digits = token
                .strip_prefix("0x")
                .or_else(|| token.strip_prefix("0X"))
                .unwrap_or(token);
            u8::from_str_radix(digits, 16)
                .map_err(|_| anyhow::anyhow!("无效的十六进制字节: '{}'", token))
        })
        .collect::<Result<Vec<u8>>>()?;

    if bytes.len() > CAN_MAX_DATA_LENGTH {
        anyhow::bail!(
            "数据长度 {} 超出 CAN 帧上限 {} 字节",
            bytes.len(),
            CAN_MAX_DATA_LENGTH
        );
    }
    Ok(bytes)
}

/// 检查关节设定值
///
/// # 错误
/// 如果：
/// - 任何数值为 NaN 或无穷大
/// - 加速度为负
pub fn validate_setpoint(setpoint: &JointSetpoint) -> Result<()> {
    let fields = [
        ("position", setpoint.position),
        ("speed", setpoint.speed),
        ("accel", setpoint.acceleration),
        ("torque", setpoint.torque),
    ];
    for (name, value) in fields {
        if !value.is_finite() {
            anyhow::bail!("{} 数值无效: {}", name, value);
        }
    }
    if setpoint.acceleration < 0.0 {
        anyhow::bail!("accel 不能为负: {}", setpoint.acceleration);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_can_id() {
        assert_eq!(parse_can_id("0x123"), Ok(0x123));
        assert_eq!(parse_can_id("0X7ff"), Ok(0x7FF));
        assert_eq!(parse_can_id("100"), Ok(100));
        assert!(parse_can_id("0x800").is_err());
        assert!(parse_can_id("abc").is_err());
        assert!(parse_can_id("").is_err());
    }

    #[test]
    fn test_parse_hex_bytes() {
        assert_eq!(parse_hex_bytes("01 02 ff").unwrap(), vec![0x01, 0x02, 0xFF]);
        assert_eq!(parse_hex_bytes("0x0A,0x0b").unwrap(), vec![0x0A, 0x0B]);
        assert_eq!(parse_hex_bytes("  ").unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_parse_hex_bytes_rejects_invalid() {
        assert!(parse_hex_bytes("01 zz").is_err());
        assert!(parse_hex_bytes("100").is_err());
        assert!(parse_hex_bytes("00 01 02 03 04 05 06 07 08").is_err());
    }

    #[test]
    fn test_validate_setpoint() {
        let mut setpoint = JointSetpoint {
            id: 1,
            position: 90.0,
            speed: 10.0,
            acceleration: 5.0,
            torque: 2.0,
        };
        assert!(validate_setpoint(&setpoint).is_ok());

        setpoint.speed = f32::NAN;
        assert!(validate_setpoint(&setpoint).is_err());

        setpoint.speed = 10.0;
        setpoint.acceleration = -1.0;
        assert!(validate_setpoint(&setpoint).is_err());
    }
}
