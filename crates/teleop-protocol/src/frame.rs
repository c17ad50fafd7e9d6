//! 串口帧编码与校验
//!
//! 帧格式：
//!
//! ```text
//! [0xAA][cmd][len 0x00-0x80][payload ...][checksum][0x55]
//! ```
//!
//! 校验和 = (cmd + len + Σpayload) mod 256 的补码。

use crate::ProtocolError;
use crate::ids::{FRAME_HEADER, FRAME_OVERHEAD, FRAME_TAIL, MAX_PAYLOAD_LEN};
use bytes::Bytes;

/// 一个结构完整的串口帧（帧头/帧尾已剥离）
///
/// 由拆帧器产生，尚未校验；调用 [`Frame::validate`] 后才可信。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command_type: u8,
    pub data_length: u8,
    pub payload: Bytes,
    /// 帧中携带的原始校验字节
    pub checksum: u8,
}

impl Frame {
    /// 构建一个校验和正确的帧
    pub fn new(command_type: u8, payload: impl Into<Bytes>) -> Result<Self, ProtocolError> {
        let payload = payload.into();
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(ProtocolError::PayloadTooLarge {
                len: payload.len(),
                max: MAX_PAYLOAD_LEN,
            });
        }
        let data_length = payload.len() as u8;
        Ok(Self {
            command_type,
            data_length,
            checksum: checksum(command_type, data_length, &payload),
            payload,
        })
    }

    /// 校验长度与校验和
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.data_length as usize > MAX_PAYLOAD_LEN {
            return Err(ProtocolError::PayloadTooLarge {
                len: self.data_length as usize,
                max: MAX_PAYLOAD_LEN,
            });
        }
        if self.payload.len() != self.data_length as usize {
            return Err(ProtocolError::InvalidLength {
                expected: self.data_length as usize,
                actual: self.payload.len(),
            });
        }
        let computed = checksum(self.command_type, self.data_length, &self.payload);
        if computed != self.checksum {
            return Err(ProtocolError::ChecksumMismatch {
                expected: self.checksum,
                computed,
            });
        }
        Ok(())
    }

    /// 重新序列化为线上字节（含帧头帧尾）
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(FRAME_OVERHEAD + self.payload.len());
        out.push(FRAME_HEADER);
        out.push(self.command_type);
        out.push(self.data_length);
        out.extend_from_slice(&self.payload);
        out.push(self.checksum);
        out.push(FRAME_TAIL);
        out
    }

    /// 线上总长度
    pub fn wire_len(&self) -> usize {
        FRAME_OVERHEAD + self.payload.len()
    }
}

/// 计算校验和：8 位累加后取补码
pub fn checksum(command_type: u8, length: u8, payload: &[u8]) -> u8 {
    payload
        .iter()
        .fold(command_type.wrapping_add(length), |acc, b| acc.wrapping_add(*b))
        .wrapping_neg()
}

/// 编码一条命令帧
///
/// 数据区超过 0x80 字节返回 [`ProtocolError::PayloadTooLarge`]。
pub fn encode(command_type: u8, payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(ProtocolError::PayloadTooLarge {
            len: payload.len(),
            max: MAX_PAYLOAD_LEN,
        });
    }
    let len = payload.len() as u8;
    let mut out = Vec::with_capacity(FRAME_OVERHEAD + payload.len());
    out.push(FRAME_HEADER);
    out.push(command_type);
    out.push(len);
    out.extend_from_slice(payload);
    out.push(checksum(command_type, len, payload));
    out.push(FRAME_TAIL);
    Ok(out)
}

/// 校验帧，成功时返回原帧引用
///
/// 校验失败的帧不做任何修正。
pub fn decode_and_validate(frame: &Frame) -> Result<&Frame, ProtocolError> {
    frame.validate()?;
    Ok(frame)
}
