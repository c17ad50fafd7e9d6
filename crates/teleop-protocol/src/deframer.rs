//! 串口字节流拆帧
//!
//! 串口读取的数据块与帧边界无关：一次读取可能只含半帧（拆包），
//! 也可能含多帧（粘包），还可能以噪声或被截断的帧开头。
//! [`Deframer`] 持有一个只增不减（除消费外）的接收缓冲，每次 [`Deframer::poll`]
//! 最多取出一帧：
//!
//! 1. 缓冲不足 5 字节：等待
//! 2. 找不到帧头 0xAA：清空缓冲（全部是噪声）
//! 3. 丢弃帧头之前的字节
//! 4. 帧头之后不足 5 字节：等待
//! 5. 总长 = 5 + len，不足则等待
//! 6. 帧尾不是 0x55：帧头是误匹配，丢弃 1 字节后重新查找
//! 7. 否则取出 `5 + len` 字节作为一帧
//!
//! 校验和不在这一层检查，见 [`crate::frame::decode_and_validate`]。

use crate::frame::Frame;
use crate::ids::{FRAME_HEADER, FRAME_OVERHEAD, FRAME_TAIL};
use bytes::{Buf, BytesMut};
use tracing::{debug, trace};

/// 单次 poll 的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Poll {
    /// 取出一个结构完整的帧（未校验）
    Frame(Frame),
    /// 需要更多数据
    Incomplete,
}

/// 可重入的串口拆帧器
///
/// 由读线程独占，不跨线程共享。
#[derive(Debug, Default)]
pub struct Deframer {
    buffer: BytesMut,
    discarded_bytes: u64,
    resyncs: u64,
}

impl Deframer {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(1024),
            discarded_bytes: 0,
            resyncs: 0,
        }
    }

    /// 追加读取到的数据
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// 尝试取出一帧
    pub fn poll(&mut self) -> Poll {
        loop {
            if self.buffer.len() < FRAME_OVERHEAD {
                return Poll::Incomplete;
            }

            match self.buffer.iter().position(|&b| b == FRAME_HEADER) {
                None => {
                    let dropped = self.buffer.len();
                    self.discarded_bytes += dropped as u64;
                    trace!("No frame header in {} buffered bytes, discarding", dropped);
                    self.buffer.clear();
                    return Poll::Incomplete;
                },
                Some(0) => {},
                Some(idx) => {
                    self.discarded_bytes += idx as u64;
                    trace!("Discarding {} bytes before frame header", idx);
                    self.buffer.advance(idx);
                },
            }

            if self.buffer.len() < FRAME_OVERHEAD {
                return Poll::Incomplete;
            }

            let command_type = self.buffer[1];
            let data_length = self.buffer[2];
            let total = FRAME_OVERHEAD + data_length as usize;

            if self.buffer.len() < total {
                return Poll::Incomplete;
            }

            if self.buffer[total - 1] != FRAME_TAIL {
                // 误匹配的帧头（例如数据区中的 0xAA），丢弃 1 字节重新同步
                self.resyncs += 1;
                self.discarded_bytes += 1;
                debug!(
                    "False frame header (cmd=0x{:02X}, len={}), resyncing",
                    command_type, data_length
                );
                self.buffer.advance(1);
                continue;
            }

            let mut raw = self.buffer.split_to(total);
            raw.advance(3);
            let payload = raw.split_to(data_length as usize).freeze();
            let checksum = raw[0];

            return Poll::Frame(Frame {
                command_type,
                data_length,
                payload,
                checksum,
            });
        }
    }

    /// 依次取出所有可用帧，直到 `Incomplete`
    pub fn drain(&mut self) -> Drain<'_> {
        Drain { deframer: self }
    }

    /// 累计丢弃的噪声字节数
    pub fn discarded_bytes(&self) -> u64 {
        self.discarded_bytes
    }

    /// 累计误匹配帧头次数
    pub fn resyncs(&self) -> u64 {
        self.resyncs
    }

    /// 当前缓冲字节数
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// 清空缓冲（连接重置时使用）
    pub fn reset(&mut self) {
        self.buffer.clear();
    }
}

/// [`Deframer::drain`] 返回的迭代器
pub struct Drain<'a> {
    deframer: &'a mut Deframer,
}

impl Iterator for Drain<'_> {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        match self.deframer.poll() {
            Poll::Frame(frame) => Some(frame),
            Poll::Incomplete => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::encode;

    fn expect_frame(poll: Poll) -> Frame {
        match poll {
            Poll::Frame(f) => f,
            Poll::Incomplete => panic!("expected a frame"),
        }
    }

    #[test]
    fn test_minimal_frame() {
        let mut d = Deframer::new();
        d.feed(&[0xAA, 0x01, 0x00, 0xFF, 0x55]);
        let frame = expect_frame(d.poll());
        assert_eq!(frame.command_type, 0x01);
        assert_eq!(frame.data_length, 0);
        assert!(frame.payload.is_empty());
        assert_eq!(frame.checksum, 0xFF);
        assert!(frame.validate().is_ok());
        assert_eq!(d.buffered(), 0);
        assert_eq!(d.poll(), Poll::Incomplete);
    }

    #[test]
    fn test_fewer_than_five_bytes_waits() {
        let mut d = Deframer::new();
        d.feed(&[0xAA, 0x01, 0x00, 0xFF]);
        assert_eq!(d.poll(), Poll::Incomplete);
        assert_eq!(d.buffered(), 4);
    }

    #[test]
    fn test_noise_without_header_is_cleared() {
        let mut d = Deframer::new();
        d.feed(&[0x01, 0x02, 0x03, 0x04, 0x05, 0x06]);
        assert_eq!(d.poll(), Poll::Incomplete);
        assert_eq!(d.buffered(), 0);
        assert_eq!(d.discarded_bytes(), 6);
    }

    #[test]
    fn test_prefix_before_header_dropped() {
        let mut d = Deframer::new();
        d.feed(&[0x10, 0x20]);
        d.feed(&encode(0x14, &[]).unwrap());
        let frame = expect_frame(d.poll());
        assert_eq!(frame.command_type, 0x14);
        assert_eq!(d.discarded_bytes(), 2);
    }

    #[test]
    fn test_split_frame_waits_then_completes() {
        let bytes = encode(0x15, &[0x00, 0x11, 0x22]).unwrap();
        let mut d = Deframer::new();
        d.feed(&bytes[..4]);
        assert_eq!(d.poll(), Poll::Incomplete);
        d.feed(&bytes[4..6]);
        assert_eq!(d.poll(), Poll::Incomplete);
        d.feed(&bytes[6..]);
        let frame = expect_frame(d.poll());
        assert_eq!(frame.payload.as_ref(), &[0x00, 0x11, 0x22]);
    }

    #[test]
    fn test_two_frames_in_order() {
        let mut d = Deframer::new();
        let mut bytes = encode(0x14, &[0x00, 0x72, 0x64]).unwrap();
        bytes.extend(encode(0x17, &[0x00]).unwrap());
        d.feed(&bytes);
        let frames: Vec<_> = d.drain().collect();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].command_type, 0x14);
        assert_eq!(frames[1].command_type, 0x17);
        assert_eq!(d.buffered(), 0);
    }

    #[test]
    fn test_false_header_resync() {
        // 0xAA 0x05 0x09 开头，声明长度 9，其帧尾位置不是 0x55
        let mut d = Deframer::new();
        let mut bytes = vec![0xAA, 0x05, 0x09];
        bytes.extend(encode(0x01, &[0x00]).unwrap());
        bytes.extend([0u8; 8]);
        d.feed(&bytes);
        let frame = expect_frame(d.poll());
        assert_eq!(frame.command_type, 0x01);
        assert!(frame.validate().is_ok());
        assert!(d.resyncs() >= 1);
    }

    #[test]
    fn test_header_byte_inside_payload() {
        let mut d = Deframer::new();
        let first = encode(0x20, &[0xAA, 0x01, 0xAA]).unwrap();
        let second = encode(0x21, &[0x00]).unwrap();
        d.feed(&first);
        d.feed(&second);
        let a = expect_frame(d.poll());
        let b = expect_frame(d.poll());
        assert_eq!(a.payload.as_ref(), &[0xAA, 0x01, 0xAA]);
        assert_eq!(b.command_type, 0x21);
    }

    #[test]
    fn test_corrupted_checksum_is_still_extracted() {
        let mut bytes = encode(0x17, &[0x00]).unwrap();
        bytes[4] ^= 0x01;
        let mut d = Deframer::new();
        d.feed(&bytes);
        let frame = expect_frame(d.poll());
        assert!(frame.validate().is_err());
    }

    #[test]
    fn test_oversized_declared_length_extracted_structurally() {
        let mut bytes = vec![0xAA, 0x01, 0x81];
        bytes.extend(vec![0u8; 0x81]);
        bytes.push(0x00);
        bytes.push(0x55);
        let mut d = Deframer::new();
        d.feed(&bytes);
        let frame = expect_frame(d.poll());
        assert_eq!(frame.data_length, 0x81);
        assert!(frame.validate().is_err());
    }

    #[test]
    fn test_reset_clears_buffer() {
        let mut d = Deframer::new();
        d.feed(&[0xAA, 0x01]);
        d.reset();
        assert_eq!(d.buffered(), 0);
    }
}
