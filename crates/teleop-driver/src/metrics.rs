//! 会话 IO 指标
//!
//! 读线程、调度线程与发送方更新的原子计数器，任何线程都可以无锁读取。

use std::sync::atomic::{AtomicU64, Ordering};

/// IO 链路指标
#[derive(Debug, Default)]
pub struct SessionMetrics {
    /// 串口收到的字节数
    pub rx_bytes: AtomicU64,
    /// 收到的帧数（串口为拆出的帧，CAN 为数据帧）
    pub rx_frames: AtomicU64,
    /// 发送的帧数（含重发）
    pub tx_frames: AtomicU64,
    /// 拆帧器丢弃的噪声字节
    pub discarded_bytes: AtomicU64,
    /// 拆帧器重同步次数
    pub resyncs: AtomicU64,
    /// 校验和错误
    pub checksum_errors: AtomicU64,
    /// 协议错误（未知命令、数据格式错误）
    pub protocol_errors: AtomicU64,
    /// 读超时次数（无数据时的正常现象）
    pub rx_timeouts: AtomicU64,
    /// 设备错误次数
    pub device_errors: AtomicU64,
}

impl SessionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            rx_bytes: self.rx_bytes.load(Ordering::Relaxed),
            rx_frames: self.rx_frames.load(Ordering::Relaxed),
            tx_frames: self.tx_frames.load(Ordering::Relaxed),
            discarded_bytes: self.discarded_bytes.load(Ordering::Relaxed),
            resyncs: self.resyncs.load(Ordering::Relaxed),
            checksum_errors: self.checksum_errors.load(Ordering::Relaxed),
            protocol_errors: self.protocol_errors.load(Ordering::Relaxed),
            rx_timeouts: self.rx_timeouts.load(Ordering::Relaxed),
            device_errors: self.device_errors.load(Ordering::Relaxed),
        }
    }
}

/// 指标快照
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub rx_bytes: u64,
    pub rx_frames: u64,
    pub tx_frames: u64,
    pub discarded_bytes: u64,
    pub resyncs: u64,
    pub checksum_errors: u64,
    pub protocol_errors: u64,
    pub rx_timeouts: u64,
    pub device_errors: u64,
}

impl MetricsSnapshot {
    /// 校验失败帧占收到帧的百分比
    pub fn checksum_error_rate(&self) -> f64 {
        if self.rx_frames == 0 {
            return 0.0;
        }
        (self.checksum_errors as f64 / self.rx_frames as f64) * 100.0
    }
}
