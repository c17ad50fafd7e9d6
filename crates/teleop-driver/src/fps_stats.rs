//! 收发频率统计模块
//!
//! 统计各臂请求发送与记录接收的频率，用于监控和调试诊断。

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// 频率统计数据
///
/// 使用原子计数器记录次数，支持无锁读取。
/// 使用固定时间窗口统计，从创建或重置开始计算。
#[derive(Debug)]
pub struct FpsStatistics {
    // 发送的请求
    pub(crate) left_requests: AtomicU64,
    pub(crate) right_requests: AtomicU64,
    pub(crate) both_requests: AtomicU64,

    // 完整的单臂记录
    pub(crate) left_records: AtomicU64,
    pub(crate) right_records: AtomicU64,

    // 校验通过的串口帧
    pub(crate) serial_frames: AtomicU64,

    pub(crate) window_start: Instant,
}

impl FpsStatistics {
    pub fn new() -> Self {
        Self {
            left_requests: AtomicU64::new(0),
            right_requests: AtomicU64::new(0),
            both_requests: AtomicU64::new(0),
            left_records: AtomicU64::new(0),
            right_records: AtomicU64::new(0),
            serial_frames: AtomicU64::new(0),
            window_start: Instant::now(),
        }
    }

    /// 清零计数器并开始新的统计窗口
    ///
    /// 会话通过 `ArcSwap` 整体替换实例，这里的 `&mut self` 只用于独占持有的场景。
    pub fn reset(&mut self) {
        self.left_requests.store(0, Ordering::Relaxed);
        self.right_requests.store(0, Ordering::Relaxed);
        self.both_requests.store(0, Ordering::Relaxed);
        self.left_records.store(0, Ordering::Relaxed);
        self.right_records.store(0, Ordering::Relaxed);
        self.serial_frames.store(0, Ordering::Relaxed);
        self.window_start = Instant::now();
    }

    /// 计算频率（次/秒）
    pub fn calculate_fps(&self) -> FpsResult {
        // 避免除零（至少 1ms）
        let elapsed_secs = self.window_start.elapsed().as_secs_f64().max(0.001);
        let counts = self.get_counts();

        FpsResult {
            left_requests: counts.left_requests as f64 / elapsed_secs,
            right_requests: counts.right_requests as f64 / elapsed_secs,
            both_requests: counts.both_requests as f64 / elapsed_secs,
            left_records: counts.left_records as f64 / elapsed_secs,
            right_records: counts.right_records as f64 / elapsed_secs,
            serial_frames: counts.serial_frames as f64 / elapsed_secs,
        }
    }

    /// 获取原始计数器值
    pub fn get_counts(&self) -> FpsCounts {
        FpsCounts {
            left_requests: self.left_requests.load(Ordering::Relaxed),
            right_requests: self.right_requests.load(Ordering::Relaxed),
            both_requests: self.both_requests.load(Ordering::Relaxed),
            left_records: self.left_records.load(Ordering::Relaxed),
            right_records: self.right_records.load(Ordering::Relaxed),
            serial_frames: self.serial_frames.load(Ordering::Relaxed),
        }
    }

    pub fn window_start(&self) -> Instant {
        self.window_start
    }

    pub fn elapsed(&self) -> std::time::Duration {
        self.window_start.elapsed()
    }
}

impl Default for FpsStatistics {
    fn default() -> Self {
        Self::new()
    }
}

/// 频率计算结果（次/秒）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FpsResult {
    pub left_requests: f64,
    pub right_requests: f64,
    pub both_requests: f64,
    pub left_records: f64,
    pub right_records: f64,
    pub serial_frames: f64,
}

/// 计数器原始值
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FpsCounts {
    pub left_requests: u64,
    pub right_requests: u64,
    pub both_requests: u64,
    pub left_records: u64,
    pub right_records: u64,
    pub serial_frames: u64,
}
