//! 臂数据分片重组缓存
//!
//! CAN 上每条臂记录拆成两帧到达：part 1 携带关节 0-3，part 2 携带关节 4-6。
//! 两个分片到齐后才产出一条完整记录，任何时刻都不会暴露半条记录。
//!
//! 缓存只由 CAN 读线程写入；其他线程通过 [`SharedFragmentCache::snapshot`] 读取。

use parking_lot::Mutex;
use std::time::{Duration, Instant};
use teleop_protocol::{Arm, FragmentPart, JOINTS_PER_ARM, raw_to_degrees};
use tracing::{debug, warn};

use crate::error::CacheError;

const PART1_LEN: usize = FragmentPart::First.value_count();
const PART2_LEN: usize = FragmentPart::Second.value_count();

/// 单个分片槽位
#[derive(Debug, Clone, Copy)]
struct Slot<const N: usize> {
    values: [i16; N],
    written_at: Instant,
}

/// 单臂的两个槽位
#[derive(Debug, Clone, Copy, Default)]
struct ArmSlots {
    part1: Option<Slot<PART1_LEN>>,
    part2: Option<Slot<PART2_LEN>>,
}

impl ArmSlots {
    fn is_complete(&self) -> bool {
        self.part1.is_some() && self.part2.is_some()
    }

    fn clear(&mut self) {
        self.part1 = None;
        self.part2 = None;
    }

    fn take_record(&mut self) -> Option<[f32; JOINTS_PER_ARM]> {
        let (part1, part2) = (self.part1?, self.part2?);
        self.clear();

        let mut record = [0.0f32; JOINTS_PER_ARM];
        for (dst, raw) in record
            .iter_mut()
            .zip(part1.values.iter().chain(part2.values.iter()))
        {
            *dst = raw_to_degrees(*raw);
        }
        Some(record)
    }

    fn expire(&mut self, now: Instant, max_age: Duration) -> usize {
        let mut dropped = 0;
        if self
            .part1
            .is_some_and(|slot| now.saturating_duration_since(slot.written_at) > max_age)
        {
            self.part1 = None;
            dropped += 1;
        }
        if self
            .part2
            .is_some_and(|slot| now.saturating_duration_since(slot.written_at) > max_age)
        {
            self.part2 = None;
            dropped += 1;
        }
        dropped
    }
}

/// 槽位占用情况（某一时刻的快照）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheSnapshot {
    pub left_part1: bool,
    pub left_part2: bool,
    pub right_part1: bool,
    pub right_part2: bool,
}

impl CacheSnapshot {
    pub fn is_empty(&self) -> bool {
        !(self.left_part1 || self.left_part2 || self.right_part1 || self.right_part2)
    }
}

/// 分片重组缓存
///
/// # Example
///
/// ```
/// use std::time::Instant;
/// use teleop_driver::ArmFragmentCache;
/// use teleop_protocol::{Arm, FragmentPart};
///
/// let mut cache = ArmFragmentCache::new();
/// let now = Instant::now();
/// cache.add_part(Arm::Left, FragmentPart::First, &[10, 20, 30, 40], now).unwrap();
/// assert!(!cache.is_complete(Arm::Left));
/// cache.add_part(Arm::Left, FragmentPart::Second, &[50, 60, 70], now).unwrap();
/// let record = cache.take_record(Arm::Left).unwrap();
/// assert_eq!(record, [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ArmFragmentCache {
    left: ArmSlots,
    right: ArmSlots,
}

impl ArmFragmentCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots_mut(&mut self, arm: Arm) -> Result<&mut ArmSlots, CacheError> {
        match arm {
            Arm::Left => Ok(&mut self.left),
            Arm::Right => Ok(&mut self.right),
            Arm::Both => Err(CacheError::NotSingleArm),
        }
    }

    /// 写入一个分片（覆盖该槽位的旧值）
    ///
    /// 关节数必须与分片序号匹配（part 1 为 4，part 2 为 3），否则丢弃并返回错误。
    pub fn add_part(
        &mut self,
        arm: Arm,
        part: FragmentPart,
        values: &[i16],
        now: Instant,
    ) -> Result<(), CacheError> {
        let expected = part.value_count();
        if values.len() != expected {
            warn!(
                "Discarding {} arm {:?} fragment: expected {} values, got {}",
                arm,
                part,
                expected,
                values.len()
            );
            return Err(CacheError::WrongCount {
                part,
                expected,
                actual: values.len(),
            });
        }

        let slots = self.slots_mut(arm)?;
        match part {
            FragmentPart::First => {
                let mut buf = [0i16; PART1_LEN];
                buf.copy_from_slice(values);
                slots.part1 = Some(Slot {
                    values: buf,
                    written_at: now,
                });
            },
            FragmentPart::Second => {
                let mut buf = [0i16; PART2_LEN];
                buf.copy_from_slice(values);
                slots.part2 = Some(Slot {
                    values: buf,
                    written_at: now,
                });
            },
        }
        Ok(())
    }

    /// 两个分片是否都已到达（`Both` 表示两臂都完整）
    pub fn is_complete(&self, arm: Arm) -> bool {
        match arm {
            Arm::Left => self.left.is_complete(),
            Arm::Right => self.right.is_complete(),
            Arm::Both => self.left.is_complete() && self.right.is_complete(),
        }
    }

    /// 取出完整记录（度），并清空该臂的槽位；未完整时返回 `None` 且不修改缓存
    pub fn take_record(&mut self, arm: Arm) -> Option<[f32; JOINTS_PER_ARM]> {
        self.slots_mut(arm).ok()?.take_record()
    }

    /// 清空一侧；`Both` 清空两侧
    pub fn clear_arm(&mut self, arm: Arm) {
        match arm {
            Arm::Left => self.left.clear(),
            Arm::Right => self.right.clear(),
            Arm::Both => self.clear_all(),
        }
    }

    pub fn clear_all(&mut self) {
        self.left.clear();
        self.right.clear();
    }

    pub fn snapshot(&self) -> CacheSnapshot {
        CacheSnapshot {
            left_part1: self.left.part1.is_some(),
            left_part2: self.left.part2.is_some(),
            right_part1: self.right.part1.is_some(),
            right_part2: self.right.part2.is_some(),
        }
    }

    /// 丢弃超过 `max_age` 的半条记录，返回丢弃的槽位数
    ///
    /// 丢失的分片不会与很久之后到达的另一半拼接。
    pub fn expire_older_than(&mut self, now: Instant, max_age: Duration) -> usize {
        let dropped = self.left.expire(now, max_age) + self.right.expire(now, max_age);
        if dropped > 0 {
            debug!("Expired {} stale fragment slot(s)", dropped);
        }
        dropped
    }
}

/// 线程间共享的分片缓存
///
/// 每次加锁只覆盖一次更新或快照，从不跨越 I/O。
#[derive(Debug, Default)]
pub struct SharedFragmentCache {
    inner: Mutex<ArmFragmentCache>,
}

impl SharedFragmentCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// 写入分片；若该臂因此完整，原子地取出记录
    pub fn add_part(
        &self,
        arm: Arm,
        part: FragmentPart,
        values: &[i16],
        now: Instant,
    ) -> Result<Option<[f32; JOINTS_PER_ARM]>, CacheError> {
        let mut cache = self.inner.lock();
        cache.add_part(arm, part, values, now)?;
        Ok(cache.take_record(arm))
    }

    pub fn is_complete(&self, arm: Arm) -> bool {
        self.inner.lock().is_complete(arm)
    }

    pub fn take_record(&self, arm: Arm) -> Option<[f32; JOINTS_PER_ARM]> {
        self.inner.lock().take_record(arm)
    }

    pub fn clear_arm(&self, arm: Arm) {
        self.inner.lock().clear_arm(arm);
    }

    pub fn clear_all(&self) {
        self.inner.lock().clear_all();
    }

    pub fn snapshot(&self) -> CacheSnapshot {
        self.inner.lock().snapshot()
    }

    pub fn expire_older_than(&self, now: Instant, max_age: Duration) -> usize {
        self.inner.lock().expire_older_than(now, max_age)
    }
}
