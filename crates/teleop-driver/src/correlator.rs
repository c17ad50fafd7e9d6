//! 请求/应答关联器
//!
//! 每种命令最多一个待应答请求：`Idle → AwaitingResponse → {Completed | TimedOut}`。
//! 关联器本身不读时钟也不做 I/O，`now` 由调用方注入；重发由会话的调度线程执行。

use std::collections::HashMap;
use std::time::{Duration, Instant};
use teleop_protocol::CommandType;
use tracing::{debug, warn};

use crate::TransportKind;

/// 关联器以命令字区分请求种类，CAN 上的版本/标定请求映射到同一命令字
pub type CommandKind = CommandType;

/// 重试策略
///
/// `timeout_ms` 既是单次尝试的超时，也是两次尝试之间的间隔。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RetryPolicy {
    /// 总尝试次数（含首次发送），至少为 1
    pub max_attempts: u8,
    /// 单次尝试超时（毫秒）
    pub timeout_ms: u64,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u8, timeout_ms: u64) -> Self {
        Self {
            max_attempts,
            timeout_ms,
        }
    }

    pub const fn single(timeout_ms: u64) -> Self {
        Self::new(1, timeout_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// 各命令的重试策略
///
/// 默认值：
/// - 版本号：共 3 次，每次 1 s
/// - 标定：单次，串口 10 s，CAN 3 s
/// - 其他带应答的命令：单次，1 s
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RetryPolicies {
    pub get_version: RetryPolicy,
    pub calibrate_serial: RetryPolicy,
    pub calibrate_can: RetryPolicy,
    pub default: RetryPolicy,
}

impl Default for RetryPolicies {
    fn default() -> Self {
        Self {
            get_version: RetryPolicy::new(3, 1000),
            calibrate_serial: RetryPolicy::single(10_000),
            calibrate_can: RetryPolicy::single(3000),
            default: RetryPolicy::single(1000),
        }
    }
}

impl RetryPolicies {
    /// 查找某命令在给定传输上的策略
    pub fn for_command(&self, kind: CommandKind, transport: TransportKind) -> RetryPolicy {
        match (kind, transport) {
            (CommandType::GetVersion, _) => self.get_version,
            (CommandType::Calibrate, TransportKind::Serial) => self.calibrate_serial,
            (CommandType::Calibrate, TransportKind::Can) => self.calibrate_can,
            _ => self.default,
        }
    }
}

/// 待应答请求
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingRequest {
    pub command: CommandKind,
    /// 首次发送时间
    pub issued_at: Instant,
    /// 当前尝试的截止时间
    pub deadline: Instant,
    pub attempts_made: u8,
    pub max_attempts: u8,
}

/// `resolve` 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// 匹配到待应答请求，截止时间已取消
    Completed { attempts: u8, elapsed: Duration },
    /// 没有待应答请求（迟到或重复的应答），丢弃即可
    Unsolicited,
}

/// `tick` 产生的超时动作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutAction {
    /// 重新发送，`attempt` 为本次是第几次尝试（从 1 开始计）
    Resend { kind: CommandKind, attempt: u8 },
    /// 重试耗尽，请求已移除
    GiveUp { kind: CommandKind, attempts: u8 },
}

/// 关联器计数（每会话独立）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CorrelatorStats {
    pub sent: u64,
    pub resent: u64,
    pub completed: u64,
    pub timed_out: u64,
    pub unsolicited: u64,
    pub superseded: u64,
    /// 匹配但未解码成功的应答（请求继续等待）
    pub rejected: u64,
}

/// 请求/应答关联器
///
/// # Example
///
/// ```
/// use std::time::{Duration, Instant};
/// use teleop_driver::{CommandKind, Correlator, Resolution, TransportKind};
///
/// let mut correlator = Correlator::new(TransportKind::Serial, Default::default());
/// let t0 = Instant::now();
/// correlator.register(CommandKind::GetVersion, t0);
///
/// let resolution = correlator.resolve(CommandKind::GetVersion, t0 + Duration::from_millis(30));
/// assert!(matches!(resolution, Resolution::Completed { attempts: 1, .. }));
/// assert!(correlator.tick(t0 + Duration::from_secs(5)).is_empty());
/// ```
#[derive(Debug, Clone)]
pub struct Correlator {
    transport: TransportKind,
    policies: RetryPolicies,
    pending: HashMap<CommandKind, PendingRequest>,
    stats: CorrelatorStats,
}

impl Correlator {
    pub fn new(transport: TransportKind, policies: RetryPolicies) -> Self {
        Self {
            transport,
            policies,
            pending: HashMap::new(),
            stats: CorrelatorStats::default(),
        }
    }

    pub fn policy(&self, kind: CommandKind) -> RetryPolicy {
        self.policies.for_command(kind, self.transport)
    }

    /// 登记一次发送；同种命令的旧请求被取代
    pub fn register(&mut self, kind: CommandKind, now: Instant) -> PendingRequest {
        let policy = self.policy(kind);
        let request = PendingRequest {
            command: kind,
            issued_at: now,
            deadline: now + policy.timeout(),
            attempts_made: 1,
            max_attempts: policy.max_attempts.max(1),
        };

        if self.pending.insert(kind, request).is_some() {
            debug!("Pending {} superseded by a new request", kind);
            self.stats.superseded += 1;
        }
        self.stats.sent += 1;
        request
    }

    /// 收到匹配且解码成功的应答
    pub fn resolve(&mut self, kind: CommandKind, now: Instant) -> Resolution {
        match self.pending.remove(&kind) {
            Some(request) => {
                self.stats.completed += 1;
                Resolution::Completed {
                    attempts: request.attempts_made,
                    elapsed: now.saturating_duration_since(request.issued_at),
                }
            },
            None => {
                debug!("Unsolicited response for {}, discarded", kind);
                self.stats.unsolicited += 1;
                Resolution::Unsolicited
            },
        }
    }

    /// 收到匹配但不可用的应答（失败结果码、数据区过短）
    ///
    /// 请求保持 `AwaitingResponse`，由 `tick` 继续重发或放弃。
    /// 返回是否存在对应的待应答请求。
    pub fn reject(&mut self, kind: CommandKind) -> bool {
        if self.pending.contains_key(&kind) {
            self.stats.rejected += 1;
            true
        } else {
            debug!("Unsolicited response for {}, discarded", kind);
            self.stats.unsolicited += 1;
            false
        }
    }

    /// 放弃某命令的等待（发送失败时使用）
    pub fn cancel(&mut self, kind: CommandKind) -> Option<PendingRequest> {
        self.pending.remove(&kind)
    }

    pub fn cancel_all(&mut self) {
        self.pending.clear();
    }

    /// 检查所有截止时间
    ///
    /// 动作按命令字排序，保证相同输入得到相同输出。
    pub fn tick(&mut self, now: Instant) -> Vec<TimeoutAction> {
        let mut expired: Vec<CommandKind> = self
            .pending
            .iter()
            .filter(|(_, request)| now >= request.deadline)
            .map(|(kind, _)| *kind)
            .collect();
        expired.sort_by_key(|kind| u8::from(*kind));

        let mut actions = Vec::with_capacity(expired.len());
        for kind in expired {
            let timeout = self.policy(kind).timeout();
            let Some(request) = self.pending.get_mut(&kind) else {
                continue;
            };

            if request.attempts_made < request.max_attempts {
                request.attempts_made += 1;
                request.deadline = now + timeout;
                self.stats.resent += 1;
                actions.push(TimeoutAction::Resend {
                    kind,
                    attempt: request.attempts_made,
                });
            } else {
                let attempts = request.attempts_made;
                self.pending.remove(&kind);
                self.stats.timed_out += 1;
                warn!("{} timed out after {} attempt(s)", kind, attempts);
                actions.push(TimeoutAction::GiveUp { kind, attempts });
            }
        }
        actions
    }

    pub fn pending(&self, kind: CommandKind) -> Option<&PendingRequest> {
        self.pending.get(&kind)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn stats(&self) -> CorrelatorStats {
        self.stats
    }
}
