//! 命令定义和实现

pub mod calibrate;
pub mod config;
pub mod monitor;
pub mod send;
pub mod torque;
pub mod version;

pub use calibrate::CalibrateCommand;
pub use config::ConfigCommand;
pub use monitor::MonitorCommand;
pub use send::SendCommand;
pub use torque::TorqueCommand;
pub use version::VersionCommand;

use anyhow::Result;
use std::time::{Duration, Instant};
use teleop_driver::{CommandKind, ConnectionState, ErrorKind, Event, Session};

/// 重试耗尽之后额外等待的时间
const REPLY_GRACE: Duration = Duration::from_millis(500);

/// 等待某个命令的结果
///
/// 会话在重试耗尽后发出 `Timeout` 错误事件；这里按重试策略推算一个
/// 兜底截止时间，防止事件丢失时无限等待。
pub fn await_reply<T>(
    session: &Session,
    command: CommandKind,
    mut pick: impl FnMut(&Event) -> Option<T>,
) -> Result<T> {
    let policy = session
        .config()
        .retry
        .for_command(command, session.transport());
    let deadline =
        Instant::now() + policy.timeout() * u32::from(policy.max_attempts.max(1)) + REPLY_GRACE;
    let events = session.events();

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let event = match events.recv_timeout(remaining) {
            Ok(event) => event,
            Err(_) => anyhow::bail!("等待 {} 应答超时", command.name()),
        };

        if let Some(value) = pick(&event) {
            return Ok(value);
        }
        match event {
            Event::Error {
                kind: ErrorKind::Timeout,
                message,
            } => anyhow::bail!("{}", message),
            Event::Error {
                kind: ErrorKind::Transport,
                message,
            } => anyhow::bail!("传输错误: {}", message),
            Event::ConnectionChanged(ConnectionState::Disconnected) => {
                anyhow::bail!("连接已断开")
            },
            _ => {},
        }
    }
}

/// 格式化一条关节角记录
pub fn format_angles(values: &[f32; 7]) -> String {
    values
        .iter()
        .map(|v| format!("{:8.2}", v))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_angles() {
        let text = format_angles(&[1.0, -2.5, 0.0, 10.25, 0.0, 0.0, 180.0]);
        assert_eq!(text.split_whitespace().count(), 7);
        assert!(text.starts_with("    1.00"));
        assert!(text.ends_with("  180.00"));
    }
}
