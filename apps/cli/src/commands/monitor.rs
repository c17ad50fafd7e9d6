//! 臂数据监控命令
//!
//! - CAN：按固定间隔发送臂请求，打印重组后的记录
//! - 串口：启用数据推送，退出时禁用

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use teleop_driver::{ConnectionState, Event, Session, TransportKind};
use teleop_protocol::Arm;
use tracing::warn;

use super::format_angles;
use crate::connection::ConnectionArgs;

/// 单次等待事件的上限（保证及时响应 Ctrl+C）
const MAX_EVENT_WAIT: Duration = Duration::from_millis(100);

/// 臂选择
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArmSelection {
    Left,
    Right,
    #[default]
    Both,
}

impl From<ArmSelection> for Arm {
    fn from(selection: ArmSelection) -> Self {
        match selection {
            ArmSelection::Left => Arm::Left,
            ArmSelection::Right => Arm::Right,
            ArmSelection::Both => Arm::Both,
        }
    }
}

/// 监控参数
#[derive(Args, Debug)]
pub struct MonitorCommand {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// 请求的臂（仅 CAN）
    #[arg(short, long, value_enum, default_value_t = ArmSelection::Both)]
    pub arm: ArmSelection,

    /// CAN 请求间隔（毫秒，覆盖配置）
    #[arg(long)]
    pub interval_ms: Option<u64>,

    /// 收到指定条数的记录后退出
    #[arg(short = 'n', long)]
    pub count: Option<u64>,
}

/// 监控结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonitorSummary {
    pub records: u64,
    pub elapsed: Duration,
}

impl MonitorSummary {
    /// 平均记录频率（Hz）
    pub fn average_hz(&self) -> f64 {
        self.records as f64 / self.elapsed.as_secs_f64().max(0.001)
    }
}

impl MonitorCommand {
    pub fn execute(&self) -> Result<()> {
        let config = crate::commands::config::CliConfig::load()?;
        let settings = self.connection.resolve(&config);
        let interval = self
            .interval_ms
            .map(Duration::from_millis)
            .unwrap_or(settings.poll_interval);
        let connection = settings.connect()?;

        // 设置 Ctrl+C 处理
        let running = Arc::new(AtomicBool::new(true));
        {
            let running = running.clone();
            ctrlc::set_handler(move || {
                eprintln!("\n收到退出信号，正在关闭...");
                running.store(false, Ordering::SeqCst);
            })
            .context("设置 Ctrl+C 处理失败")?;
        }

        println!("📊 监控中（{}）...", connection.session.transport());
        println!("按 Ctrl+C 停止\n");

        let summary = run_monitor(
            &connection.session,
            self.arm.into(),
            interval,
            self.count,
            &running,
        )?;

        let fps = connection.session.fps();
        println!();
        println!("✅ 监控已结束");
        println!(
            "  记录数: {}，用时 {:.2} s，平均 {:.2} Hz",
            summary.records,
            summary.elapsed.as_secs_f64(),
            summary.average_hz()
        );
        println!(
            "  左臂 {:.2} Hz，右臂 {:.2} Hz",
            fps.left_records, fps.right_records
        );
        Ok(())
    }
}

/// 监控主循环
///
/// `running` 被清除、收满 `count` 条记录或连接断开时返回。
pub fn run_monitor(
    session: &Session,
    arm: Arm,
    interval: Duration,
    count: Option<u64>,
    running: &AtomicBool,
) -> Result<MonitorSummary> {
    let events = session.events();
    let started = Instant::now();
    let mut records = 0u64;

    session.reset_fps_stats();
    if session.transport() == TransportKind::Serial {
        session.enable_stream()?;
    }

    let mut next_request = Instant::now();
    while running.load(Ordering::SeqCst) && count.is_none_or(|limit| records < limit) {
        if session.transport() == TransportKind::Can && Instant::now() >= next_request {
            session.request_arm_data(arm)?;
            next_request += interval;
        }

        let wait = match session.transport() {
            TransportKind::Can => next_request
                .saturating_duration_since(Instant::now())
                .min(MAX_EVENT_WAIT),
            TransportKind::Serial => MAX_EVENT_WAIT,
        };
        match events.recv_timeout(wait) {
            Ok(Event::Telemetry { arm, values, .. }) => {
                records += 1;
                println!("[{:>6}] {:<5} {}", records, arm, format_angles(&values));
            },
            Ok(Event::Error { kind, message }) => warn!("{:?}: {}", kind, message),
            Ok(Event::ConnectionChanged(ConnectionState::Disconnected)) => {
                anyhow::bail!("连接已断开");
            },
            _ => {},
        }
    }

    if session.transport() == TransportKind::Serial
        && session.is_connected()
        && let Err(e) = session.disable_stream()
    {
        warn!("Failed to disable stream: {}", e);
    }

    Ok(MonitorSummary {
        records,
        elapsed: started.elapsed(),
    })
}
