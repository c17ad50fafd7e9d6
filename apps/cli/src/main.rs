//! # Teleop CLI
//!
//! 双臂遥操作链路的命令行控制台。
//!
//! ```bash
//! # 配置默认传输
//! teleop-cli config set --transport serial --device /dev/ttyUSB0
//!
//! # 读取版本（失败时自动重试）
//! teleop-cli version
//!
//! # CAN 轮询左臂数据，Ctrl+C 停止
//! teleop-cli monitor --transport can --arm left --interval-ms 20
//!
//! # 无硬件时使用内置模拟设备
//! teleop-cli monitor --mock --count 50
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod connection;
mod simulator;
mod validation;

use commands::{
    CalibrateCommand, ConfigCommand, MonitorCommand, SendCommand, TorqueCommand, VersionCommand,
};

/// Teleop CLI - 双臂遥操作命令行工具
#[derive(Parser, Debug)]
#[command(name = "teleop-cli")]
#[command(about = "Command-line console for the dual-arm teleoperation link", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 配置管理
    #[command(subcommand)]
    Config(ConfigCommand),

    /// 读取硬件/软件版本
    Version {
        #[command(flatten)]
        args: VersionCommand,
    },

    /// 零点标定
    Calibrate {
        #[command(flatten)]
        args: CalibrateCommand,
    },

    /// 监控臂数据
    Monitor {
        #[command(flatten)]
        args: MonitorCommand,
    },

    /// 发送原始 CAN 帧
    Send {
        #[command(flatten)]
        args: SendCommand,
    },

    /// 单关节扭矩控制（串口）
    Torque {
        #[command(flatten)]
        args: TorqueCommand,
    },
}

fn main() -> Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "teleop_cli=info,teleop_driver=info".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Config(cmd) => cmd.execute(),
        Commands::Version { args } => args.execute(),
        Commands::Calibrate { args } => args.execute(),
        Commands::Monitor { args } => args.execute(),
        Commands::Send { args } => args.execute(),
        Commands::Torque { args } => args.execute(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_monitor_with_common_flags() {
        let cli = Cli::try_parse_from([
            "teleop-cli",
            "monitor",
            "--transport",
            "can",
            "--interface",
            "can1",
            "--arm",
            "right",
            "--count",
            "10",
        ])
        .unwrap();

        match cli.command {
            Commands::Monitor { args } => {
                assert_eq!(args.connection.interface.as_deref(), Some("can1"));
                assert_eq!(args.count, Some(10));
            },
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_send_rejects_bad_id() {
        let result = Cli::try_parse_from(["teleop-cli", "send", "--id", "0x800", "--data", "01"]);
        assert!(result.is_err());
    }
}
