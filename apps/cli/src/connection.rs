//! 连接参数解析与会话建立
//!
//! 命令行参数覆盖配置文件，配置文件覆盖内置默认值。

use anyhow::{Context, Result};
use clap::Args;
use std::time::Duration;
use teleop_driver::{
    DEFAULT_BAUD_RATE, DEFAULT_CAN_INTERFACE, Session, SessionBuilder, SessionConfig,
    TransportKind,
};
use teleop_transport::{MockCanAdapter, MockSerialPort};
use tracing::info;

use crate::commands::config::CliConfig;
use crate::simulator::Simulator;

/// 默认 monitor 轮询间隔
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 20;

/// 所有会话类命令共享的连接参数
#[derive(Args, Debug, Clone, Default)]
pub struct ConnectionArgs {
    /// 传输（serial / can，覆盖配置）
    #[arg(short, long)]
    pub transport: Option<TransportKind>,

    /// 串口设备路径（覆盖配置）
    #[arg(short, long)]
    pub device: Option<String>,

    /// 串口波特率（覆盖配置）
    #[arg(short, long)]
    pub baud: Option<u32>,

    /// CAN 接口（覆盖配置）
    #[arg(short, long)]
    pub interface: Option<String>,

    /// 使用内置模拟设备（不访问硬件）
    #[arg(long)]
    pub mock: bool,
}

/// 合并后的连接设置
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionSettings {
    pub transport: TransportKind,
    pub device: Option<String>,
    pub baud: u32,
    pub interface: String,
    pub poll_interval: Duration,
    pub mock: bool,
    pub session: SessionConfig,
}

impl ConnectionArgs {
    /// 与配置文件合并
    pub fn resolve(&self, config: &CliConfig) -> ConnectionSettings {
        ConnectionSettings {
            transport: self.transport.or(config.transport).unwrap_or_default(),
            device: self.device.clone().or_else(|| config.device.clone()),
            baud: self.baud.or(config.baud).unwrap_or(DEFAULT_BAUD_RATE),
            interface: self
                .interface
                .clone()
                .or_else(|| config.interface.clone())
                .unwrap_or_else(|| DEFAULT_CAN_INTERFACE.to_string()),
            poll_interval: Duration::from_millis(
                config.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS),
            ),
            mock: self.mock,
            session: config.session.clone().unwrap_or_default(),
        }
    }

    /// 读取配置文件并建立会话
    pub fn connect(&self) -> Result<Connection> {
        let config = CliConfig::load()?;
        self.resolve(&config).connect()
    }
}

/// 已建立的会话（模拟模式下附带模拟设备）
///
/// 字段顺序决定析构顺序：先关闭会话，再停止模拟设备。
pub struct Connection {
    pub session: Session,
    _simulator: Option<Simulator>,
}

impl ConnectionSettings {
    pub fn connect(&self) -> Result<Connection> {
        if self.mock {
            return self.connect_mock();
        }

        let mut builder = SessionBuilder::new()
            .transport(self.transport)
            .config(self.session.clone());
        match self.transport {
            TransportKind::Serial => {
                let device = self
                    .device
                    .as_deref()
                    .context("串口传输需要指定设备（--device 或 config set --device）")?;
                info!("Connecting to {} at {} baud", device, self.baud);
                builder = builder.device(device).baud_rate(self.baud);
            },
            TransportKind::Can => {
                info!("Connecting to CAN interface {}", self.interface);
                builder = builder.interface(self.interface.as_str());
            },
        }

        let session = builder.build().context("建立会话失败")?;
        Ok(Connection {
            session,
            _simulator: None,
        })
    }

    fn connect_mock(&self) -> Result<Connection> {
        info!("Using simulated {} device", self.transport);
        let (session, simulator) = match self.transport {
            TransportKind::Serial => {
                let port = MockSerialPort::new();
                let simulator = Simulator::attach_serial(port.handle(), self.poll_interval)?;
                (Session::open_serial(port, self.session.clone())?, simulator)
            },
            TransportKind::Can => {
                let adapter = MockCanAdapter::new();
                let simulator = Simulator::attach_can(&adapter.handle());
                (Session::open_can(adapter, self.session.clone())?, simulator)
            },
        };
        Ok(Connection {
            session,
            _simulator: Some(simulator),
        })
    }
}
