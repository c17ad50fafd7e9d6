//! Builder 模式实现
//!
//! 提供链式构造 [`Session`] 的便捷方式，以及会话的运行参数 [`SessionConfig`]。

use std::time::Duration;

use crate::correlator::RetryPolicies;
use crate::error::DriverError;
use crate::session::Session;
#[cfg(target_os = "linux")]
use teleop_transport::SocketCanAdapter;
#[cfg(unix)]
use teleop_transport::TtySerialPort;
#[cfg(not(target_os = "linux"))]
use teleop_transport::{TransportDeviceError, TransportDeviceErrorKind, TransportError};

/// 默认串口波特率
pub const DEFAULT_BAUD_RATE: u32 = 2_000_000;

/// 默认 CAN 接口
pub const DEFAULT_CAN_INTERFACE: &str = "can0";

/// 传输类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum TransportKind {
    #[default]
    Serial,
    Can,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Serial => write!(f, "serial"),
            TransportKind::Can => write!(f, "can"),
        }
    }
}

impl std::str::FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "serial" => Ok(TransportKind::Serial),
            "can" => Ok(TransportKind::Can),
            other => Err(format!("unknown transport '{}' (expected serial or can)", other)),
        }
    }
}

/// 会话配置
///
/// 控制读线程、调度线程的节拍与超时，以及各命令的重试策略。
///
/// # Example
///
/// ```
/// use teleop_driver::SessionConfig;
///
/// let config = SessionConfig {
///     tick_interval_ms: 10,
///     ..Default::default()
/// };
/// assert_eq!(config.join_timeout_ms, 1000);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SessionConfig {
    /// 串口读超时（毫秒）
    pub serial_read_timeout_ms: u64,
    /// CAN 接收超时（毫秒）
    pub can_receive_timeout_ms: u64,
    /// CAN 无数据时的退避（微秒）
    pub idle_backoff_us: u64,
    /// 非致命读错误后的退避（毫秒）
    pub error_backoff_ms: u64,
    /// 调度线程检查超时的间隔（毫秒）
    pub tick_interval_ms: u64,
    /// 关闭时等待线程退出的上限（毫秒）
    pub join_timeout_ms: u64,
    /// 半条记录的最长保留时间（毫秒）
    pub fragment_max_age_ms: u64,
    pub retry: RetryPolicies,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            serial_read_timeout_ms: 10,
            can_receive_timeout_ms: 2,
            idle_backoff_us: 1000,
            error_backoff_ms: 10,
            tick_interval_ms: 20,
            join_timeout_ms: 1000,
            fragment_max_age_ms: 500,
            retry: RetryPolicies::default(),
        }
    }
}

impl SessionConfig {
    pub fn serial_read_timeout(&self) -> Duration {
        Duration::from_millis(self.serial_read_timeout_ms)
    }

    pub fn can_receive_timeout(&self) -> Duration {
        Duration::from_millis(self.can_receive_timeout_ms)
    }

    pub fn idle_backoff(&self) -> Duration {
        Duration::from_micros(self.idle_backoff_us)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    pub fn fragment_max_age(&self) -> Duration {
        Duration::from_millis(self.fragment_max_age_ms)
    }

    /// 检查取值范围
    pub fn validate(&self) -> Result<(), DriverError> {
        if self.tick_interval_ms == 0 {
            return Err(DriverError::InvalidConfig(
                "tick_interval_ms must be at least 1".to_string(),
            ));
        }
        if self.serial_read_timeout_ms == 0 || self.can_receive_timeout_ms == 0 {
            return Err(DriverError::InvalidConfig(
                "read timeouts must be at least 1 ms".to_string(),
            ));
        }
        let policies = [
            self.retry.get_version,
            self.retry.calibrate_serial,
            self.retry.calibrate_can,
            self.retry.default,
        ];
        if policies.iter().any(|p| p.timeout_ms == 0) {
            return Err(DriverError::InvalidConfig(
                "retry timeouts must be at least 1 ms".to_string(),
            ));
        }
        Ok(())
    }
}

/// Session Builder（链式构造）
///
/// # Example
///
/// ```no_run
/// use teleop_driver::{SessionBuilder, TransportKind};
///
/// // 串口（默认 2 Mbps）
/// let session = SessionBuilder::new()
///     .device("/dev/ttyUSB0")
///     .build()
///     .unwrap();
///
/// // CAN
/// let session = SessionBuilder::new()
///     .transport(TransportKind::Can)
///     .interface("can0")
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone, Default)]
pub struct SessionBuilder {
    transport: TransportKind,
    /// 串口设备路径
    device: Option<String>,
    /// 串口波特率
    baud_rate: Option<u32>,
    /// CAN 接口名
    interface: Option<String>,
    config: Option<SessionConfig>,
}

impl SessionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transport(mut self, transport: TransportKind) -> Self {
        self.transport = transport;
        self
    }

    /// 设置串口设备（串口传输必填）
    pub fn device(mut self, device: impl Into<String>) -> Self {
        self.device = Some(device.into());
        self
    }

    /// 设置串口波特率（可选，默认 2000000）
    pub fn baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = Some(baud_rate);
        self
    }

    /// 设置 CAN 接口（可选，默认 "can0"）
    ///
    /// 位速率由系统配置（`ip link set can0 type can bitrate 1000000`）。
    pub fn interface(mut self, interface: impl Into<String>) -> Self {
        self.interface = Some(interface.into());
        self
    }

    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// 打开设备并启动会话
    ///
    /// # Errors
    /// - `DriverError::InvalidConfig`: 配置非法或串口未指定设备
    /// - `DriverError::Transport`: 设备打开失败
    pub fn build(self) -> Result<Session, DriverError> {
        let config = self.config.clone().unwrap_or_default();
        config.validate()?;

        match self.transport {
            TransportKind::Serial => self.build_serial(config),
            TransportKind::Can => self.build_can(config),
        }
    }

    #[cfg(unix)]
    fn build_serial(&self, config: SessionConfig) -> Result<Session, DriverError> {
        let device = self.device.as_deref().ok_or_else(|| {
            DriverError::InvalidConfig("serial transport requires a device path".to_string())
        })?;
        let baud = self.baud_rate.unwrap_or(DEFAULT_BAUD_RATE);
        let port = TtySerialPort::open(device, baud)?;
        tracing::info!("Opened serial device {} at {} baud", device, baud);
        Session::open_serial(port, config)
    }

    #[cfg(not(unix))]
    fn build_serial(&self, _config: SessionConfig) -> Result<Session, DriverError> {
        Err(DriverError::Transport(TransportError::Device(
            TransportDeviceError::new(
                TransportDeviceErrorKind::UnsupportedConfig,
                "The tty serial adapter is only available on Unix",
            ),
        )))
    }

    #[cfg(target_os = "linux")]
    fn build_can(&self, config: SessionConfig) -> Result<Session, DriverError> {
        let interface = self.interface.as_deref().unwrap_or(DEFAULT_CAN_INTERFACE);
        let adapter = SocketCanAdapter::new(interface)?;
        tracing::info!("Opened CAN interface {}", interface);
        Session::open_can(adapter, config)
    }

    #[cfg(not(target_os = "linux"))]
    fn build_can(&self, _config: SessionConfig) -> Result<Session, DriverError> {
        Err(DriverError::Transport(TransportError::Device(
            TransportDeviceError::new(
                TransportDeviceErrorKind::UnsupportedConfig,
                "SocketCAN is only available on Linux",
            ),
        )))
    }
}
