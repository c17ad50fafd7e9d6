//! 配置管理命令
//!
//! 配置文件为 TOML，位于 `<config_dir>/teleop-arm/config.toml`。

use anyhow::{Context, Result};
use clap::Subcommand;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use teleop_driver::{SessionConfig, TransportKind};

/// 配置文件路径
fn config_dir() -> Result<PathBuf> {
    let mut path = dirs::config_dir().ok_or_else(|| anyhow::anyhow!("无法确定配置目录"))?;

    path.push("teleop-arm");
    Ok(path)
}

pub fn config_file() -> Result<PathBuf> {
    let mut path = config_dir()?;
    path.push("config.toml");
    Ok(path)
}

/// CLI 配置
///
/// 所有字段可选；命令行参数优先于文件中的值。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// 默认传输
    pub transport: Option<TransportKind>,

    /// 串口设备路径
    pub device: Option<String>,

    /// 串口波特率
    pub baud: Option<u32>,

    /// CAN 接口
    pub interface: Option<String>,

    /// monitor 的轮询间隔（毫秒）
    pub poll_interval_ms: Option<u64>,

    /// 会话参数（超时、重试策略）
    pub session: Option<SessionConfig>,
}

impl CliConfig {
    /// 加载配置；文件不存在时返回默认配置
    pub fn load() -> Result<Self> {
        Self::load_from(&config_file()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).context("读取配置文件失败")?;
        toml::from_str(&content)
            .with_context(|| format!("解析配置文件失败: {}", path.display()))
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("创建配置目录失败")?;
        }

        let content = toml::to_string_pretty(self).context("序列化配置失败")?;
        fs::write(path, content).context("写入配置文件失败")?;

        Ok(())
    }

    /// 按名称读取单个配置项
    fn value_of(&self, key: &str) -> Option<Option<String>> {
        let value = match key {
            "transport" => self.transport.map(|t| t.to_string()),
            "device" => self.device.clone(),
            "baud" => self.baud.map(|b| b.to_string()),
            "interface" => self.interface.clone(),
            "poll_interval_ms" | "poll-interval-ms" => {
                self.poll_interval_ms.map(|ms| ms.to_string())
            },
            _ => return None,
        };
        Some(value)
    }
}

/// 配置命令
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// 设置配置项
    Set {
        /// 默认传输（serial / can）
        #[arg(short, long)]
        transport: Option<TransportKind>,

        /// 串口设备路径（如 /dev/ttyUSB0）
        #[arg(short, long)]
        device: Option<String>,

        /// 串口波特率
        #[arg(short, long)]
        baud: Option<u32>,

        /// CAN 接口名称（如 can0）
        #[arg(short, long)]
        interface: Option<String>,

        /// monitor 轮询间隔（毫秒）
        #[arg(long)]
        poll_interval_ms: Option<u64>,
    },

    /// 获取配置项
    Get {
        /// 配置项名称（transport / device / baud / interface / poll_interval_ms / all）
        #[arg(default_value = "all")]
        key: String,
    },

    /// 显示配置文件路径
    Path,
}

impl ConfigCommand {
    pub fn execute(self) -> Result<()> {
        match self {
            ConfigCommand::Set {
                transport,
                device,
                baud,
                interface,
                poll_interval_ms,
            } => {
                let path = config_file()?;
                let mut config = CliConfig::load_from(&path)?;
                let changes = apply_set(
                    &mut config,
                    transport,
                    device,
                    baud,
                    interface,
                    poll_interval_ms,
                );
                if changes.is_empty() {
                    println!("未指定任何配置项");
                    return Ok(());
                }
                config.save_to(&path)?;
                for change in changes {
                    println!("✅ {}", change);
                }
                Ok(())
            },

            ConfigCommand::Get { key } => {
                let config = CliConfig::load()?;
                if key == "all" {
                    print!("{}", toml::to_string_pretty(&config)?);
                    return Ok(());
                }
                match config.value_of(&key) {
                    Some(Some(value)) => println!("{}", value),
                    Some(None) => println!("(未设置)"),
                    None => anyhow::bail!("未知配置项: {}", key),
                }
                Ok(())
            },

            ConfigCommand::Path => {
                println!("{}", config_file()?.display());
                Ok(())
            },
        }
    }
}

/// 写入指定的配置项，返回变更描述
fn apply_set(
    config: &mut CliConfig,
    transport: Option<TransportKind>,
    device: Option<String>,
    baud: Option<u32>,
    interface: Option<String>,
    poll_interval_ms: Option<u64>,
) -> Vec<String> {
    let mut changes = Vec::new();

    if let Some(transport) = transport {
        config.transport = Some(transport);
        changes.push(format!("设置默认传输: {}", transport));
    }
    if let Some(device) = device {
        changes.push(format!("设置串口设备: {}", device));
        config.device = Some(device);
    }
    if let Some(baud) = baud {
        config.baud = Some(baud);
        changes.push(format!("设置波特率: {}", baud));
    }
    if let Some(interface) = interface {
        changes.push(format!("设置 CAN 接口: {}", interface));
        config.interface = Some(interface);
    }
    if let Some(ms) = poll_interval_ms {
        config.poll_interval_ms = Some(ms);
        changes.push(format!("设置轮询间隔: {} ms", ms));
    }

    changes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_loads_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = CliConfig::load_from(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config, CliConfig::default());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = CliConfig::default();
        let changes = apply_set(
            &mut config,
            Some(TransportKind::Can),
            None,
            Some(115_200),
            Some("can1".to_string()),
            Some(50),
        );
        assert_eq!(changes.len(), 4);
        config.save_to(&path).unwrap();

        let loaded = CliConfig::load_from(&path).unwrap();
        assert_eq!(loaded.transport, Some(TransportKind::Can));
        assert_eq!(loaded.baud, Some(115_200));
        assert_eq!(loaded.interface.as_deref(), Some("can1"));
        assert_eq!(loaded.poll_interval_ms, Some(50));
        assert_eq!(loaded.device, None);
    }

    #[test]
    fn test_session_section_is_partial() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "transport = \"serial\"\ndevice = \"/dev/ttyUSB0\"\n\n[session]\ntick_interval_ms = 5\n",
        )
        .unwrap();

        let config = CliConfig::load_from(&path).unwrap();
        let session = config.session.unwrap();
        assert_eq!(session.tick_interval_ms, 5);
        assert_eq!(session.join_timeout_ms, SessionConfig::default().join_timeout_ms);
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "transport = \"usb\"\n").unwrap();
        assert!(CliConfig::load_from(&path).is_err());
    }

    #[test]
    fn test_value_of() {
        let config = CliConfig {
            baud: Some(9600),
            ..Default::default()
        };
        assert_eq!(config.value_of("baud"), Some(Some("9600".to_string())));
        assert_eq!(config.value_of("device"), Some(None));
        assert_eq!(config.value_of("serial"), None);
    }
}
