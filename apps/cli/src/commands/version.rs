//! 版本查询命令

use anyhow::Result;
use clap::Args;
use teleop_driver::{CommandKind, Event, Session};
use teleop_protocol::VersionInfo;

use super::await_reply;
use crate::connection::ConnectionArgs;

/// 版本查询参数
#[derive(Args, Debug)]
pub struct VersionCommand {
    #[command(flatten)]
    pub connection: ConnectionArgs,
}

impl VersionCommand {
    pub fn execute(&self) -> Result<()> {
        let connection = self.connection.connect()?;
        let version = query_version(&connection.session)?;
        println!("硬件版本: {}", version.hardware_string());
        println!("软件版本: {}", version.software_string());
        Ok(())
    }
}

/// 发送版本请求并等待应答（含自动重试）
pub fn query_version(session: &Session) -> Result<VersionInfo> {
    session.request_version()?;
    await_reply(session, CommandKind::GetVersion, Event::version_info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::config::CliConfig;
    use teleop_driver::TransportKind;

    #[test]
    fn test_version_from_simulator() {
        for transport in [TransportKind::Serial, TransportKind::Can] {
            let args = ConnectionArgs {
                transport: Some(transport),
                mock: true,
                ..Default::default()
            };
            let connection = args.resolve(&CliConfig::default()).connect().unwrap();
            let version = query_version(&connection.session).unwrap();
            assert_eq!(version.hardware_string(), "V1.1.4");
            assert_eq!(version.software_string(), "V1.0.0");
        }
    }
}
