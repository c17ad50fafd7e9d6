//! 零点标定命令

use anyhow::Result;
use clap::Args;
use teleop_driver::{CommandKind, Event, Session};

use super::await_reply;
use crate::connection::ConnectionArgs;

/// 标定参数
#[derive(Args, Debug)]
pub struct CalibrateCommand {
    #[command(flatten)]
    pub connection: ConnectionArgs,
}

impl CalibrateCommand {
    pub fn execute(&self) -> Result<()> {
        let connection = self.connection.connect()?;
        println!("⏳ 正在标定...");
        calibrate(&connection.session)?;
        println!("✅ 标定完成");
        Ok(())
    }
}

/// 发送标定命令并等待结果；设备拒绝时返回错误
pub fn calibrate(session: &Session) -> Result<()> {
    session.calibrate()?;
    let (ok, detail) = await_reply(session, CommandKind::Calibrate, |event| match event {
        Event::CommandResult {
            command: CommandKind::Calibrate,
            ok,
            detail,
            ..
        } => Some((*ok, detail.clone())),
        _ => None,
    })?;

    if !ok {
        anyhow::bail!(
            "标定失败: {}",
            detail.unwrap_or_else(|| "device rejected the request".to_string())
        );
    }
    Ok(())
}
