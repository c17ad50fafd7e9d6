//! 单关节扭矩控制命令（串口）

use anyhow::Result;
use clap::Args;
use teleop_driver::{CommandKind, Event, Session};
use teleop_protocol::JointSetpoint;

use super::await_reply;
use crate::connection::ConnectionArgs;
use crate::validation::validate_setpoint;

/// 扭矩控制参数
#[derive(Args, Debug)]
pub struct TorqueCommand {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// 关节 ID
    #[arg(long)]
    pub joint: u8,

    /// 目标位置
    #[arg(long, allow_negative_numbers = true)]
    pub position: f32,

    /// 速度
    #[arg(long, default_value_t = 0.0)]
    pub speed: f32,

    /// 加速度
    #[arg(long, default_value_t = 0.0)]
    pub accel: f32,

    /// 扭矩
    #[arg(long, allow_negative_numbers = true, default_value_t = 0.0)]
    pub torque: f32,
}

impl TorqueCommand {
    pub fn setpoint(&self) -> JointSetpoint {
        JointSetpoint {
            id: self.joint,
            position: self.position,
            speed: self.speed,
            acceleration: self.accel,
            torque: self.torque,
        }
    }

    pub fn execute(&self) -> Result<()> {
        let setpoint = self.setpoint();
        validate_setpoint(&setpoint)?;

        let connection = self.connection.connect()?;
        send_torque(&connection.session, &setpoint)?;
        println!("✅ 关节 {} 扭矩控制已确认", setpoint.id);
        Ok(())
    }
}

/// 发送扭矩控制命令并等待应答
pub fn send_torque(session: &Session, setpoint: &JointSetpoint) -> Result<()> {
    session.torque_control(setpoint)?;
    let (ok, detail) = await_reply(session, CommandKind::TorqueControl, |event| match event {
        Event::CommandResult {
            command: CommandKind::TorqueControl,
            ok,
            detail,
            ..
        } => Some((*ok, detail.clone())),
        _ => None,
    })?;

    if !ok {
        anyhow::bail!(
            "扭矩控制失败: {}",
            detail.unwrap_or_else(|| "device rejected the request".to_string())
        );
    }
    Ok(())
}
