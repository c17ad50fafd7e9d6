//! 原始 CAN 帧发送命令

use anyhow::Result;
use clap::Args;

use crate::connection::ConnectionArgs;
use crate::validation::{parse_can_id, parse_hex_bytes};

/// 发送参数
#[derive(Args, Debug)]
pub struct SendCommand {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// 标准帧 ID（如 0x123）
    #[arg(long, value_parser = parse_can_id)]
    pub id: u16,

    /// 数据（十六进制，空格或逗号分隔，最多 8 字节）
    #[arg(long, default_value = "")]
    pub data: String,
}

impl SendCommand {
    pub fn execute(&self) -> Result<()> {
        let data = parse_hex_bytes(&self.data)?;
        let connection = self.connection.connect()?;

        connection.session.send_custom_frame(self.id, &data)?;
        println!(
            "✅ 已发送: ID=0x{:03X} [{}] {:02X?}",
            self.id,
            data.len(),
            data
        );
        Ok(())
    }
}
