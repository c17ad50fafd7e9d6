//! 命令字、结果码和 CAN ID 常量定义
//!
//! 串口协议以命令字区分请求类型，CAN 协议以帧 ID 区分请求与分片反馈。

use num_enum::{FromPrimitive, IntoPrimitive, TryFromPrimitive};

// ============================================================================
// 串口帧常量
// ============================================================================

/// 帧头
pub const FRAME_HEADER: u8 = 0xAA;

/// 帧尾
pub const FRAME_TAIL: u8 = 0x55;

/// 帧头 + 命令字 + 长度 + 校验 + 帧尾
pub const FRAME_OVERHEAD: usize = 5;

/// 数据区最大长度（0x00-0x80）
pub const MAX_PAYLOAD_LEN: usize = 0x80;

/// 臂数据推送长度：14 个 f32（左 7 + 右 7）
pub const ARM_DATA_LEN: usize = 56;

/// 每条臂的关节数
pub const JOINTS_PER_ARM: usize = 7;

// ============================================================================
// CAN ID 常量
// ============================================================================

/// 左臂请求
pub const ID_LEFT_ARM_REQUEST: u16 = 0x02;
/// 右臂请求
pub const ID_RIGHT_ARM_REQUEST: u16 = 0x03;
/// 双臂请求
pub const ID_BOTH_ARMS_REQUEST: u16 = 0x04;
/// 标定（请求与应答共用）
pub const ID_CALIBRATE: u16 = 0xC1;
/// 获取版本（请求与应答共用）
pub const ID_GET_VERSION: u16 = 0x64;

/// 左臂关节 0-3
pub const ID_LEFT_PART1: u16 = 0x65;
/// 左臂关节 4-6
pub const ID_LEFT_PART2: u16 = 0x66;
/// 右臂关节 0-3
pub const ID_RIGHT_PART1: u16 = 0x67;
/// 右臂关节 4-6
pub const ID_RIGHT_PART2: u16 = 0x68;

/// 标准帧 ID 上限（11-bit）
pub const MAX_STANDARD_ID: u16 = 0x7FF;

/// CAN 数据最大长度
pub const CAN_MAX_DATA_LENGTH: usize = 8;

// ============================================================================
// 串口命令字
// ============================================================================

/// 串口命令字
///
/// `TorqueControl` 与 `SetParams` 的命令号为预留值，协议文档尚未定稿。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum CommandType {
    /// 获取臂数据
    GetArmData = 0x01,
    /// 读取版本号
    GetVersion = 0x14,
    /// 启用数据推送
    EnableStream = 0x15,
    /// 禁用数据推送
    DisableStream = 0x16,
    /// 零点标定
    Calibrate = 0x17,
    /// 扭矩控制（预留）
    TorqueControl = 0x20,
    /// 参数设置（预留）
    SetParams = 0x21,
}

impl CommandType {
    /// 日志与 CLI 输出使用的名称
    pub fn name(self) -> &'static str {
        match self {
            CommandType::GetArmData => "get-arm-data",
            CommandType::GetVersion => "get-version",
            CommandType::EnableStream => "enable-stream",
            CommandType::DisableStream => "disable-stream",
            CommandType::Calibrate => "calibrate",
            CommandType::TorqueControl => "torque-control",
            CommandType::SetParams => "set-params",
        }
    }
}

impl std::fmt::Display for CommandType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (0x{:02X})", self.name(), u8::from(*self))
    }
}

/// 应答结果码（数据区第 1 字节）
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum ResultCode {
    Success = 0x00,
    Fail = 0x01,
    /// 其他结果码；放在 0xFD 之前，避免隐式判别值溢出
    #[num_enum(catch_all)]
    Other(u8),
    UnknownCommand = 0xFD,
    ChecksumError = 0xFF,
}

impl ResultCode {
    pub fn is_success(self) -> bool {
        self == ResultCode::Success
    }
}

impl std::fmt::Display for ResultCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResultCode::Success => write!(f, "success"),
            ResultCode::Fail => write!(f, "fail"),
            ResultCode::UnknownCommand => write!(f, "unknown command"),
            ResultCode::ChecksumError => write!(f, "checksum error"),
            ResultCode::Other(code) => write!(f, "result code 0x{code:02X}"),
        }
    }
}

// ============================================================================
// 臂选择
// ============================================================================

/// 臂选择
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Arm {
    Left,
    Right,
    /// 仅用于请求；遥测记录总是 `Left` 或 `Right`
    Both,
}

impl Arm {
    /// 该臂对应的 CAN 请求 ID
    pub fn request_id(self) -> u16 {
        match self {
            Arm::Left => ID_LEFT_ARM_REQUEST,
            Arm::Right => ID_RIGHT_ARM_REQUEST,
            Arm::Both => ID_BOTH_ARMS_REQUEST,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Arm::Left => "left",
            Arm::Right => "right",
            Arm::Both => "both",
        }
    }
}

impl std::fmt::Display for Arm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// 分片序号
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FragmentPart {
    /// 关节 0-3（4 个 i16）
    First,
    /// 关节 4-6（3 个 i16）
    Second,
}

impl FragmentPart {
    /// 该分片携带的关节数
    pub const fn value_count(self) -> usize {
        match self {
            FragmentPart::First => 4,
            FragmentPart::Second => 3,
        }
    }
}

// ============================================================================
// ID 分类
// ============================================================================

/// CAN 帧分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusMessageKind {
    /// 臂数据分片
    Fragment { arm: Arm, part: FragmentPart },
    /// 版本应答
    Version,
    /// 标定应答
    Calibrate,
    /// 臂数据请求（总线上其他节点发出的回显）
    ArmRequest(Arm),
    /// 未知 ID
    Unknown,
}

impl BusMessageKind {
    /// 根据 CAN ID 判断帧类型
    pub fn from_id(id: u16) -> Self {
        match id {
            ID_LEFT_PART1 => BusMessageKind::Fragment {
                arm: Arm::Left,
                part: FragmentPart::First,
            },
            ID_LEFT_PART2 => BusMessageKind::Fragment {
                arm: Arm::Left,
                part: FragmentPart::Second,
            },
            ID_RIGHT_PART1 => BusMessageKind::Fragment {
                arm: Arm::Right,
                part: FragmentPart::First,
            },
            ID_RIGHT_PART2 => BusMessageKind::Fragment {
                arm: Arm::Right,
                part: FragmentPart::Second,
            },
            ID_GET_VERSION => BusMessageKind::Version,
            ID_CALIBRATE => BusMessageKind::Calibrate,
            ID_LEFT_ARM_REQUEST => BusMessageKind::ArmRequest(Arm::Left),
            ID_RIGHT_ARM_REQUEST => BusMessageKind::ArmRequest(Arm::Right),
            ID_BOTH_ARMS_REQUEST => BusMessageKind::ArmRequest(Arm::Both),
            _ => BusMessageKind::Unknown,
        }
    }
}
