//! 模拟设备（`--mock`）
//!
//! 在 Mock 传输上安装应答器，行为与真实控制器一致：
//! - CAN：臂请求回两个分片，版本请求回 `72 64 01 00`，标定回成功
//! - 串口：命令回成功应答，启用推送后按固定周期注入 56 字节臂数据帧

use anyhow::{Context, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use teleop_protocol::{
    ARM_DATA_LEN, Arm, BusFrame, BusMessageKind, CommandType, FragmentPart, ID_CALIBRATE,
    ID_GET_VERSION, ID_LEFT_PART1, ID_LEFT_PART2, ID_RIGHT_PART1, ID_RIGHT_PART2, ResultCode,
    encode, f32_to_bytes_le, i16_to_bytes_be,
};
use teleop_transport::{MockCanHandle, MockSerialHandle};
use tracing::{debug, warn};

/// 模拟固件版本：硬件 V1.1.4，软件 V1.0.0
const VERSION_BYTES: [u8; 4] = [0x72, 0x64, 0x01, 0x00];

/// 合成关节角（度）：各关节不同相位的正弦
fn joint_angles(arm: Arm, t: f32) -> [f32; 7] {
    let phase = if arm == Arm::Right { 0.5 } else { 0.0 };
    std::array::from_fn(|joint| {
        let amplitude = 10.0 * (joint as f32 + 1.0);
        amplitude * (t + phase + joint as f32 * 0.3).sin()
    })
}

fn fragment_frames(arm: Arm, angles: &[f32; 7]) -> [BusFrame; 2] {
    let (id1, id2) = match arm {
        Arm::Right => (ID_RIGHT_PART1, ID_RIGHT_PART2),
        _ => (ID_LEFT_PART1, ID_LEFT_PART2),
    };
    let raw: Vec<u8> = angles
        .iter()
        .flat_map(|deg| i16_to_bytes_be((deg * 10.0).round() as i16))
        .collect();
    let split = FragmentPart::First.value_count() * 2;
    [
        BusFrame::new(id1, &raw[..split]),
        BusFrame::new(id2, &raw[split..]),
    ]
}

/// 左右臂 56 字节数据区
fn arm_data(t: f32) -> Vec<u8> {
    let mut data = Vec::with_capacity(ARM_DATA_LEN);
    for arm in [Arm::Left, Arm::Right] {
        data.extend(joint_angles(arm, t).into_iter().flat_map(f32_to_bytes_le));
    }
    data
}

fn ack(command: CommandType, body: &[u8]) -> Vec<u8> {
    let mut payload = vec![u8::from(ResultCode::Success)];
    payload.extend_from_slice(body);
    encode(command.into(), &payload).unwrap_or_default()
}

pub struct Simulator {
    running: Arc<AtomicBool>,
    streamer: Option<JoinHandle<()>>,
}

impl Simulator {
    /// 在 Mock CAN 上安装应答器
    pub fn attach_can(handle: &MockCanHandle) -> Self {
        let started = Instant::now();
        handle.set_responder(move |frame| {
            let t = started.elapsed().as_secs_f32();
            match BusMessageKind::from_id(frame.id) {
                BusMessageKind::ArmRequest(Arm::Both) => [Arm::Left, Arm::Right]
                    .into_iter()
                    .flat_map(|arm| fragment_frames(arm, &joint_angles(arm, t)))
                    .collect(),
                BusMessageKind::ArmRequest(arm) => {
                    fragment_frames(arm, &joint_angles(arm, t)).to_vec()
                },
                BusMessageKind::Version => {
                    let mut data = [0u8; 8];
                    data[..4].copy_from_slice(&VERSION_BYTES);
                    vec![BusFrame::new(ID_GET_VERSION, &data)]
                },
                BusMessageKind::Calibrate => {
                    vec![BusFrame::new(ID_CALIBRATE, &[0x01, 0, 0, 0, 0, 0, 0, 0])]
                },
                _ => {
                    debug!("Simulator ignores frame 0x{:03X}", frame.id);
                    Vec::new()
                },
            }
        });

        Self {
            running: Arc::new(AtomicBool::new(false)),
            streamer: None,
        }
    }

    /// 在 Mock 串口上安装应答器，并启动推送线程
    pub fn attach_serial(handle: MockSerialHandle, push_interval: Duration) -> Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let streaming = Arc::new(AtomicBool::new(false));
        let started = Instant::now();

        {
            let streaming = streaming.clone();
            handle.set_responder(move |request| {
                let Some(command) = request.get(1).and_then(|b| CommandType::try_from(*b).ok())
                else {
                    warn!("Simulator received an unknown request: {:02X?}", request);
                    return Vec::new();
                };
                match command {
                    CommandType::GetVersion => ack(command, &VERSION_BYTES),
                    CommandType::GetArmData => {
                        ack(command, &arm_data(started.elapsed().as_secs_f32()))
                    },
                    CommandType::EnableStream => {
                        streaming.store(true, Ordering::Release);
                        ack(command, &[])
                    },
                    CommandType::DisableStream => {
                        streaming.store(false, Ordering::Release);
                        ack(command, &[])
                    },
                    CommandType::Calibrate
                    | CommandType::TorqueControl
                    | CommandType::SetParams => ack(command, &[]),
                }
            });
        }

        let streamer = {
            let running = running.clone();
            std::thread::Builder::new()
                .name("teleop-simulator".into())
                .spawn(move || {
                    while running.load(Ordering::Acquire) {
                        if streaming.load(Ordering::Acquire) {
                            let data = arm_data(started.elapsed().as_secs_f32());
                            if let Ok(frame) = encode(CommandType::GetArmData.into(), &data) {
                                handle.inject(&frame);
                            }
                        }
                        std::thread::sleep(push_interval);
                    }
                })
                .context("启动模拟推送线程失败")?
        };

        Ok(Self {
            running,
            streamer: Some(streamer),
        })
    }
}

impl Drop for Simulator {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.streamer.take() {
            let _ = handle.join();
        }
    }
}
