//! Pipeline IO 循环模块
//!
//! 后台线程的接收、解析、分发逻辑：
//! - `serial_rx_loop`：字节流 → 拆帧 → 校验 → 分发
//! - `can_rx_loop`：总线帧 → 分片重组 / 应答关联 → 分发
//! - `scheduler_loop`：定期检查请求超时，执行重发或放弃

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Instant;
use teleop_protocol::{
    Arm, BusFrame, BusMessageKind, CommandType, Deframer, Frame, ProtocolError, ResultCode,
    SerialMessage, VersionInfo, parse_arm_data, parse_calibrate_result, parse_fragment,
};
use teleop_transport::{CanRxAdapter, SerialRxAdapter, TransportError};
use tracing::{debug, error, info, trace, warn};

use crate::context::SessionContext;
use crate::correlator::{CommandKind, Resolution, TimeoutAction};
use crate::event::{ErrorKind, Event, TelemetrySource};

/// 串口单次读取的缓冲区大小
const SERIAL_READ_CHUNK: usize = 512;

/// 读错误的统一处理：致命错误终止会话，返回 `false` 表示退出循环
fn handle_read_error(ctx: &SessionContext, e: TransportError, source: &str) -> bool {
    ctx.metrics.device_errors.fetch_add(1, Ordering::Relaxed);

    if e.is_fatal() {
        ctx.fail(format!("{} read failed: {}", source, e));
        return false;
    }

    warn!("{} read error (non-fatal): {}", source, e);
    ctx.emit(Event::error(
        ErrorKind::Transport,
        format!("{} read error: {}", source, e),
    ));
    spin_sleep::sleep(ctx.config.error_backoff());
    true
}

// ============================================================================
// 串口
// ============================================================================

/// 串口读线程主循环
///
/// 拆帧器由本线程独占，不与其他线程共享。
pub(crate) fn serial_rx_loop(mut rx: impl SerialRxAdapter, ctx: Arc<SessionContext>) {
    let mut deframer = Deframer::new();
    let mut buf = [0u8; SERIAL_READ_CHUNK];

    loop {
        if !ctx.is_running() {
            trace!("Serial RX thread: is_running flag is false, exiting");
            break;
        }

        match rx.read(&mut buf) {
            Ok(0) => continue,
            Ok(n) => {
                ctx.metrics.rx_bytes.fetch_add(n as u64, Ordering::Relaxed);
                deframer.feed(&buf[..n]);
                let frames: Vec<Frame> = deframer.drain().collect();

                // 计数先于分发，事件接收方看到的指标不落后于事件
                ctx.metrics.discarded_bytes.store(deframer.discarded_bytes(), Ordering::Relaxed);
                ctx.metrics.resyncs.store(deframer.resyncs(), Ordering::Relaxed);
                ctx.metrics
                    .rx_frames
                    .fetch_add(frames.len() as u64, Ordering::Relaxed);

                let now = Instant::now();
                for frame in &frames {
                    dispatch_serial_frame(&ctx, frame, now);
                }
            },
            Err(TransportError::Timeout) => {
                ctx.metrics.rx_timeouts.fetch_add(1, Ordering::Relaxed);
            },
            Err(e) => {
                if !handle_read_error(&ctx, e, "Serial") {
                    break;
                }
            },
        }
    }

    debug!(
        "Serial RX thread exited ({} bytes discarded, {} resyncs, {} bytes buffered)",
        deframer.discarded_bytes(),
        deframer.resyncs(),
        deframer.buffered()
    );
}

/// 处理一个拆出的串口帧
pub(crate) fn dispatch_serial_frame(ctx: &SessionContext, frame: &Frame, now: Instant) {
    if let Err(e) = frame.validate() {
        match e {
            ProtocolError::ChecksumMismatch { .. } => {
                ctx.metrics.checksum_errors.fetch_add(1, Ordering::Relaxed);
                warn!("Discarding serial frame: {}", e);
                ctx.emit(Event::error(ErrorKind::Checksum, e.to_string()));
            },
            _ => {
                // 声明长度超限等结构错误：仅计数与记录
                debug!("Discarding malformed serial frame: {}", e);
            },
        }
        return;
    }

    ctx.fps_stats.load().serial_frames.fetch_add(1, Ordering::Relaxed);
    trace!("Serial RX frame: {}", hex::encode_upper(frame.to_bytes()));

    match SerialMessage::classify(frame) {
        Ok(SerialMessage::ArmPush(telemetry)) => {
            emit_telemetry(ctx, Arm::Left, telemetry.left, TelemetrySource::SerialPush);
            emit_telemetry(ctx, Arm::Right, telemetry.right, TelemetrySource::SerialPush);
        },
        Ok(SerialMessage::Response {
            command,
            result,
            body,
        }) => handle_serial_response(ctx, command, result, &body, now),
        Err(e) => report_protocol_error(ctx, e),
    }
}

/// 串口应答：先解码，成功后才完成关联
///
/// 失败结果码或数据区过短时请求保持等待，调度线程照常重发或放弃。
fn handle_serial_response(
    ctx: &SessionContext,
    command: CommandType,
    result: ResultCode,
    body: &[u8],
    now: Instant,
) {
    if !result.is_success() {
        if !ctx.correlator.lock().reject(command) {
            return;
        }
        debug!("{} answered with {}, still awaiting", command, result);
        ctx.emit(Event::CommandResult {
            command,
            ok: false,
            result: Some(result),
            detail: Some(format!("device reported {}", result)),
        });
        return;
    }

    match command {
        CommandType::GetVersion => match VersionInfo::parse(body) {
            Ok(version) => {
                if completes(ctx, command, now) {
                    info!("Firmware version: {}", version);
                    ctx.emit(Event::Version {
                        hardware: version.hardware,
                        software: version.software,
                    });
                }
            },
            Err(e) => reject_malformed(ctx, command, e),
        },
        CommandType::GetArmData => match parse_arm_data(body) {
            Ok(telemetry) => {
                if completes(ctx, command, now) {
                    emit_telemetry(ctx, Arm::Left, telemetry.left, TelemetrySource::SerialResponse);
                    emit_telemetry(ctx, Arm::Right, telemetry.right, TelemetrySource::SerialResponse);
                }
            },
            Err(e) => reject_malformed(ctx, command, e),
        },
        _ => {
            if completes(ctx, command, now) {
                ctx.emit(Event::CommandResult {
                    command,
                    ok: true,
                    result: Some(result),
                    detail: None,
                });
            }
        },
    }
}

// ============================================================================
// CAN
// ============================================================================

/// CAN 读线程主循环
pub(crate) fn can_rx_loop(mut rx: impl CanRxAdapter, ctx: Arc<SessionContext>) {
    let max_age = ctx.config.fragment_max_age();
    let idle_backoff = ctx.config.idle_backoff();

    loop {
        if !ctx.is_running() {
            trace!("CAN RX thread: is_running flag is false, exiting");
            break;
        }

        match rx.receive() {
            Ok(frame) => {
                ctx.metrics.rx_frames.fetch_add(1, Ordering::Relaxed);
                dispatch_bus_frame(&ctx, &frame, Instant::now());
            },
            Err(TransportError::Timeout) => {
                ctx.metrics.rx_timeouts.fetch_add(1, Ordering::Relaxed);
                ctx.cache.expire_older_than(Instant::now(), max_age);
                spin_sleep::sleep(idle_backoff);
            },
            Err(e) => {
                if !handle_read_error(&ctx, e, "CAN") {
                    break;
                }
            },
        }
    }

    debug!("CAN RX thread exited");
}

/// 处理一个总线帧
pub(crate) fn dispatch_bus_frame(ctx: &SessionContext, frame: &BusFrame, now: Instant) {
    trace!(
        "CAN RX: ID=0x{:03X}, data={}",
        frame.id,
        hex::encode_upper(frame.data_slice())
    );

    match BusMessageKind::from_id(frame.id) {
        BusMessageKind::Fragment { arm, part } => {
            let values = match parse_fragment(part, frame.data_slice()) {
                Ok(values) => values,
                Err(e) => {
                    report_protocol_error(ctx, e);
                    return;
                },
            };

            ctx.cache.expire_older_than(now, ctx.config.fragment_max_age());
            match ctx.cache.add_part(arm, part, &values, now) {
                Ok(Some(record)) => emit_telemetry(ctx, arm, record, TelemetrySource::Bus),
                Ok(None) => {},
                Err(e) => {
                    ctx.metrics.protocol_errors.fetch_add(1, Ordering::Relaxed);
                    ctx.emit(Event::error(ErrorKind::Protocol, e.to_string()));
                },
            }
        },
        BusMessageKind::Version => match VersionInfo::parse(frame.data_slice()) {
            Ok(version) => {
                if completes(ctx, CommandType::GetVersion, now) {
                    info!("Firmware version: {}", version);
                    ctx.emit(Event::Version {
                        hardware: version.hardware,
                        software: version.software,
                    });
                }
            },
            Err(e) => reject_malformed(ctx, CommandType::GetVersion, e),
        },
        BusMessageKind::Calibrate => match parse_calibrate_result(frame.data_slice()) {
            Ok(ok) => {
                if completes(ctx, CommandType::Calibrate, now) {
                    ctx.emit(Event::CommandResult {
                        command: CommandType::Calibrate,
                        ok,
                        result: None,
                        detail: (!ok).then(|| {
                            format!("calibration rejected (status 0x{:02X})", frame.data[0])
                        }),
                    });
                }
            },
            Err(e) => reject_malformed(ctx, CommandType::Calibrate, e),
        },
        BusMessageKind::ArmRequest(arm) => {
            trace!("Ignoring {} arm request seen on the bus", arm);
        },
        BusMessageKind::Unknown => {
            trace!("Ignoring CAN frame with unknown ID 0x{:03X}", frame.id);
        },
    }
}

/// 关联应答；迟到或重复的应答返回 `false`
fn completes(ctx: &SessionContext, kind: CommandKind, now: Instant) -> bool {
    match ctx.correlator.lock().resolve(kind, now) {
        Resolution::Completed { attempts, elapsed } => {
            debug!(
                "{} answered after {} attempt(s), {:?}",
                kind, attempts, elapsed
            );
            true
        },
        Resolution::Unsolicited => false,
    }
}

// ============================================================================
// 公共
// ============================================================================

fn emit_telemetry(
    ctx: &SessionContext,
    arm: Arm,
    values: [f32; teleop_protocol::JOINTS_PER_ARM],
    source: TelemetrySource,
) {
    let stats = ctx.fps_stats.load();
    match arm {
        Arm::Left => stats.left_records.fetch_add(1, Ordering::Relaxed),
        _ => stats.right_records.fetch_add(1, Ordering::Relaxed),
    };
    ctx.emit(Event::Telemetry {
        arm,
        values,
        source,
    });
}

/// 应答无法解码：记录协议错误，待应答请求不动
fn reject_malformed(ctx: &SessionContext, kind: CommandKind, e: ProtocolError) {
    ctx.correlator.lock().reject(kind);
    report_protocol_error(ctx, e);
}

fn report_protocol_error(ctx: &SessionContext, e: ProtocolError) {
    ctx.metrics.protocol_errors.fetch_add(1, Ordering::Relaxed);
    warn!("Protocol error: {}", e);
    ctx.emit(Event::error(ErrorKind::Protocol, e.to_string()));
}

// ============================================================================
// 调度
// ============================================================================

/// 调度线程主循环：按 `tick_interval` 检查超时
///
/// 重发与用户发送走同一条发送路径；关联器的锁在发送前释放。
pub(crate) fn scheduler_loop(ctx: Arc<SessionContext>) {
    let interval = ctx.config.tick_interval();

    while ctx.is_running() {
        spin_sleep::sleep(interval);
        if !ctx.is_running() {
            break;
        }
        run_timeouts(&ctx, Instant::now());
    }

    trace!("Scheduler thread exited");
}

pub(crate) fn run_timeouts(ctx: &SessionContext, now: Instant) {
    let actions = ctx.correlator.lock().tick(now);

    for action in actions {
        match action {
            TimeoutAction::Resend { kind, attempt } => {
                info!("Resending {} (attempt {})", kind, attempt);
                if let Err(e) = ctx.retransmit(kind) {
                    error!("Failed to resend {}: {}", kind, e);
                    ctx.correlator.lock().cancel(kind);
                    ctx.emit(Event::error(
                        ErrorKind::Transport,
                        format!("failed to resend {}: {}", kind, e),
                    ));
                }
            },
            TimeoutAction::GiveUp { kind, attempts } => {
                ctx.emit(Event::error(
                    ErrorKind::Timeout,
                    format!("{} timed out after {} attempt(s)", kind, attempts),
                ));
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{SessionConfig, TransportKind};
    use crate::context::{Outbound, TxHalf};
    use crossbeam_channel::Receiver;
    use std::time::Duration;
    use teleop_protocol::{encode, f32_to_bytes_le, i16_to_bytes_be};
    use teleop_transport::{MockCanAdapter, MockSerialPort, SplittableAdapter, SplittableSerial};

    fn serial_ctx() -> (SessionContext, Receiver<Event>) {
        let (_rx, tx) = MockSerialPort::new().split().unwrap();
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        let ctx = SessionContext::new(
            TransportKind::Serial,
            SessionConfig::default(),
            events_tx,
            TxHalf::Serial(Box::new(tx)),
        );
        (ctx, events_rx)
    }

    fn can_ctx() -> (SessionContext, Receiver<Event>) {
        let (_rx, tx) = MockCanAdapter::new().split().unwrap();
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        let ctx = SessionContext::new(
            TransportKind::Can,
            SessionConfig::default(),
            events_tx,
            TxHalf::Can(Box::new(tx)),
        );
        (ctx, events_rx)
    }

    fn frame(cmd: u8, payload: &[u8]) -> Frame {
        let mut deframer = Deframer::new();
        deframer.feed(&encode(cmd, payload).unwrap());
        deframer.drain().next().unwrap()
    }

    fn fragment(id: u16, values: &[i16]) -> BusFrame {
        let data: Vec<u8> = values.iter().flat_map(|v| i16_to_bytes_be(*v)).collect();
        BusFrame::new(id, &data)
    }

    #[test]
    fn test_serial_push_emits_both_arms() {
        let (ctx, events) = serial_ctx();
        let payload: Vec<u8> = (0..14).flat_map(|i| f32_to_bytes_le(i as f32)).collect();
        dispatch_serial_frame(&ctx, &frame(0x01, &payload), Instant::now());

        let left = events.try_recv().unwrap();
        let right = events.try_recv().unwrap();
        assert_eq!(
            left,
            Event::Telemetry {
                arm: Arm::Left,
                values: [0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
                source: TelemetrySource::SerialPush,
            }
        );
        assert!(matches!(right, Event::Telemetry { arm: Arm::Right, values, .. } if values[0] == 7.0));
        assert_eq!(ctx.fps_stats.load().get_counts().serial_frames, 1);
    }

    #[test]
    fn test_serial_checksum_error_event() {
        let (ctx, events) = serial_ctx();
        let mut bad = frame(0x14, &[0x00, 0x72, 0x64]);
        bad.checksum ^= 0xFF;
        dispatch_serial_frame(&ctx, &bad, Instant::now());

        assert!(matches!(
            events.try_recv().unwrap(),
            Event::Error {
                kind: ErrorKind::Checksum,
                ..
            }
        ));
        assert_eq!(ctx.metrics.snapshot().checksum_errors, 1);
    }

    #[test]
    fn test_serial_version_response() {
        let (ctx, events) = serial_ctx();
        let now = Instant::now();
        ctx.correlator.lock().register(CommandType::GetVersion, now);
        dispatch_serial_frame(&ctx, &frame(0x14, &[0x00, 0x72, 0x64, 0x01, 0x00]), now);

        assert_eq!(
            events.try_recv().unwrap(),
            Event::Version {
                hardware: 0x72,
                software: 0x64
            }
        );
        assert_eq!(ctx.correlator.lock().pending_count(), 0);
    }

    #[test]
    fn test_serial_unsolicited_response_is_dropped() {
        let (ctx, events) = serial_ctx();
        dispatch_serial_frame(&ctx, &frame(0x14, &[0x00, 0x72, 0x64]), Instant::now());
        assert!(events.try_recv().is_err());
        assert_eq!(ctx.correlator.lock().stats().unsolicited, 1);
    }

    #[test]
    fn test_serial_failure_result_code() {
        let (ctx, events) = serial_ctx();
        let now = Instant::now();
        ctx.correlator.lock().register(CommandType::Calibrate, now);
        dispatch_serial_frame(&ctx, &frame(0x17, &[0x01]), now);

        assert_eq!(
            events.try_recv().unwrap(),
            Event::CommandResult {
                command: CommandType::Calibrate,
                ok: false,
                result: Some(ResultCode::Fail),
                detail: Some("device reported fail".to_string()),
            }
        );
        assert!(ctx.correlator.lock().pending(CommandType::Calibrate).is_some());
    }

    #[test]
    fn test_serial_empty_payload_and_unknown_command() {
        let (ctx, events) = serial_ctx();
        dispatch_serial_frame(&ctx, &frame(0x14, &[]), Instant::now());
        dispatch_serial_frame(&ctx, &frame(0x42, &[0x00]), Instant::now());

        for _ in 0..2 {
            assert!(matches!(
                events.try_recv().unwrap(),
                Event::Error {
                    kind: ErrorKind::Protocol,
                    ..
                }
            ));
        }
        assert_eq!(ctx.metrics.snapshot().protocol_errors, 2);
    }

    #[test]
    fn test_bus_fragments_emit_one_record() {
        let (ctx, events) = can_ctx();
        let now = Instant::now();
        dispatch_bus_frame(&ctx, &fragment(0x67, &[10, 20, 30, 40]), now);
        assert!(events.try_recv().is_err());
        dispatch_bus_frame(&ctx, &fragment(0x68, &[-50, 60, 70]), now);

        assert_eq!(
            events.try_recv().unwrap(),
            Event::Telemetry {
                arm: Arm::Right,
                values: [1.0, 2.0, 3.0, 4.0, -5.0, 6.0, 7.0],
                source: TelemetrySource::Bus,
            }
        );
        assert!(events.try_recv().is_err());
        assert_eq!(ctx.fps_stats.load().get_counts().right_records, 1);
    }

    #[test]
    fn test_bus_short_fragment_is_protocol_error() {
        let (ctx, events) = can_ctx();
        dispatch_bus_frame(&ctx, &BusFrame::new(0x65, &[0, 1, 0, 2]), Instant::now());
        assert!(matches!(
            events.try_recv().unwrap(),
            Event::Error {
                kind: ErrorKind::Protocol,
                ..
            }
        ));
        assert!(ctx.cache.snapshot().is_empty());
    }

    #[test]
    fn test_bus_calibrate_result() {
        let (ctx, events) = can_ctx();
        let now = Instant::now();
        ctx.correlator.lock().register(CommandType::Calibrate, now);
        dispatch_bus_frame(&ctx, &BusFrame::new(0xC1, &[0x01, 0, 0, 0, 0, 0, 0, 0]), now);
        assert_eq!(
            events.try_recv().unwrap(),
            Event::CommandResult {
                command: CommandType::Calibrate,
                ok: true,
                result: None,
                detail: None,
            }
        );

        ctx.correlator.lock().register(CommandType::Calibrate, now);
        dispatch_bus_frame(&ctx, &BusFrame::new(0xC1, &[0x00]), now);
        assert!(matches!(
            events.try_recv().unwrap(),
            Event::CommandResult { ok: false, .. }
        ));
    }

    fn await_serial_version(ctx: &SessionContext, t0: Instant) {
        ctx.outbound.lock().insert(
            CommandType::GetVersion,
            Outbound::Serial(teleop_protocol::get_version_command().to_vec()),
        );
        ctx.correlator.lock().register(CommandType::GetVersion, t0);
    }

    #[test]
    fn test_serial_unusable_version_reply_keeps_retrying() {
        for payload in [&[0x00][..], &[0x00, 0x72], &[0x01], &[0x01, 0x72, 0x64]] {
            let (ctx, events) = serial_ctx();
            let t0 = Instant::now();
            await_serial_version(&ctx, t0);

            dispatch_serial_frame(&ctx, &frame(0x14, payload), t0 + Duration::from_millis(10));
            assert_eq!(ctx.correlator.lock().pending_count(), 1, "payload {payload:02X?}");
            assert!(!events.try_iter().any(|e| matches!(e, Event::Version { .. })));

            run_timeouts(&ctx, t0 + Duration::from_millis(1000));
            assert_eq!(ctx.metrics.snapshot().tx_frames, 1, "payload {payload:02X?}");
            assert_eq!(ctx.correlator.lock().stats().rejected, 1);
            assert_eq!(ctx.correlator.lock().stats().completed, 0);
        }
    }

    #[test]
    fn test_serial_version_after_failed_reply_completes() {
        let (ctx, events) = serial_ctx();
        let t0 = Instant::now();
        await_serial_version(&ctx, t0);

        dispatch_serial_frame(&ctx, &frame(0x14, &[0x01]), t0);
        assert!(matches!(
            events.try_recv().unwrap(),
            Event::CommandResult { ok: false, result: Some(ResultCode::Fail), .. }
        ));

        dispatch_serial_frame(&ctx, &frame(0x14, &[0x00, 0x72, 0x64]), t0);
        assert_eq!(
            events.try_recv().unwrap(),
            Event::Version {
                hardware: 0x72,
                software: 0x64
            }
        );
        assert_eq!(ctx.correlator.lock().pending_count(), 0);
        run_timeouts(&ctx, t0 + Duration::from_millis(1000));
        assert_eq!(ctx.metrics.snapshot().tx_frames, 0);
    }

    #[test]
    fn test_bus_short_version_reply_keeps_retrying() {
        let (ctx, events) = can_ctx();
        let t0 = Instant::now();
        ctx.outbound.lock().insert(
            CommandType::GetVersion,
            Outbound::Bus(teleop_protocol::get_version_frame()),
        );
        ctx.correlator.lock().register(CommandType::GetVersion, t0);

        dispatch_bus_frame(&ctx, &BusFrame::new(0x64, &[0x72]), t0 + Duration::from_millis(10));
        assert!(matches!(
            events.try_recv().unwrap(),
            Event::Error {
                kind: ErrorKind::Protocol,
                ..
            }
        ));
        assert_eq!(ctx.correlator.lock().pending_count(), 1);

        run_timeouts(&ctx, t0 + Duration::from_millis(1000));
        assert_eq!(ctx.metrics.snapshot().tx_frames, 1);
    }

    #[test]
    fn test_bus_empty_calibrate_reply_stays_pending() {
        let (ctx, _events) = can_ctx();
        let now = Instant::now();
        ctx.correlator.lock().register(CommandType::Calibrate, now);
        dispatch_bus_frame(&ctx, &BusFrame::new(0xC1, &[]), now);
        assert!(ctx.correlator.lock().pending(CommandType::Calibrate).is_some());
    }

    #[test]
    fn test_version_timeout_resends_then_gives_up() {
        let (ctx, events) = can_ctx();
        let t0 = Instant::now();
        ctx.outbound.lock().insert(
            CommandType::GetVersion,
            Outbound::Bus(teleop_protocol::get_version_frame()),
        );
        ctx.correlator.lock().register(CommandType::GetVersion, t0);

        run_timeouts(&ctx, t0 + Duration::from_millis(1000));
        run_timeouts(&ctx, t0 + Duration::from_millis(2000));
        assert!(events.try_recv().is_err());
        assert_eq!(ctx.metrics.snapshot().tx_frames, 2);

        run_timeouts(&ctx, t0 + Duration::from_millis(3000));
        match events.try_recv().unwrap() {
            Event::Error { kind, message } => {
                assert_eq!(kind, ErrorKind::Timeout);
                assert!(message.contains("get-version"), "{}", message);
            },
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
