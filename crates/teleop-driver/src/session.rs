//! 会话：连接生命周期与发送 API

use crossbeam_channel::Receiver;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::{JoinHandle, spawn};
use std::time::{Duration, Instant};
use teleop_protocol::{
    Arm, JointSetpoint, arm_request_frame, calibrate_command, calibrate_frame, custom_frame,
    disable_stream_command, enable_stream_command, get_arm_data_command, get_version_command,
    get_version_frame, set_params_command, torque_control_command,
};
use teleop_transport::{SplittableAdapter, SplittableSerial};
use tracing::{debug, error, info};

use crate::builder::{SessionConfig, TransportKind};
use crate::cache::CacheSnapshot;
use crate::context::{Outbound, SessionContext, TxHalf};
use crate::correlator::{CommandKind, CorrelatorStats};
use crate::error::DriverError;
use crate::event::{ConnectionState, Event};
use crate::fps_stats::{FpsCounts, FpsResult, FpsStatistics};
use crate::metrics::MetricsSnapshot;
use crate::pipeline;

/// 带超时的 join
///
/// 标准库的 `JoinHandle` 没有超时 join，这里由看门狗线程代为 join 并通过通道回报。
trait JoinTimeout {
    fn join_timeout(self, timeout: Duration) -> std::thread::Result<()>;
}

impl<T: Send + 'static> JoinTimeout for JoinHandle<T> {
    fn join_timeout(self, timeout: Duration) -> std::thread::Result<()> {
        use std::sync::mpsc;

        let (tx, rx) = mpsc::channel();
        spawn(move || {
            let result = self.join();
            // 接收方可能已超时离开
            let _ = tx.send(result);
        });

        match rx.recv_timeout(timeout) {
            Ok(join_result) => join_result.map(|_| ()),
            // 超时：看门狗线程继续等待，进程退出时由系统回收
            Err(mpsc::RecvTimeoutError::Timeout) => Err(Box::new(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "Thread join timeout",
            ))),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(Box::new(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "Thread panicked during join",
            ))),
        }
    }
}

fn spawn_named<F>(name: &str, f: F) -> Result<JoinHandle<()>, DriverError>
where
    F: FnOnce() + Send + 'static,
{
    std::thread::Builder::new()
        .name(name.to_string())
        .spawn(f)
        .map_err(|e| DriverError::IoThread(format!("failed to spawn {}: {}", name, e)))
}

/// 遥操臂会话（对外 API）
///
/// 每个会话包含一个读线程与一个调度线程；发送在调用方线程执行，
/// 发送半由互斥锁保护。所有解码结果通过 [`Session::events`] 的有序通道送出。
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use teleop_driver::{Event, Session, SessionConfig};
/// use teleop_protocol::{BusFrame, get_version_frame};
/// use teleop_transport::MockCanAdapter;
///
/// let adapter = MockCanAdapter::new();
/// let handle = adapter.handle();
/// handle.set_responder(|frame| {
///     if frame.id == get_version_frame().id {
///         vec![BusFrame::new(0x64, &[0x72, 0x64, 0x01, 0x00])]
///     } else {
///         Vec::new()
///     }
/// });
///
/// let session = Session::open_can(adapter, SessionConfig::default()).unwrap();
/// let events = session.events();
/// session.request_version().unwrap();
///
/// let version = events
///     .iter()
///     .find_map(|event| event.version_info())
///     .unwrap();
/// assert_eq!(version.to_string(), "hardware V1.1.4, software V1.0.0");
/// ```
pub struct Session {
    ctx: Arc<SessionContext>,
    events: Receiver<Event>,
    rx_thread: Option<JoinHandle<()>>,
    scheduler_thread: Option<JoinHandle<()>>,
}

impl Session {
    /// 在串口上打开会话
    ///
    /// 端口被分离为读半（读线程独占）和写半（发送方共享）。
    pub fn open_serial<S>(mut port: S, config: SessionConfig) -> Result<Self, DriverError>
    where
        S: SplittableSerial + Send + 'static,
        S::RxAdapter: Send + 'static,
        S::TxAdapter: Send + 'static,
    {
        config.validate()?;
        port.set_read_timeout(config.serial_read_timeout());
        let (rx, tx) = port.split()?;

        Self::start(
            TransportKind::Serial,
            config,
            TxHalf::Serial(Box::new(tx)),
            move |ctx| spawn_named("teleop-serial-rx", move || pipeline::serial_rx_loop(rx, ctx)),
        )
    }

    /// 在 CAN 总线上打开会话
    pub fn open_can<C>(mut adapter: C, config: SessionConfig) -> Result<Self, DriverError>
    where
        C: SplittableAdapter + Send + 'static,
        C::RxAdapter: Send + 'static,
        C::TxAdapter: Send + 'static,
    {
        config.validate()?;
        adapter.set_receive_timeout(config.can_receive_timeout());
        let (rx, tx) = adapter.split()?;

        Self::start(
            TransportKind::Can,
            config,
            TxHalf::Can(Box::new(tx)),
            move |ctx| spawn_named("teleop-can-rx", move || pipeline::can_rx_loop(rx, ctx)),
        )
    }

    fn start(
        transport: TransportKind,
        config: SessionConfig,
        tx: TxHalf,
        spawn_reader: impl FnOnce(Arc<SessionContext>) -> Result<JoinHandle<()>, DriverError>,
    ) -> Result<Self, DriverError> {
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        let ctx = Arc::new(SessionContext::new(transport, config, events_tx, tx));
        ctx.set_state(ConnectionState::Connecting);

        let rx_thread = match spawn_reader(ctx.clone()) {
            Ok(handle) => handle,
            Err(e) => {
                ctx.is_running.store(false, Ordering::Release);
                ctx.set_state(ConnectionState::Disconnected);
                return Err(e);
            },
        };

        let scheduler_ctx = ctx.clone();
        let scheduler_thread =
            match spawn_named("teleop-scheduler", move || pipeline::scheduler_loop(scheduler_ctx)) {
                Ok(handle) => handle,
                Err(e) => {
                    ctx.is_running.store(false, Ordering::Release);
                    if let Err(_e) = rx_thread.join_timeout(ctx.config.join_timeout()) {
                        error!("RX thread did not exit after a failed start");
                    }
                    ctx.set_state(ConnectionState::Disconnected);
                    return Err(e);
                },
            };

        ctx.set_state(ConnectionState::Connected);
        info!("{} session started", transport);

        Ok(Self {
            ctx,
            events: events_rx,
            rx_thread: Some(rx_thread),
            scheduler_thread: Some(scheduler_thread),
        })
    }

    // ------------------------------------------------------------------
    // 状态查询
    // ------------------------------------------------------------------

    /// 事件接收端（与会话共享同一队列）
    pub fn events(&self) -> Receiver<Event> {
        self.events.clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.ctx.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn transport(&self) -> TransportKind {
        self.ctx.transport
    }

    pub fn config(&self) -> &SessionConfig {
        &self.ctx.config
    }

    /// 读线程与调度线程是否存活
    pub fn check_health(&self) -> (bool, bool) {
        let rx_alive = self.rx_thread.as_ref().is_some_and(|h| !h.is_finished());
        let scheduler_alive = self
            .scheduler_thread
            .as_ref()
            .is_some_and(|h| !h.is_finished());
        (rx_alive, scheduler_alive)
    }

    pub fn fps(&self) -> FpsResult {
        self.ctx.fps_stats.load().calculate_fps()
    }

    pub fn fps_counts(&self) -> FpsCounts {
        self.ctx.fps_stats.load().get_counts()
    }

    /// 开始新的统计窗口
    pub fn reset_fps_stats(&self) {
        self.ctx.fps_stats.store(Arc::new(FpsStatistics::new()));
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.ctx.metrics.snapshot()
    }

    pub fn correlator_stats(&self) -> CorrelatorStats {
        self.ctx.correlator.lock().stats()
    }

    pub fn cache_snapshot(&self) -> CacheSnapshot {
        self.ctx.cache.snapshot()
    }

    // ------------------------------------------------------------------
    // 发送
    // ------------------------------------------------------------------

    fn ensure_connected(&self) -> Result<(), DriverError> {
        if self.ctx.state() == ConnectionState::Connected {
            Ok(())
        } else {
            Err(DriverError::NotConnected)
        }
    }

    fn unsupported(&self, operation: &'static str) -> DriverError {
        DriverError::Unsupported {
            operation,
            transport: self.ctx.transport,
        }
    }

    /// 发送需要应答的请求：先登记再发送，避免快速应答找不到待应答项
    fn send_tracked(&self, kind: CommandKind, outbound: Outbound) -> Result<(), DriverError> {
        self.ensure_connected()?;
        self.ctx.outbound.lock().insert(kind, outbound.clone());
        self.ctx.correlator.lock().register(kind, Instant::now());

        if let Err(e) = self.ctx.transmit(&outbound) {
            self.ctx.correlator.lock().cancel(kind);
            return Err(e.into());
        }
        debug!("Sent {}", kind);
        Ok(())
    }

    fn send_untracked(&self, outbound: Outbound) -> Result<(), DriverError> {
        self.ensure_connected()?;
        self.ctx.transmit(&outbound)?;
        Ok(())
    }

    /// 读取固件版本（按策略重试，默认共 3 次）
    pub fn request_version(&self) -> Result<(), DriverError> {
        let outbound = match self.ctx.transport {
            TransportKind::Serial => Outbound::Serial(get_version_command().to_vec()),
            TransportKind::Can => Outbound::Bus(get_version_frame()),
        };
        self.send_tracked(CommandKind::GetVersion, outbound)
    }

    /// 零点标定
    pub fn calibrate(&self) -> Result<(), DriverError> {
        let outbound = match self.ctx.transport {
            TransportKind::Serial => Outbound::Serial(calibrate_command().to_vec()),
            TransportKind::Can => Outbound::Bus(calibrate_frame()),
        };
        self.send_tracked(CommandKind::Calibrate, outbound)
    }

    /// 请求臂数据
    ///
    /// - CAN：先清空该臂的分片缓存（`Both` 清空两侧），再发送请求帧；
    ///   应答分片作为遥测数据到达，不做应答关联
    /// - 串口：发送 GET_ARM_DATA，应答总是包含两臂
    pub fn request_arm_data(&self, arm: Arm) -> Result<(), DriverError> {
        self.ensure_connected()?;
        {
            let stats = self.ctx.fps_stats.load();
            let counter = match arm {
                Arm::Left => &stats.left_requests,
                Arm::Right => &stats.right_requests,
                Arm::Both => &stats.both_requests,
            };
            counter.fetch_add(1, Ordering::Relaxed);
        }

        match self.ctx.transport {
            TransportKind::Can => {
                self.ctx.cache.clear_arm(arm);
                self.send_untracked(Outbound::Bus(arm_request_frame(arm)))
            },
            TransportKind::Serial => self.send_tracked(
                CommandKind::GetArmData,
                Outbound::Serial(get_arm_data_command().to_vec()),
            ),
        }
    }

    /// 启用数据推送（仅串口）
    pub fn enable_stream(&self) -> Result<(), DriverError> {
        if self.ctx.transport != TransportKind::Serial {
            return Err(self.unsupported("enable-stream"));
        }
        self.send_tracked(
            CommandKind::EnableStream,
            Outbound::Serial(enable_stream_command().to_vec()),
        )
    }

    /// 禁用数据推送（仅串口）
    pub fn disable_stream(&self) -> Result<(), DriverError> {
        if self.ctx.transport != TransportKind::Serial {
            return Err(self.unsupported("disable-stream"));
        }
        self.send_tracked(
            CommandKind::DisableStream,
            Outbound::Serial(disable_stream_command().to_vec()),
        )
    }

    /// 单关节扭矩控制（仅串口）
    pub fn torque_control(&self, setpoint: &JointSetpoint) -> Result<(), DriverError> {
        if self.ctx.transport != TransportKind::Serial {
            return Err(self.unsupported("torque-control"));
        }
        self.send_tracked(
            CommandKind::TorqueControl,
            Outbound::Serial(torque_control_command(setpoint)),
        )
    }

    /// 单关节参数设置（仅串口）
    pub fn set_params(&self, setpoint: &JointSetpoint) -> Result<(), DriverError> {
        if self.ctx.transport != TransportKind::Serial {
            return Err(self.unsupported("set-params"));
        }
        self.send_tracked(
            CommandKind::SetParams,
            Outbound::Serial(set_params_command(setpoint)),
        )
    }

    /// 发送任意标准帧（仅 CAN）
    pub fn send_custom_frame(&self, id: u16, data: &[u8]) -> Result<(), DriverError> {
        if self.ctx.transport != TransportKind::Can {
            return Err(self.unsupported("custom-frame"));
        }
        let frame = custom_frame(id, data)?;
        self.send_untracked(Outbound::Bus(frame))
    }

    // ------------------------------------------------------------------
    // 关闭
    // ------------------------------------------------------------------

    /// 关闭会话
    ///
    /// 清除运行标志，有限时间内等待线程退出；无论线程是否按时退出，
    /// 发送半都会被释放，会话转为 Disconnected。可重复调用。
    pub fn close(&mut self) {
        // Release: 之前的写入对看到 false 的线程可见
        self.ctx.is_running.store(false, Ordering::Release);

        let join_timeout = self.ctx.config.join_timeout();

        if let Some(handle) = self.rx_thread.take()
            && let Err(_e) = handle.join_timeout(join_timeout)
        {
            error!(
                "RX thread panicked or failed to shut down within {:?}",
                join_timeout
            );
        }

        if let Some(handle) = self.scheduler_thread.take()
            && let Err(_e) = handle.join_timeout(join_timeout)
        {
            error!(
                "Scheduler thread panicked or failed to shut down within {:?}",
                join_timeout
            );
        }

        if self.ctx.tx.lock().take().is_some() {
            debug!("Transport TX half released");
        }
        self.ctx.correlator.lock().cancel_all();
        self.ctx.cache.clear_all();
        self.ctx.set_state(ConnectionState::Disconnected);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("transport", &self.ctx.transport)
            .field("state", &self.ctx.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use teleop_transport::{MockCanAdapter, MockSerialPort};

    fn drain(events: &Receiver<Event>) -> Vec<Event> {
        events.try_iter().collect()
    }

    #[test]
    fn test_open_emits_connecting_then_connected() {
        let session = Session::open_serial(MockSerialPort::new(), SessionConfig::default()).unwrap();
        assert_eq!(session.state(), ConnectionState::Connected);
        assert_eq!(
            drain(&session.events()),
            vec![
                Event::ConnectionChanged(ConnectionState::Connecting),
                Event::ConnectionChanged(ConnectionState::Connected),
            ]
        );
        assert_eq!(session.check_health(), (true, true));
    }

    #[test]
    fn test_unsupported_operations() {
        let session = Session::open_can(MockCanAdapter::new(), SessionConfig::default()).unwrap();
        assert!(matches!(
            session.enable_stream(),
            Err(DriverError::Unsupported {
                transport: TransportKind::Can,
                ..
            })
        ));
        assert!(matches!(
            session.torque_control(&JointSetpoint::default()),
            Err(DriverError::Unsupported { .. })
        ));

        let session = Session::open_serial(MockSerialPort::new(), SessionConfig::default()).unwrap();
        assert!(matches!(
            session.send_custom_frame(0x123, &[1]),
            Err(DriverError::Unsupported { .. })
        ));
    }

    #[test]
    fn test_send_after_close_fails() {
        let mut session =
            Session::open_serial(MockSerialPort::new(), SessionConfig::default()).unwrap();
        session.close();
        assert!(matches!(
            session.request_version(),
            Err(DriverError::NotConnected)
        ));
        assert_eq!(session.check_health(), (false, false));
    }

    #[test]
    fn test_can_arm_request_clears_cache() {
        let adapter = MockCanAdapter::new();
        let handle = adapter.handle();
        let session = Session::open_can(adapter, SessionConfig::default()).unwrap();

        session.request_arm_data(Arm::Both).unwrap();
        let sent = handle.take_sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].id, 0x04);
        assert_eq!(sent[0].data_slice(), &[0u8; 8]);
        assert_eq!(session.fps_counts().both_requests, 1);
        assert_eq!(session.correlator_stats().sent, 0);

        session.reset_fps_stats();
        assert_eq!(session.fps_counts().both_requests, 0);
    }

    #[test]
    fn test_custom_frame_validation() {
        let adapter = MockCanAdapter::new();
        let handle = adapter.handle();
        let session = Session::open_can(adapter, SessionConfig::default()).unwrap();

        assert!(matches!(
            session.send_custom_frame(0x800, &[1]),
            Err(DriverError::Protocol(_))
        ));
        session.send_custom_frame(0x123, &[0xDE, 0xAD]).unwrap();
        let sent = handle.take_sent();
        assert_eq!(sent[0].id, 0x123);
        assert_eq!(sent[0].data_slice(), &[0xDE, 0xAD]);
    }

    #[test]
    fn test_torque_command_bytes() {
        let port = MockSerialPort::new();
        let handle = port.handle();
        let session = Session::open_serial(port, SessionConfig::default()).unwrap();

        let setpoint = JointSetpoint {
            id: 2,
            position: 90.0,
            speed: 10.0,
            acceleration: 5.0,
            torque: 1.0,
        };
        session.torque_control(&setpoint).unwrap();

        let writes = handle.take_writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0], torque_control_command(&setpoint));
        assert!(session.correlator_stats().sent == 1);
    }
}
