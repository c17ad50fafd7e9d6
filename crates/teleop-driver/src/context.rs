//! 会话共享上下文
//!
//! 读线程、调度线程与发送方共享的状态。所有锁只覆盖一次操作。

use arc_swap::ArcSwap;
use crossbeam_channel::Sender;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use teleop_protocol::BusFrame;
use teleop_transport::{CanTxAdapter, SerialTxAdapter, TransportError};
use tracing::{error, info, trace};

use crate::builder::{SessionConfig, TransportKind};
use crate::cache::SharedFragmentCache;
use crate::correlator::{CommandKind, Correlator};
use crate::event::{ConnectionState, ErrorKind, Event};
use crate::fps_stats::FpsStatistics;
use crate::metrics::SessionMetrics;

/// 发送半（发送方与调度线程共享，外部加锁）
pub(crate) enum TxHalf {
    Serial(Box<dyn SerialTxAdapter + Send>),
    Can(Box<dyn CanTxAdapter + Send>),
}

/// 一次待发送的请求
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Outbound {
    Serial(Vec<u8>),
    Bus(BusFrame),
}

impl Outbound {
    /// 十六进制日志格式
    pub fn to_hex(&self) -> String {
        match self {
            Outbound::Serial(bytes) => hex::encode_upper(bytes),
            Outbound::Bus(frame) => format!(
                "ID=0x{:03X} {}",
                frame.id,
                hex::encode_upper(frame.data_slice())
            ),
        }
    }
}

pub(crate) struct SessionContext {
    pub transport: TransportKind,
    pub config: SessionConfig,
    pub events: Sender<Event>,
    pub state: ArcSwap<ConnectionState>,
    pub is_running: AtomicBool,
    pub correlator: Mutex<Correlator>,
    /// 每种命令最近一次发送的内容，供重发使用
    pub outbound: Mutex<HashMap<CommandKind, Outbound>>,
    pub cache: SharedFragmentCache,
    pub fps_stats: ArcSwap<FpsStatistics>,
    pub metrics: SessionMetrics,
    pub tx: Mutex<Option<TxHalf>>,
}

impl SessionContext {
    pub fn new(
        transport: TransportKind,
        config: SessionConfig,
        events: Sender<Event>,
        tx: TxHalf,
    ) -> Self {
        let correlator = Correlator::new(transport, config.retry);
        Self {
            transport,
            config,
            events,
            state: ArcSwap::from_pointee(ConnectionState::Disconnected),
            is_running: AtomicBool::new(true),
            correlator: Mutex::new(correlator),
            outbound: Mutex::new(HashMap::new()),
            cache: SharedFragmentCache::new(),
            fps_stats: ArcSwap::from_pointee(FpsStatistics::new()),
            metrics: SessionMetrics::new(),
            tx: Mutex::new(Some(tx)),
        }
    }

    /// 发送事件；使用方已丢弃接收端时静默忽略
    pub fn emit(&self, event: Event) {
        let _ = self.events.send(event);
    }

    pub fn state(&self) -> ConnectionState {
        **self.state.load()
    }

    /// 切换连接状态，仅在状态实际变化时发出事件
    pub fn set_state(&self, state: ConnectionState) -> bool {
        let previous = self.state.swap(Arc::new(state));
        if *previous == state {
            return false;
        }
        info!("Connection state: {} -> {}", previous, state);
        self.emit(Event::ConnectionChanged(state));
        true
    }

    pub fn is_running(&self) -> bool {
        // Acquire: 看到 false 时必须同时看到关闭前的写入
        self.is_running.load(Ordering::Acquire)
    }

    /// 致命传输错误：停止所有线程并转为 Disconnected
    pub fn fail(&self, message: impl Into<String>) {
        let message = message.into();
        error!("Fatal transport error: {}", message);
        self.is_running.store(false, Ordering::Release);
        self.emit(Event::error(ErrorKind::Transport, message));
        self.correlator.lock().cancel_all();
        self.set_state(ConnectionState::Disconnected);
    }

    /// 经发送半写出一次请求
    pub fn transmit(&self, outbound: &Outbound) -> Result<(), TransportError> {
        let result = {
            let mut tx = self.tx.lock();
            match (tx.as_mut(), outbound) {
                (Some(TxHalf::Serial(port)), Outbound::Serial(bytes)) => port.write_all(bytes),
                (Some(TxHalf::Can(can)), Outbound::Bus(frame)) => can.send(*frame),
                (Some(_), _) => Err(TransportError::Device(
                    format!("request does not match the {} transport", self.transport).into(),
                )),
                (None, _) => Err(TransportError::Closed),
            }
        };

        match result {
            Ok(()) => {
                self.metrics.tx_frames.fetch_add(1, Ordering::Relaxed);
                trace!("TX {}", outbound.to_hex());
                Ok(())
            },
            Err(e) => {
                self.metrics.device_errors.fetch_add(1, Ordering::Relaxed);
                if e.is_fatal() && !matches!(e, TransportError::Closed) {
                    self.fail(format!("write failed: {}", e));
                }
                Err(e)
            },
        }
    }

    /// 重发某命令最近一次的请求
    pub fn retransmit(&self, kind: CommandKind) -> Result<(), TransportError> {
        let outbound = self.outbound.lock().get(&kind).cloned();
        match outbound {
            Some(outbound) => self.transmit(&outbound),
            None => Ok(()),
        }
    }
}
