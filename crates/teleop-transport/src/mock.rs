//! 内存 Mock 适配器
//!
//! 不依赖硬件，用于单元测试、集成测试以及 CLI 的 `--mock` 模式。
//!
//! 每个 Mock 适配器都带一个共享的 Handle：
//! - 向接收队列注入数据（模拟控制器发来的帧/字节）
//! - 检查已发送的数据
//! - 安装应答器（收到发送数据时自动生成回复）
//! - 模拟设备断开（之后读取返回致命错误）

use crate::{
    BusFrame, CanAdapter, CanRxAdapter, CanTxAdapter, SerialPort, SerialRxAdapter,
    SerialTxAdapter, SplittableAdapter, SplittableSerial, TransportDeviceError,
    TransportDeviceErrorKind, TransportError,
};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::trace;

/// 默认读超时（与真实适配器一致，保证读线程能及时检查退出标志）
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(2);

type CanResponder = Box<dyn FnMut(&BusFrame) -> Vec<BusFrame> + Send>;
type SerialResponder = Box<dyn FnMut(&[u8]) -> Vec<u8> + Send>;

fn disconnected_error() -> TransportError {
    TransportError::Device(TransportDeviceError::new(
        TransportDeviceErrorKind::NoDevice,
        "mock device disconnected",
    ))
}

/// 带条件变量的接收队列
struct Inbox<T> {
    queue: Mutex<VecDeque<T>>,
    ready: Condvar,
    closed: AtomicBool,
}

impl<T> Inbox<T> {
    fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            ready: Condvar::new(),
            closed: AtomicBool::new(false),
        }
    }

    fn push_all(&self, items: impl IntoIterator<Item = T>) {
        let mut queue = self.queue.lock();
        queue.extend(items);
        self.ready.notify_all();
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let _guard = self.queue.lock();
        self.ready.notify_all();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// 等待直到队列非空、关闭或超时，然后在持锁状态下执行 `take`
    fn wait_take<R>(
        &self,
        timeout: Duration,
        take: impl FnOnce(&mut VecDeque<T>) -> R,
    ) -> Result<R, TransportError> {
        let deadline = Instant::now() + timeout;
        let mut queue = self.queue.lock();
        loop {
            if self.is_closed() {
                return Err(disconnected_error());
            }
            if !queue.is_empty() {
                return Ok(take(&mut queue));
            }
            if self.ready.wait_until(&mut queue, deadline).timed_out() {
                if self.is_closed() {
                    return Err(disconnected_error());
                }
                if queue.is_empty() {
                    return Err(TransportError::Timeout);
                }
            }
        }
    }
}

// ============================================================================
// CAN
// ============================================================================

struct CanShared {
    inbox: Inbox<BusFrame>,
    sent: Mutex<Vec<BusFrame>>,
    responder: Mutex<Option<CanResponder>>,
}

impl CanShared {
    fn send(&self, frame: BusFrame) -> Result<(), TransportError> {
        if self.inbox.is_closed() {
            return Err(disconnected_error());
        }
        trace!("Mock CAN TX: ID=0x{:X}, data={}", frame.id, hex::encode_upper(frame.data_slice()));
        self.sent.lock().push(frame);

        let replies = match self.responder.lock().as_mut() {
            Some(responder) => responder(&frame),
            None => Vec::new(),
        };
        if !replies.is_empty() {
            self.inbox.push_all(replies);
        }
        Ok(())
    }

    fn receive(&self, timeout: Duration) -> Result<BusFrame, TransportError> {
        self.inbox
            .wait_take(timeout, |queue| queue.pop_front())?
            .ok_or(TransportError::Timeout)
    }
}

/// Mock CAN 适配器
///
/// ```rust
/// use teleop_transport::{CanAdapter, MockCanAdapter, BusFrame};
///
/// let mut adapter = MockCanAdapter::new();
/// let handle = adapter.handle();
/// handle.inject(BusFrame::new(0x64, &[0x72, 0x64]));
/// assert_eq!(adapter.receive().unwrap().id, 0x64);
/// ```
pub struct MockCanAdapter {
    shared: Arc<CanShared>,
    read_timeout: Duration,
}

impl MockCanAdapter {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(CanShared {
                inbox: Inbox::new(),
                sent: Mutex::new(Vec::new()),
                responder: Mutex::new(None),
            }),
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }

    /// 获取控制 Handle（可克隆，可跨线程）
    pub fn handle(&self) -> MockCanHandle {
        MockCanHandle {
            shared: self.shared.clone(),
        }
    }
}

impl Default for MockCanAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl CanAdapter for MockCanAdapter {
    fn send(&mut self, frame: BusFrame) -> Result<(), TransportError> {
        self.shared.send(frame)
    }

    fn receive(&mut self) -> Result<BusFrame, TransportError> {
        self.shared.receive(self.read_timeout)
    }

    fn set_receive_timeout(&mut self, timeout: Duration) {
        self.read_timeout = timeout;
    }
}

impl SplittableAdapter for MockCanAdapter {
    type RxAdapter = MockCanRx;
    type TxAdapter = MockCanTx;

    fn split(self) -> Result<(Self::RxAdapter, Self::TxAdapter), TransportError> {
        Ok((
            MockCanRx {
                shared: self.shared.clone(),
                read_timeout: self.read_timeout,
            },
            MockCanTx {
                shared: self.shared,
            },
        ))
    }
}

pub struct MockCanRx {
    shared: Arc<CanShared>,
    read_timeout: Duration,
}

impl CanRxAdapter for MockCanRx {
    fn receive(&mut self) -> Result<BusFrame, TransportError> {
        self.shared.receive(self.read_timeout)
    }
}

pub struct MockCanTx {
    shared: Arc<CanShared>,
}

impl CanTxAdapter for MockCanTx {
    fn send(&mut self, frame: BusFrame) -> Result<(), TransportError> {
        self.shared.send(frame)
    }
}

/// Mock CAN 控制 Handle
#[derive(Clone)]
pub struct MockCanHandle {
    shared: Arc<CanShared>,
}

impl MockCanHandle {
    /// 注入一帧到接收队列
    pub fn inject(&self, frame: BusFrame) {
        self.shared.inbox.push_all([frame]);
    }

    pub fn inject_all(&self, frames: impl IntoIterator<Item = BusFrame>) {
        self.shared.inbox.push_all(frames);
    }

    /// 已发送帧的快照
    pub fn sent_frames(&self) -> Vec<BusFrame> {
        self.shared.sent.lock().clone()
    }

    /// 取出并清空已发送帧
    pub fn take_sent(&self) -> Vec<BusFrame> {
        std::mem::take(&mut *self.shared.sent.lock())
    }

    /// 安装应答器：每次发送后调用，返回的帧进入接收队列
    pub fn set_responder(&self, responder: impl FnMut(&BusFrame) -> Vec<BusFrame> + Send + 'static) {
        *self.shared.responder.lock() = Some(Box::new(responder));
    }

    pub fn clear_responder(&self) {
        *self.shared.responder.lock() = None;
    }

    /// 模拟设备断开
    pub fn disconnect(&self) {
        self.shared.inbox.close();
    }

    pub fn pending(&self) -> usize {
        self.shared.inbox.queue.lock().len()
    }
}

// ============================================================================
// 串口
// ============================================================================

struct SerialShared {
    inbox: Inbox<u8>,
    writes: Mutex<Vec<Vec<u8>>>,
    responder: Mutex<Option<SerialResponder>>,
}

impl SerialShared {
    fn write_all(&self, data: &[u8]) -> Result<(), TransportError> {
        if self.inbox.is_closed() {
            return Err(disconnected_error());
        }
        trace!("Mock serial TX: {}", hex::encode_upper(data));
        self.writes.lock().push(data.to_vec());

        let reply = match self.responder.lock().as_mut() {
            Some(responder) => responder(data),
            None => Vec::new(),
        };
        if !reply.is_empty() {
            self.inbox.push_all(reply);
        }
        Ok(())
    }

    fn read(&self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.inbox.wait_take(timeout, |queue| {
            let n = queue.len().min(buf.len());
            for (slot, byte) in buf.iter_mut().zip(queue.drain(..n)) {
                *slot = byte;
            }
            n
        })
    }
}

/// Mock 串口
pub struct MockSerialPort {
    shared: Arc<SerialShared>,
    read_timeout: Duration,
}

impl MockSerialPort {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(SerialShared {
                inbox: Inbox::new(),
                writes: Mutex::new(Vec::new()),
                responder: Mutex::new(None),
            }),
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }

    pub fn handle(&self) -> MockSerialHandle {
        MockSerialHandle {
            shared: self.shared.clone(),
        }
    }
}

impl Default for MockSerialPort {
    fn default() -> Self {
        Self::new()
    }
}

impl SerialPort for MockSerialPort {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        self.shared.read(buf, self.read_timeout)
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.shared.write_all(data)
    }

    fn set_read_timeout(&mut self, timeout: Duration) {
        self.read_timeout = timeout;
    }
}

impl SplittableSerial for MockSerialPort {
    type RxAdapter = MockSerialRx;
    type TxAdapter = MockSerialTx;

    fn split(self) -> Result<(Self::RxAdapter, Self::TxAdapter), TransportError> {
        Ok((
            MockSerialRx {
                shared: self.shared.clone(),
                read_timeout: self.read_timeout,
            },
            MockSerialTx {
                shared: self.shared,
            },
        ))
    }
}

pub struct MockSerialRx {
    shared: Arc<SerialShared>,
    read_timeout: Duration,
}

impl SerialRxAdapter for MockSerialRx {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        self.shared.read(buf, self.read_timeout)
    }
}

pub struct MockSerialTx {
    shared: Arc<SerialShared>,
}

impl SerialTxAdapter for MockSerialTx {
    fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.shared.write_all(data)
    }
}

/// Mock 串口控制 Handle
#[derive(Clone)]
pub struct MockSerialHandle {
    shared: Arc<SerialShared>,
}

impl MockSerialHandle {
    /// 注入字节到接收流
    pub fn inject(&self, bytes: &[u8]) {
        self.shared.inbox.push_all(bytes.iter().copied());
    }

    /// 每次写入的数据（按写入顺序）
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.shared.writes.lock().clone()
    }

    pub fn take_writes(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut *self.shared.writes.lock())
    }

    /// 安装应答器：每次写入后调用，返回的字节追加到接收流
    pub fn set_responder(&self, responder: impl FnMut(&[u8]) -> Vec<u8> + Send + 'static) {
        *self.shared.responder.lock() = Some(Box::new(responder));
    }

    pub fn clear_responder(&self) {
        *self.shared.responder.lock() = None;
    }

    pub fn disconnect(&self) {
        self.shared.inbox.close();
    }

    pub fn pending(&self) -> usize {
        self.shared.inbox.queue.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_mock_can_receive_timeout_when_empty() {
        let mut adapter = MockCanAdapter::new();
        adapter.set_receive_timeout(Duration::from_millis(5));
        assert!(matches!(adapter.receive(), Err(TransportError::Timeout)));
        assert!(matches!(adapter.try_receive(), Ok(None)));
    }

    #[test]
    fn test_mock_can_inject_and_receive_in_order() {
        let mut adapter = MockCanAdapter::new();
        let handle = adapter.handle();
        handle.inject_all([BusFrame::new(0x65, &[1]), BusFrame::new(0x66, &[2])]);
        assert_eq!(handle.pending(), 2);
        assert_eq!(adapter.receive().unwrap().id, 0x65);
        assert_eq!(adapter.receive().unwrap().id, 0x66);
    }

    #[test]
    fn test_mock_can_responder() {
        let mut adapter = MockCanAdapter::new();
        let handle = adapter.handle();
        handle.set_responder(|frame| {
            if frame.id == 0x64 {
                vec![BusFrame::new(0x64, &[0x72, 0x64, 0x01, 0x00])]
            } else {
                Vec::new()
            }
        });

        adapter.send(BusFrame::new(0x64, &[0; 8])).unwrap();
        adapter.send(BusFrame::new(0x02, &[0; 8])).unwrap();
        assert_eq!(handle.sent_frames().len(), 2);

        let reply = adapter.receive().unwrap();
        assert_eq!(reply.data_slice(), &[0x72, 0x64, 0x01, 0x00]);
        assert!(matches!(adapter.receive(), Err(TransportError::Timeout)));

        assert_eq!(handle.take_sent().len(), 2);
        assert!(handle.sent_frames().is_empty());
    }

    #[test]
    fn test_mock_can_split_halves_share_state() {
        let adapter = MockCanAdapter::new();
        let handle = adapter.handle();
        let (mut rx, mut tx) = adapter.split().unwrap();

        tx.send(BusFrame::new(0x03, &[0; 8])).unwrap();
        assert_eq!(handle.sent_frames()[0].id, 0x03);

        let injector = handle.clone();
        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(1));
            injector.inject(BusFrame::new(0x67, &[0; 8]));
        });
        // 读超时很短，循环等待注入
        let frame = loop {
            match rx.receive() {
                Ok(frame) => break frame,
                Err(TransportError::Timeout) => continue,
                Err(e) => panic!("unexpected error: {e}"),
            }
        };
        t.join().unwrap();
        assert_eq!(frame.id, 0x67);
    }

    #[test]
    fn test_mock_can_disconnect_is_fatal() {
        let mut adapter = MockCanAdapter::new();
        let handle = adapter.handle();
        handle.disconnect();
        let err = adapter.receive().unwrap_err();
        assert!(err.is_fatal());
        assert!(adapter.send(BusFrame::new(0x02, &[])).is_err());
    }

    #[test]
    fn test_mock_serial_read_partial() {
        let mut port = MockSerialPort::new();
        let handle = port.handle();
        handle.inject(&[1, 2, 3, 4, 5]);

        let mut buf = [0u8; 3];
        assert_eq!(port.read(&mut buf).unwrap(), 3);
        assert_eq!(buf, [1, 2, 3]);
        assert_eq!(port.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], &[4, 5]);
        assert!(matches!(port.read(&mut buf), Err(TransportError::Timeout)));
    }

    #[test]
    fn test_mock_serial_responder_and_writes() {
        let port = MockSerialPort::new();
        let handle = port.handle();
        handle.set_responder(|data| data.iter().rev().copied().collect());

        let (mut rx, mut tx) = port.split().unwrap();
        tx.write_all(&[0xAA, 0x14]).unwrap();
        assert_eq!(handle.writes(), vec![vec![0xAA, 0x14]]);

        let mut buf = [0u8; 8];
        let n = rx.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], &[0x14, 0xAA]);
    }

    #[test]
    fn test_mock_serial_disconnect() {
        let mut port = MockSerialPort::new();
        port.handle().disconnect();
        let mut buf = [0u8; 4];
        assert!(port.read(&mut buf).unwrap_err().is_fatal());
    }
}
