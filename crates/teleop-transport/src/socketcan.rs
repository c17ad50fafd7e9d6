//! SocketCAN 适配器（仅 Linux）
//!
//! 波特率等接口配置由系统工具完成（`ip link set can0 type can bitrate 1000000`），
//! 不在应用层设置。
//!
//! 分离后的 RX/TX 通过 `try_clone()`（`dup()`）共享同一个打开文件描述，
//! 因此超时只使用 `SO_RCVTIMEO`/`SO_SNDTIMEO` 与 `poll`，不使用 `set_nonblocking()`。

use crate::{
    BusFrame, CanAdapter, CanRxAdapter, CanTxAdapter, SplittableAdapter, TransportDeviceError,
    TransportDeviceErrorKind, TransportError,
};
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use socketcan::{CanFrame, CanSocket, EmbeddedFrame, Frame, Socket, StandardId};
use std::ffi::CString;
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::io::AsRawFd;
use std::time::Duration;
use tracing::{trace, warn};

/// 默认读超时，保证读线程能及时检查退出标志
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(2);

/// 发送超时，避免总线错误时无限阻塞
const WRITE_TIMEOUT: Duration = Duration::from_millis(5);

/// 检查接口是否存在
fn check_interface_exists(interface: &str) -> Result<(), TransportError> {
    // IFNAMSIZ - 1
    const MAX_IFACE_NAME_LEN: usize = 15;
    if interface.len() > MAX_IFACE_NAME_LEN {
        return Err(TransportDeviceError::new(
            TransportDeviceErrorKind::UnsupportedConfig,
            format!(
                "Interface name '{}' is too long (max {} characters)",
                interface, MAX_IFACE_NAME_LEN
            ),
        )
        .into());
    }

    let c_iface = CString::new(interface).map_err(|e| {
        TransportDeviceError::new(
            TransportDeviceErrorKind::UnsupportedConfig,
            format!("Invalid interface name: {}", e),
        )
    })?;

    let ifindex = unsafe { libc::if_nametoindex(c_iface.as_ptr()) };
    if ifindex == 0 {
        return Err(TransportDeviceError::new(
            TransportDeviceErrorKind::NotFound,
            format!(
                "CAN interface '{}' does not exist ({}). Please create it first:\n  sudo ip link add dev {} type can",
                interface,
                std::io::Error::last_os_error(),
                interface
            ),
        )
        .into());
    }
    Ok(())
}

fn to_can_frame(frame: &BusFrame) -> Result<CanFrame, TransportError> {
    StandardId::new(frame.id)
        .and_then(|id| CanFrame::new(id, frame.data_slice()))
        .ok_or_else(|| {
            TransportDeviceError::new(
                TransportDeviceErrorKind::InvalidFrame,
                format!("Failed to create standard frame with ID 0x{:X}", frame.id),
            )
            .into()
        })
}

fn map_io_error(e: std::io::Error) -> TransportError {
    match e.kind() {
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => TransportError::Timeout,
        std::io::ErrorKind::NotFound => TransportDeviceError::new(
            TransportDeviceErrorKind::NoDevice,
            format!("CAN device gone: {}", e),
        )
        .into(),
        _ => TransportError::Io(e),
    }
}

/// 从 socket 读取一帧：先 `poll` 等待可读，错误帧被丢弃
fn read_data_frame(socket: &CanSocket, timeout: Duration) -> Result<BusFrame, TransportError> {
    let timeout_ms = timeout.as_millis().min(65535) as u16;
    let fd = unsafe { BorrowedFd::borrow_raw(socket.as_raw_fd()) };
    let mut fds = [PollFd::new(fd, PollFlags::POLLIN)];
    match poll(&mut fds, PollTimeout::from(timeout_ms)) {
        Ok(0) => return Err(TransportError::Timeout),
        Ok(_) => {},
        Err(nix::errno::Errno::EINTR) => return Err(TransportError::Timeout),
        Err(e) => {
            return Err(TransportError::Io(std::io::Error::other(format!(
                "poll failed: {}",
                e
            ))));
        },
    }

    let frame = socket.read_frame().map_err(map_io_error)?;
    match frame {
        CanFrame::Error(err) => {
            warn!("CAN error frame received: 0x{:X}", err.raw_id());
            Err(TransportError::Timeout)
        },
        frame if frame.is_extended() => {
            trace!("Ignoring extended CAN frame 0x{:X}", frame.raw_id());
            Err(TransportError::Timeout)
        },
        frame => {
            let bus_frame = BusFrame::new(frame.raw_id() as u16, frame.data());
            trace!(
                "RX: ID=0x{:X}, data={}",
                bus_frame.id,
                hex::encode_upper(bus_frame.data_slice())
            );
            Ok(bus_frame)
        },
    }
}

fn write_frame(socket: &CanSocket, frame: &BusFrame) -> Result<(), TransportError> {
    let can_frame = to_can_frame(frame)?;
    socket.write_frame(&can_frame).map_err(map_io_error)?;
    trace!(
        "TX: ID=0x{:X}, data={}",
        frame.id,
        hex::encode_upper(frame.data_slice())
    );
    Ok(())
}

/// SocketCAN 适配器
///
/// ```no_run
/// use teleop_transport::{BusFrame, CanAdapter, SocketCanAdapter};
///
/// let mut adapter = SocketCanAdapter::new("can0").unwrap();
/// adapter.send(BusFrame::new(0x64, &[0; 8])).unwrap();
/// let reply = adapter.receive();
/// ```
#[derive(Debug)]
pub struct SocketCanAdapter {
    socket: CanSocket,
    interface: String,
    read_timeout: Duration,
}

impl SocketCanAdapter {
    /// 打开 CAN 接口
    ///
    /// # 错误
    /// - `TransportError::Device(NotFound)`: 接口不存在
    /// - `TransportError::Device(Backend)`: 无法打开接口
    /// - `TransportError::Io`: 设置超时失败
    pub fn new(interface: impl Into<String>) -> Result<Self, TransportError> {
        let interface = interface.into();
        check_interface_exists(&interface)?;

        let socket = CanSocket::open(&interface).map_err(|e| {
            TransportDeviceError::new(
                TransportDeviceErrorKind::Backend,
                format!("Failed to open CAN interface '{}': {}", interface, e),
            )
        })?;

        // 禁用 loopback：本机发出的请求（0x64/0xC1 与应答同 ID）不应被自己读到
        let loopback_enabled: libc::c_int = 0;
        let ret = unsafe {
            libc::setsockopt(
                socket.as_raw_fd(),
                libc::SOL_CAN_RAW,
                libc::CAN_RAW_LOOPBACK,
                &loopback_enabled as *const _ as *const libc::c_void,
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            warn!(
                "Failed to disable CAN_RAW_LOOPBACK on '{}': {}",
                interface,
                std::io::Error::last_os_error()
            );
        }

        socket.set_read_timeout(DEFAULT_READ_TIMEOUT).map_err(TransportError::Io)?;
        socket.set_write_timeout(WRITE_TIMEOUT).map_err(TransportError::Io)?;

        trace!("SocketCAN interface '{}' opened", interface);

        Ok(Self {
            socket,
            interface,
            read_timeout: DEFAULT_READ_TIMEOUT,
        })
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }
}

impl Drop for SocketCanAdapter {
    fn drop(&mut self) {
        trace!("[Auto-Drop] SocketCAN interface '{}' closed", self.interface);
    }
}

impl CanAdapter for SocketCanAdapter {
    fn send(&mut self, frame: BusFrame) -> Result<(), TransportError> {
        write_frame(&self.socket, &frame)
    }

    fn receive(&mut self) -> Result<BusFrame, TransportError> {
        read_data_frame(&self.socket, self.read_timeout)
    }

    fn set_receive_timeout(&mut self, timeout: Duration) {
        self.read_timeout = timeout;
    }
}

impl SplittableAdapter for SocketCanAdapter {
    type RxAdapter = SocketCanRxAdapter;
    type TxAdapter = SocketCanTxAdapter;

    /// 分离为独立的 RX 和 TX 适配器（消费 `self`）
    fn split(self) -> Result<(Self::RxAdapter, Self::TxAdapter), TransportError> {
        let rx_socket = self.socket.as_fd().try_clone_to_owned().map(CanSocket::from).map_err(|e| {
            TransportError::Io(std::io::Error::other(format!(
                "Failed to clone SocketCAN socket for RX: {}",
                e
            )))
        })?;
        let tx_socket = self.socket.as_fd().try_clone_to_owned().map(CanSocket::from).map_err(|e| {
            TransportError::Io(std::io::Error::other(format!(
                "Failed to clone SocketCAN socket for TX: {}",
                e
            )))
        })?;

        trace!(
            "SocketCanAdapter split into RX and TX adapters (interface: {})",
            self.interface
        );

        Ok((
            SocketCanRxAdapter {
                socket: rx_socket,
                read_timeout: self.read_timeout,
            },
            SocketCanTxAdapter { socket: tx_socket },
        ))
    }
}

/// 只读适配器（读线程）
pub struct SocketCanRxAdapter {
    socket: CanSocket,
    read_timeout: Duration,
}

impl CanRxAdapter for SocketCanRxAdapter {
    fn receive(&mut self) -> Result<BusFrame, TransportError> {
        read_data_frame(&self.socket, self.read_timeout)
    }
}

/// 只写适配器（发送方共享）
pub struct SocketCanTxAdapter {
    socket: CanSocket,
}

impl CanTxAdapter for SocketCanTxAdapter {
    fn send(&mut self, frame: BusFrame) -> Result<(), TransportError> {
        write_frame(&self.socket, &frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_interface_is_not_found() {
        let err = SocketCanAdapter::new("nosuchcan42").unwrap_err();
        match err {
            TransportError::Device(e) => {
                assert_eq!(e.kind, TransportDeviceErrorKind::NotFound);
                assert!(e.is_fatal());
            },
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_interface_name_too_long() {
        let err = SocketCanAdapter::new("a_very_long_interface_name").unwrap_err();
        assert!(matches!(
            err,
            TransportError::Device(TransportDeviceError {
                kind: TransportDeviceErrorKind::UnsupportedConfig,
                ..
            })
        ));
    }

    #[test]
    fn test_to_can_frame_standard_id() {
        let frame = to_can_frame(&BusFrame::new(0x65, &[1, 2, 3])).unwrap();
        assert_eq!(frame.raw_id(), 0x65);
        assert_eq!(frame.data(), &[1, 2, 3]);
        assert!(!frame.is_extended());
    }

    #[test]
    fn test_to_can_frame_rejects_extended_id() {
        assert!(to_can_frame(&BusFrame::new(0x800, &[])).is_err());
    }

    #[test]
    fn test_map_io_error() {
        let err = map_io_error(std::io::Error::from(std::io::ErrorKind::WouldBlock));
        assert!(matches!(err, TransportError::Timeout));
        let err = map_io_error(std::io::Error::from(std::io::ErrorKind::NotFound));
        assert!(err.is_fatal());
    }
}
