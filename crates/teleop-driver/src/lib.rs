//! # Teleop Driver
//!
//! 会话层：在传输适配器之上运行读线程与调度线程，完成
//! - 串口字节流拆帧、校验与分发
//! - CAN 臂数据分片重组（[`ArmFragmentCache`]）
//! - 请求/应答关联与有限次重试（[`Correlator`]）
//! - 连接状态管理与有序事件通道（[`Event`]）
//!
//! ```no_run
//! use teleop_driver::{Event, SessionBuilder};
//!
//! let session = SessionBuilder::new().device("/dev/ttyUSB0").build()?;
//! session.enable_stream()?;
//! for event in session.events() {
//!     if let Event::Telemetry { arm, values, .. } = event {
//!         println!("{arm}: {values:?}");
//!     }
//! }
//! # Ok::<(), teleop_driver::DriverError>(())
//! ```

mod builder;
pub mod cache;
mod context;
pub mod correlator;
mod error;
pub mod event;
mod fps_stats;
pub mod metrics;
mod pipeline;
mod session;

pub use builder::{
    DEFAULT_BAUD_RATE, DEFAULT_CAN_INTERFACE, SessionBuilder, SessionConfig, TransportKind,
};
pub use cache::{ArmFragmentCache, CacheSnapshot, SharedFragmentCache};
pub use correlator::{
    CommandKind, Correlator, CorrelatorStats, PendingRequest, Resolution, RetryPolicies,
    RetryPolicy, TimeoutAction,
};
pub use error::{CacheError, DriverError};
pub use event::{ConnectionState, ErrorKind, Event, TelemetrySource};
pub use fps_stats::{FpsCounts, FpsResult, FpsStatistics};
pub use metrics::{MetricsSnapshot, SessionMetrics};
pub use session::Session;
