//! ferry-services: everything that moves bytes between a local file and
//! a remote endpoint: the transfer engine and its collaborators.

pub mod conflict;
pub mod coordinator;
pub mod dependency;
pub mod progress;
pub mod protocol;
pub mod rate_limit;
pub mod schedule;
pub mod stream;
pub mod transport;

pub use conflict::ConflictPolicy;
pub use coordinator::{TransferEngine, TransferRequest, TransferResult, TransferSummary};
pub use dependency::DependencyTable;
pub use progress::{ProgressHook, TransferEvent, TransferProgress};
pub use protocol::{ProtocolHandler, ProtocolRequest, ProtocolResponse, ProtocolTable};
pub use rate_limit::RateLimiter;
pub use schedule::{Clock, ManualClock, MonotonicClock, SharedQueue, TaskId, TransferJob, TransferQueue};
pub use transport::{Dialer, MemoryDialer, RemoteObject, TcpDialer};
