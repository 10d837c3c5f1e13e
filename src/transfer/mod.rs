//! Video transfer: packetization, staging, drop policies and the session worker

mod nodes;
mod packet;
mod reassembly;
mod session;
mod stats;
mod transport;

pub use nodes::{NodeCounts, RetainGuard};
pub use packet::{packet_count_for, Packet, PacketHeader, Packetizer, Packets};
pub use reassembly::{ReassemblyStats, Reassembler};
pub use session::{SessionSink, TransferMessage, TransferSession, TransferSetup};
pub use stats::{TransferStats, TransferStatsSnapshot};
pub use transport::{send_with_retry, RetryPolicy, Transport};
