//! hk-sync: moving profiles between client and server
//!
//! - `link`: the transport seam (`PeerLink`) plus an in-memory implementation
//! - `context`: per-instance transfer settings, id counter, upload gate
//! - `sender`: backpressured outbound transfer state machine and its drivers
//! - `reassembly`: inbound fragment cache with TTL eviction
//! - `envelope`: length-delimited stream framing for socket transports
//! - `server`: login handshake, profile storage, backup verification
//! - `client`: profile reception, emergency backups, save decisions
//! - `snapshot`: last-known-good inventory snapshots

pub mod client;
pub mod context;
pub mod envelope;
pub mod link;
pub mod reassembly;
pub mod sender;
pub mod server;
pub mod snapshot;

pub use client::{ClientSettings, ProfileClient, ProfileOutcome};
pub use context::{InFlight, InFlightGuard, TransferContext, TransferSettings};
pub use envelope::{frame_codec, Envelope, EnvelopeCodec};
pub use link::{MemoryLink, PeerLink};
pub use reassembly::{Assembly, Reassembler};
pub use sender::{send_payload, send_payload_blocking, OutboundTransfer, SendOutcome, SendStep};
pub use server::{ProfileServer, ServerAction};
pub use snapshot::{PlayerSnapshot, SnapshotRing};
