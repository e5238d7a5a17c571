//! Blob assemble/transport engine over a Kademlia-style DHT.
//!
//! Fragments blobs into DHT-sized segments, builds an index record, and
//! drives concurrent puts with per-segment retry bookkeeping; fetches the
//! index, fans out segment gets, and reassembles; multiplexes all outgoing
//! DHT work through a single rate-limited invocation queue; demultiplexes
//! incoming relay payloads into either a URI-get pipeline or a
//! message-delivery event.
//!
//! The routing table, RPC wire format, and network transport live on the
//! other side of [`dht::DhtLayer`] — this crate only drives that trait.

pub mod assembler;
pub mod config;
pub mod congestion;
pub mod context;
pub mod dht;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod getter;
pub mod protocol;
pub mod putter;
pub mod relayer;
pub mod rpc_params;
pub mod transporter;

pub use assembler::Assembler;
pub use config::{ConfigError, EngineConfig};
pub use dht::DhtLayer;
pub use error::EngineError;
pub use events::{EngineEvent, EventSink};
pub use protocol::{PublicKey, Uri};
