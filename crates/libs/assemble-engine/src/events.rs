//! Events posted to the embedding application: sub-components push an
//! [`EngineEvent`] onto an unbounded channel the application owns the
//! receiving half of, rather than invoking a callback directly.

use crate::error::EngineError;
use crate::protocol::{PublicKey, Uri};

#[derive(Debug, Clone)]
pub enum EngineEvent {
    PutDone {
        uri: Uri,
        error: Option<EngineError>,
    },
    GetDone {
        sender: PublicKey,
        uri: Uri,
        timestamp: i64,
        payload: Vec<u8>,
        error: Option<EngineError>,
    },
    RelayMessageDone {
        receiver: PublicKey,
        error: Option<EngineError>,
    },
    RelayUriDone {
        receiver: PublicKey,
        uri: Uri,
        timestamp: i64,
        error: Option<EngineError>,
    },
    IncomingRelayUri {
        sender: PublicKey,
        uri: Uri,
        timestamp: i64,
    },
    IncomingRelayMessage {
        from: PublicKey,
        payload: Vec<u8>,
    },
}

pub type EventSink = tokio::sync::mpsc::UnboundedSender<EngineEvent>;
