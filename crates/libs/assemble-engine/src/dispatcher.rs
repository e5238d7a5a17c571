//! Relay dispatcher: the Transporter's single registered `RelayListener`.
//! Decodes every incoming relay frame and routes it to the Getter (a URI
//! announcement) or the Relayer (an opaque message); unknown or malformed
//! frames are logged and dropped.

use async_trait::async_trait;

use crate::getter::Getter;
use crate::protocol::{Frame, PublicKey};
use crate::relayer::Relayer;
use crate::transporter::RelayListener;

pub struct RelayDispatcher {
    getter: Getter,
    relayer: Relayer,
}

impl RelayDispatcher {
    pub fn new(getter: Getter, relayer: Relayer) -> Self {
        Self { getter, relayer }
    }
}

#[async_trait]
impl RelayListener for RelayDispatcher {
    async fn on_incoming_relay(&self, from: PublicKey, payload: Vec<u8>) {
        match Frame::decode(&payload) {
            Ok(Frame::RelayUri { sender, uri, timestamp }) => {
                self.getter.handle_incoming_uri(sender, uri, timestamp);
            }
            Ok(Frame::RelayMsg { payload }) => {
                self.relayer.handle_incoming_message(from, payload);
            }
            Ok(other) => {
                log::debug!("relay dispatcher: dropping non-relay frame kind from {}", hex::encode(from));
                let _ = other;
            }
            Err(err) => {
                log::debug!("relay dispatcher: dropping malformed relay frame from {}: {err}", hex::encode(from));
            }
        }
    }
}
