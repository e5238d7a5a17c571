//! Static RPC parameter table: logical operation kind → DHT invocation knobs.
//!
//! These four numbers are forwarded verbatim to the kademlia layer; the
//! engine never interprets them itself.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RpcParams {
    pub invoke_branch: i8,
    pub invoke_window: i8,
    pub invoke_limit: i8,
    pub hit_limit: i8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DhtRpcKind {
    Put,
    Get,
    Relay,
}

impl DhtRpcKind {
    pub fn params(self) -> RpcParams {
        match self {
            DhtRpcKind::Put => RpcParams { invoke_branch: 1, invoke_window: 8, invoke_limit: 16, hit_limit: 0 },
            DhtRpcKind::Get => RpcParams { invoke_branch: 1, invoke_window: 8, invoke_limit: 16, hit_limit: 0 },
            DhtRpcKind::Relay => {
                RpcParams { invoke_branch: 1, invoke_window: 8, invoke_limit: 16, hit_limit: 3 }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_and_get_share_parameters() {
        assert_eq!(DhtRpcKind::Put.params(), DhtRpcKind::Get.params());
    }

    #[test]
    fn relay_has_nonzero_hit_limit() {
        assert_eq!(DhtRpcKind::Relay.params().hit_limit, 3);
    }
}
