//! Error surface for the assemble/transport engine.

use thiserror::Error;

/// Failures from decoding a wire frame. Converted into [`EngineError`] at the
/// call sites that surface protocol errors to the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("missing or wrong-length version tag")]
    VersionError,
    #[error("missing `n`, wrong length, or unknown frame kind")]
    NameError,
    #[error("frame kind known but major version differs")]
    VersionMismatch,
    #[error("missing `a` or wrong argument types/sizes")]
    FormatError,
}

/// The complete error surface exposed to the application and to internal
/// retry bookkeeping. `NO_ERROR` has no variant here — absence of an error
/// is represented by `Ok(())` or `Option::None` at call sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("transport invocation queue has no room for this call")]
    TransportBufferFull,
    #[error("transporter is stopped")]
    TransportStopped,
    #[error("network error reported by the kademlia layer")]
    NetworkError,
    #[error("kademlia layer reports zero live nodes")]
    DhtLiveNodesZero,
    #[error("protocol version tag missing or wrong length")]
    AssembleVersionError,
    #[error("protocol frame name missing, malformed, or unknown")]
    AssembleNameError,
    #[error("protocol frame arguments missing or malformed")]
    AssembleProtocolFormatError,
    #[error("protocol frame major version mismatch")]
    AssembleProtocolVerMismatch,
    #[error("blob exceeds blob_mtu")]
    BlobTooLarge,
    #[error("put exhausted its retry budget with zero responses")]
    PutResponseZero,
    #[error("get exceeded reget_times_limit")]
    GetTooManyTimes,
    #[error("index record decoded to an empty segment-hash list")]
    EmptyBlobIndex,
    #[error("relay delivered to zero nodes")]
    RelayResponseZero,
}

impl From<CodecError> for EngineError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::VersionError => EngineError::AssembleVersionError,
            CodecError::NameError => EngineError::AssembleNameError,
            CodecError::FormatError => EngineError::AssembleProtocolFormatError,
            CodecError::VersionMismatch => EngineError::AssembleProtocolVerMismatch,
        }
    }
}
