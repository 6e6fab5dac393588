//! Error types for the session layer.

/// Recoverable failures surfaced by streams, packets, registries and sessions.
///
/// Programmer and schema errors (an unregistered message type reaching
/// dispatch, a connection joined into an occupied slot) are not represented
/// here: those panic.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    /// A write would have exceeded the stream's fixed capacity.
    #[error("write of {requested} bytes exceeds remaining capacity")]
    WriteOverflow {
        /// Number of bytes the caller tried to write.
        requested: usize,
    },

    /// Fewer bytes remain in the stream than a read asked for.
    #[error("read of {requested} bytes runs past the written data")]
    ReadUnderflow {
        /// Number of bytes the caller tried to read.
        requested: usize,
    },

    /// A string is too long for its `u16` length prefix.
    #[error("string of {0} bytes cannot be length-prefixed")]
    StringTooLong(usize),

    /// A message does not fit into the free space of a packet.
    #[error("message of {size} bytes does not fit in packet ({available} bytes free)")]
    PacketFull {
        /// Full wire size of the message.
        size: usize,
        /// Free bytes left in the packet.
        available: usize,
    },

    /// Raw bytes handed to a packet are not a valid datagram.
    #[error("datagram of {0} bytes is not a valid packet")]
    InvalidPacket(usize),

    /// A handler is already bound to this message type.
    #[error("message type {0} already has a registered handler")]
    AlreadyRegistered(u8),

    /// Every bind attempt in the retry budget failed.
    #[error("failed to bind after {attempts} attempts starting at port {first_port}")]
    BindFailed {
        /// Port of the first attempt.
        first_port: u16,
        /// Number of ports tried.
        attempts: u32,
    },

    /// The session already holds a transport or an active connection set.
    #[error("session is already running")]
    AlreadyRunning,

    /// The operation needs a bound transport or a hosted session.
    #[error("session has not been started")]
    NotStarted,

    /// The operation is not meaningful for this session variant.
    #[error("{0} is not supported by this session variant")]
    Unsupported(&'static str),

    /// The connection table has no free slot left.
    #[error("no free connection slot (max {0})")]
    NoFreeSlot(u8),

    /// A join response could not be decoded or is inconsistent.
    #[error("malformed join response: {0}")]
    MalformedJoinInfo(&'static str),

    /// The transport reported an I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
