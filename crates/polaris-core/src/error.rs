//! Error types for the Polaris protocol.
use thiserror::Error;

/// Errors raised while framing, reading, or writing wire messages, and by
/// the transport when opening streams.
#[derive(Error, Debug)]
pub enum WireError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("payload too large: {size} > {max}")]
    PayloadTooLarge { size: usize, max: usize },
    #[error("unexpected subprotocol {got:#06x}")]
    UnexpectedSubprotocol { got: u32 },
    #[error("decode: {0}")]
    Decode(String),
    #[error("encode: {0}")]
    Encode(String),
    #[error("dial failed: {0}")]
    DialFailure(String),
    #[error("peer has no dialable address")]
    NoAddress,
    #[error("timeout")]
    Timeout,
}

/// Errors constructing or parsing a deny-list entry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EntryError {
    #[error("entry has no peer id, address, or cidr")]
    Empty,
    #[error("either address or cidr is allowed, not both")]
    AddressAndCidr,
    #[error("invalid peer id: {0}")]
    InvalidPeerId(String),
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error("invalid cidr: {0}")]
    InvalidCidr(String),
    #[error("malformed entry: {0}")]
    Malformed(String),
}

/// Errors decoding a chain identity from its wire form.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainIdError {
    #[error("malformed chain id: {0}")]
    Malformed(String),
}

/// Errors turning a wire [`crate::message::Status`] into peer metadata.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MetaError {
    #[error("status has no sender")]
    NoSender,
    #[error("invalid peer id bytes")]
    InvalidPeerId,
    #[error("peer advertised no address")]
    NoAddress,
    #[error("invalid address: {0}")]
    InvalidAddress(String),
}

/// Errors surfaced by the administrative operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdminError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("index out of range: {0}")]
    OutOfRange(usize),
    #[error("rpc server: {0}")]
    Server(String),
}
