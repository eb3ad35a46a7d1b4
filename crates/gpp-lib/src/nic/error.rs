use thiserror::Error;

/// Reasons a NIC allocation or deallocation is refused
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NicError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("allocation '{0}' already exists")]
    DuplicateIdentifier(String),

    #[error("unknown interface '{0}'")]
    UnknownInterface(String),

    #[error("interface '{0}' does not support multicast")]
    MulticastUnsupported(String),

    #[error("interface '{0}' is not IP addressable")]
    NotAddressable(String),

    #[error("interface '{interface}' has {available} Mbps available, {requested} requested")]
    InsufficientCapacity {
        interface: String,
        requested: f64,
        available: f64,
    },

    #[error("no interface satisfies the request")]
    NoSuitableInterface,

    #[error("no allocation with identifier '{0}'")]
    UnknownAllocation(String),

    #[error("allocation table unavailable")]
    Unavailable,
}
