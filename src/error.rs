use thiserror::Error;

/// Errors raised while framing or decoding/encoding a NASA packet.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("packet too short: expected at least {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },

    #[error("unknown address class: {0:#04x}")]
    UnknownAddressClass(u8),

    #[error("CRC mismatch: expected {expected:#06x}, computed {computed:#06x}")]
    CrcMismatch { expected: u16, computed: u16 },

    #[error("unknown message type: {0}")]
    UnknownMessageType(u8),

    #[error("structure message requires capacity 1, got {0}")]
    StructureRequiresCapacityOne(u8),

    #[error("oversize message payload: {0} bytes")]
    OversizePayload(usize),

    #[error("{0} trailing bytes after declared capacity")]
    TrailingBytes(usize),

    #[error("frame misaligned, resynchronizing")]
    FrameMisaligned,

    #[error("frame ended without a valid 0x34 trailer")]
    InvalidTrailer,
}

/// Errors raised by the value transform layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransformError {
    #[error("arithmetic evaluation failed for expression {expr:?}: {reason}")]
    ArithmeticEvalFailed { expr: String, reason: String },

    #[error("value {0:?} is not numeric and has no enum/string decoding")]
    NotNumeric(String),

    #[error("unknown enum label {label:?} for point {point:?}")]
    UnknownEnumLabel { point: String, label: String },
}

/// Fatal configuration/repository load errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path:?}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse YAML in {path:?}: {source}")]
    Yaml {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("config must specify exactly one of `serial` or `tcp`, got {0}")]
    AmbiguousTransport(&'static str),

    #[error("invalid hex address {0:?} in repository file")]
    InvalidAddress(String),

    #[error("unknown point type {0:?} in repository file")]
    InvalidPointType(String),
}

/// Errors raised by the Producer when asked to read/write an unknown point.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProducerError {
    #[error("unknown point {0:?}")]
    UnknownPoint(String),
}

/// Top-level error type used by the supervisor and the binary entrypoint.
#[derive(Error, Debug)]
pub enum EhsError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error(transparent)]
    Producer(#[from] ProducerError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("MQTT client error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}
