use std::{error::Error, fmt, io};

/// The crate-wide result type.
pub type Result<T> = std::result::Result<T, NetErr>;

/// Training-core failures.
///
/// Everything here is fatal: configuration and format errors are raised
/// once at init/load time, the rest are caller contract violations. No
/// variant is meant to be retried.
#[derive(Debug)]
pub enum NetErr {
    Io(io::Error),
    /// Dataset payload size disagrees with what its header promised.
    Format {
        what: &'static str,
        expected: usize,
        got: usize,
    },
    /// Dataset header magic does not match the expected file kind.
    BadMagic {
        what: &'static str,
        expected: u32,
        got: u32,
    },
    /// Invalid or missing required configuration, raised at connection init.
    Config {
        layer: &'static str,
        msg: String,
    },
    /// Index access beyond the stored instance count.
    OutOfRange {
        index: usize,
        len: usize,
    },
    /// A parameter-store key that does not decode to a known weight role.
    InvalidKey {
        key: i32,
    },
    /// A caller broke an interface contract (e.g. synchronous update on an
    /// asynchronous updater).
    Usage(&'static str),
}

impl fmt::Display for NetErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetErr::Io(e) => write!(f, "io error: {e}"),
            NetErr::Format {
                what,
                expected,
                got,
            } => write!(f, "{what}: expected {expected}, got {got}"),
            NetErr::BadMagic {
                what,
                expected,
                got,
            } => write!(f, "{what}: bad magic, expected {expected}, got {got}"),
            NetErr::Config { layer, msg } => write!(f, "{layer}: {msg}"),
            NetErr::OutOfRange { index, len } => {
                write!(f, "index {index} out of range for {len} instances")
            }
            NetErr::InvalidKey { key } => write!(f, "invalid parameter key {key}"),
            NetErr::Usage(msg) => write!(f, "usage error: {msg}"),
        }
    }
}

impl Error for NetErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            NetErr::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for NetErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}
