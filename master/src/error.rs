use std::{error::Error, fmt, io};

use decision::{DecisionErr, WorkerId};

/// The master module's result type.
pub type Result<T> = std::result::Result<T, MasterErr>;

/// Master service failures.
#[derive(Debug)]
pub enum MasterErr {
    Io(io::Error),
    /// A worker broke the protocol the coordinator enforces.
    Decision(DecisionErr),
    UnexpectedMessage {
        worker: WorkerId,
        got: &'static str,
    },
}

impl fmt::Display for MasterErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MasterErr::Io(e) => write!(f, "io error: {e}"),
            MasterErr::Decision(e) => write!(f, "decision error: {e}"),
            MasterErr::UnexpectedMessage { worker, got } => {
                write!(f, "unexpected message from worker {worker}: got {got}")
            }
        }
    }
}

impl Error for MasterErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            MasterErr::Io(e) => Some(e),
            MasterErr::Decision(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for MasterErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<DecisionErr> for MasterErr {
    fn from(value: DecisionErr) -> Self {
        Self::Decision(value)
    }
}

impl From<MasterErr> for io::Error {
    fn from(value: MasterErr) -> Self {
        match value {
            MasterErr::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
