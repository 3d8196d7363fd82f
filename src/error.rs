use std::{fmt, io};

/**
A failure produced while building or writing a GELF message.

Every failure is returned to the immediate caller; nothing is retried
internally except the byte-level loop in the stream encoder, and nothing
is ever logged or treated as fatal to the process.
*/
#[derive(Debug)]
pub enum Error {
    /// Malformed JSON handed to the JSON payload setter.
    Parse(serde_json::Error),
    /// The merged field mapping could not be serialized to JSON.
    Encode(String),
    /// The output sink reported a failure mid-write.
    Write(io::Error),
    /// An environment variable held a value the configuration
    /// could not use.
    Config(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Parse(err) => write!(f, "invalid JSON payload: {}", err),
            Error::Encode(msg) => write!(f, "could not encode GELF: {}", msg),
            Error::Write(err) => write!(f, "could not write GELF: {}", err),
            Error::Config(msg) => write!(f, "invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Parse(err) => Some(err),
            Error::Write(err) => Some(err),
            Error::Encode(_) | Error::Config(_) => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Write(err)
    }
}
