use std::fmt;

/// A request header that could not be parsed.
///
/// Parse failures are fatal for the connection that produced them; the
/// network layer tears the connection down rather than guessing where the
/// next request boundary might be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The header line is not valid UTF-8.
    BadEncoding,
    /// The first token is not a known command word.
    UnknownCommand(String),
    /// The command requires a key and none was given.
    MissingKey(&'static str),
    /// The key is empty, too long, or contains control bytes.
    InvalidKey,
    /// A storage command is missing its `<bytes>` field.
    MissingLength(&'static str),
    /// The `<bytes>` field is not a decimal number.
    BadLength(&'static str, String),
    /// Extra tokens after a complete command.
    TrailingTokens(&'static str),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadEncoding => write!(f, "request line is not valid utf-8"),
            Self::UnknownCommand(word) => write!(f, "unknown command: {word:?}"),
            Self::MissingKey(cmd) => write!(f, "{cmd}: missing key"),
            Self::InvalidKey => write!(f, "invalid key"),
            Self::MissingLength(cmd) => write!(f, "{cmd}: missing data length"),
            Self::BadLength(cmd, given) => write!(f, "{cmd}: bad data length: {given:?}"),
            Self::TrailingTokens(cmd) => write!(f, "{cmd}: unexpected trailing tokens"),
        }
    }
}

impl std::error::Error for ParseError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_error_display() {
        assert_eq!(
            ParseError::UnknownCommand("flush".into()).to_string(),
            "unknown command: \"flush\""
        );
        assert_eq!(
            ParseError::BadLength("set", "3x".into()).to_string(),
            "set: bad data length: \"3x\""
        );
        assert_eq!(ParseError::MissingKey("delete").to_string(), "delete: missing key");
    }
}
