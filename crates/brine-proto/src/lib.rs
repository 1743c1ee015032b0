//! Memcached-flavored text protocol for the brine cache server.
//!
//! A request is a single `\r\n`-terminated header line, optionally followed
//! by a data body whose length is declared in the header (and itself
//! terminated by `\r\n`):
//!
//! ```text
//! set <key> <bytes>\r\n<data>\r\n      -> STORED | NOT_STORED
//! add <key> <bytes>\r\n<data>\r\n      -> STORED | NOT_STORED
//! replace <key> <bytes>\r\n<data>\r\n  -> STORED | NOT_STORED
//! delete <key>\r\n                     -> DELETED | NOT_FOUND
//! get <key> [<key> ...]\r\n            -> VALUE <key> <bytes>\r\n<data>\r\n ... END
//! ```
//!
//! The parser is incremental and never buffers input itself: it consumes an
//! integer number of bytes from the caller's buffer, and consuming zero
//! bytes means "need more input". The caller keeps the unconsumed prefix.
//! Executor results carry no trailing `\r\n`; the network layer appends it.

mod command;
mod error;
mod parser;

pub use command::{execute, Request};
pub use error::ParseError;
pub use parser::parse;

/// Longest accepted key, in bytes.
pub const MAX_KEY_LEN: usize = 250;
