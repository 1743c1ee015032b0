//! Parsed requests and their execution against a storage backend.

use brine_store::Storage;

/// A fully parsed request header.
///
/// Storage commands (`Set`/`Add`/`Replace`) declare the length of a data
/// body that follows the header line; the body itself is collected by the
/// caller and handed to [`execute`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// `set` -- unconditional store.
    Set { key: String, len: usize },
    /// `add` -- store only if the key is absent.
    Add { key: String, len: usize },
    /// `replace` -- store only if the key exists.
    Replace { key: String, len: usize },
    /// `delete`.
    Delete { key: String },
    /// `get` with one or more keys.
    Get { keys: Vec<String> },
}

impl Request {
    /// Declared length of the data body following the header, in bytes
    /// (excluding the body's `\r\n` terminator). Zero for commands without
    /// a body.
    pub fn arg_len(&self) -> usize {
        match self {
            Request::Set { len, .. } | Request::Add { len, .. } | Request::Replace { len, .. } => {
                *len
            }
            Request::Delete { .. } | Request::Get { .. } => 0,
        }
    }
}

/// Execute a request against `storage` and return the response bytes.
///
/// The response carries no trailing `\r\n`; the network layer appends the
/// terminator when it enqueues the reply.
pub fn execute(request: &Request, body: &[u8], storage: &dyn Storage) -> Vec<u8> {
    match request {
        Request::Set { key, .. } => stored(storage.put(key, body)),
        Request::Add { key, .. } => stored(storage.put_if_absent(key, body)),
        Request::Replace { key, .. } => stored(storage.set(key, body)),
        Request::Delete { key } => {
            if storage.delete(key) {
                b"DELETED".to_vec()
            } else {
                b"NOT_FOUND".to_vec()
            }
        }
        Request::Get { keys } => {
            let mut out = Vec::new();
            for key in keys {
                if let Some(value) = storage.get(key) {
                    out.extend_from_slice(format!("VALUE {} {}\r\n", key, value.len()).as_bytes());
                    out.extend_from_slice(&value);
                    out.extend_from_slice(b"\r\n");
                }
            }
            out.extend_from_slice(b"END");
            out
        }
    }
}

fn stored(ok: bool) -> Vec<u8> {
    if ok {
        b"STORED".to_vec()
    } else {
        b"NOT_STORED".to_vec()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
