//! Incremental request-header parser.
//!
//! [`parse`] consumes at most one complete header line per call and reports
//! how many bytes it took from the input. With no complete line available
//! it consumes nothing and the caller is expected to keep the prefix and
//! retry once more bytes arrive.

use crate::error::ParseError;
use crate::command::Request;
use crate::MAX_KEY_LEN;

/// Try to parse one request header from the front of `buf`.
///
/// Returns `Ok(None)` when `buf` holds no complete line yet (zero bytes
/// consumed). On success the returned count covers the header line
/// including its terminator; any declared data body is *not* consumed here.
/// Malformed lines are unrecoverable for the stream and reported as
/// [`ParseError`].
pub fn parse(buf: &[u8]) -> Result<Option<(usize, Request)>, ParseError> {
    let Some(pos) = buf.iter().position(|&b| b == b'\n') else {
        return Ok(None);
    };
    let consumed = pos + 1;
    let mut line = &buf[..pos];
    if line.last() == Some(&b'\r') {
        line = &line[..line.len() - 1];
    }
    let line = std::str::from_utf8(line).map_err(|_| ParseError::BadEncoding)?;

    let mut tokens = line.split_ascii_whitespace();
    let word = tokens.next().unwrap_or("");

    let request = if word.eq_ignore_ascii_case("set") {
        parse_store("set", &mut tokens, |key, len| Request::Set { key, len })?
    } else if word.eq_ignore_ascii_case("add") {
        parse_store("add", &mut tokens, |key, len| Request::Add { key, len })?
    } else if word.eq_ignore_ascii_case("replace") {
        parse_store("replace", &mut tokens, |key, len| Request::Replace { key, len })?
    } else if word.eq_ignore_ascii_case("delete") {
        let key = tokens.next().ok_or(ParseError::MissingKey("delete"))?;
        validate_key(key)?;
        if tokens.next().is_some() {
            return Err(ParseError::TrailingTokens("delete"));
        }
        Request::Delete {
            key: key.to_owned(),
        }
    } else if word.eq_ignore_ascii_case("get") || word.eq_ignore_ascii_case("gets") {
        let mut keys = Vec::new();
        for key in tokens {
            validate_key(key)?;
            keys.push(key.to_owned());
        }
        if keys.is_empty() {
            return Err(ParseError::MissingKey("get"));
        }
        Request::Get { keys }
    } else {
        return Err(ParseError::UnknownCommand(word.to_owned()));
    };

    Ok(Some((consumed, request)))
}

fn parse_store<F>(
    cmd: &'static str,
    tokens: &mut std::str::SplitAsciiWhitespace<'_>,
    build: F,
) -> Result<Request, ParseError>
where
    F: FnOnce(String, usize) -> Request,
{
    let key = tokens.next().ok_or(ParseError::MissingKey(cmd))?;
    validate_key(key)?;
    let len_tok = tokens.next().ok_or(ParseError::MissingLength(cmd))?;
    let len: usize = len_tok
        .parse()
        .map_err(|_| ParseError::BadLength(cmd, len_tok.to_owned()))?;
    if tokens.next().is_some() {
        return Err(ParseError::TrailingTokens(cmd));
    }
    Ok(build(key.to_owned(), len))
}

fn validate_key(key: &str) -> Result<(), ParseError> {
    if key.is_empty() || key.len() > MAX_KEY_LEN {
        return Err(ParseError::InvalidKey);
    }
    if key.bytes().any(|b| b <= b' ' || b == 0x7f) {
        return Err(ParseError::InvalidKey);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incomplete_line_consumes_nothing() {
        assert_eq!(parse(b""), Ok(None));
        assert_eq!(parse(b"set k 3"), Ok(None));
        assert_eq!(parse(b"set k 3\r"), Ok(None));
    }

    #[test]
    fn test_set_header() {
        let (consumed, req) = parse(b"set k 3\r\nabc\r\n").unwrap().unwrap();
        assert_eq!(consumed, 9);
        assert_eq!(
            req,
            Request::Set {
                key: "k".into(),
                len: 3
            }
        );
        assert_eq!(req.arg_len(), 3);
    }

    #[test]
    fn test_command_word_is_case_insensitive() {
        let (_, req) = parse(b"SET k 3\r\n").unwrap().unwrap();
        assert_eq!(req.arg_len(), 3);
        let (_, req) = parse(b"Get k\r\n").unwrap().unwrap();
        assert_eq!(
            req,
            Request::Get {
                keys: vec!["k".into()]
            }
        );
    }

    #[test]
    fn test_bare_newline_terminator_accepted() {
        let (consumed, req) = parse(b"delete k\n").unwrap().unwrap();
        assert_eq!(consumed, 9);
        assert_eq!(req, Request::Delete { key: "k".into() });
    }

    #[test]
    fn test_get_with_multiple_keys() {
        let (_, req) = parse(b"get a bb ccc\r\n").unwrap().unwrap();
        assert_eq!(
            req,
            Request::Get {
                keys: vec!["a".into(), "bb".into(), "ccc".into()]
            }
        );
    }

    #[test]
    fn test_gets_alias() {
        let (_, req) = parse(b"gets a\r\n").unwrap().unwrap();
        assert_eq!(
            req,
            Request::Get {
                keys: vec!["a".into()]
            }
        );
    }

    #[test]
    fn test_add_and_replace_headers() {
        let (_, req) = parse(b"add k 2\r\n").unwrap().unwrap();
        assert_eq!(
            req,
            Request::Add {
                key: "k".into(),
                len: 2
            }
        );
        let (_, req) = parse(b"replace k 0\r\n").unwrap().unwrap();
        assert_eq!(req.arg_len(), 0);
    }

    #[test]
    fn test_errors() {
        assert_eq!(
            parse(b"flush_all\r\n"),
            Err(ParseError::UnknownCommand("flush_all".into()))
        );
        assert_eq!(parse(b"set k\r\n"), Err(ParseError::MissingLength("set")));
        assert_eq!(
            parse(b"set k 3x\r\n"),
            Err(ParseError::BadLength("set", "3x".into()))
        );
        assert_eq!(parse(b"delete\r\n"), Err(ParseError::MissingKey("delete")));
        assert_eq!(parse(b"get\r\n"), Err(ParseError::MissingKey("get")));
        assert_eq!(
            parse(b"delete k extra\r\n"),
            Err(ParseError::TrailingTokens("delete"))
        );
        assert_eq!(parse(b"\r\n"), Err(ParseError::UnknownCommand("".into())));
        assert_eq!(parse(b"get \xff\x01\r\n"), Err(ParseError::BadEncoding));
    }

    #[test]
    fn test_invalid_keys() {
        let long = format!("get {}\r\n", "k".repeat(MAX_KEY_LEN + 1));
        assert_eq!(parse(long.as_bytes()), Err(ParseError::InvalidKey));
        assert_eq!(parse(b"get k\x01ey\r\n"), Err(ParseError::InvalidKey));

        let edge = format!("get {}\r\n", "k".repeat(MAX_KEY_LEN));
        assert!(parse(edge.as_bytes()).is_ok());
    }

    #[test]
    fn test_parses_one_line_at_a_time() {
        let input = b"set a 1\r\nX\r\nget a\r\n";
        let (consumed, req) = parse(input).unwrap().unwrap();
        assert_eq!(consumed, 9);
        assert_eq!(req.arg_len(), 1);
        // Caller strips the body (X plus terminator) and parses again.
        let rest = &input[consumed + 3..];
        let (consumed, req) = parse(rest).unwrap().unwrap();
        assert_eq!(consumed, 7);
        assert_eq!(
            req,
            Request::Get {
                keys: vec!["a".into()]
            }
        );
    }
}
