//! Codec for the wire protocol through which requests/replies are exchanged.
//!
//! The wire protocol is RESP, the protocol spoken by Redis clients.
//!
//! # Request
//!
//! - Multi-bulk, an array of bulk strings
//!     - `*3\r\n$3\r\nSET\r\n$3\r\nkey\r\n$5\r\nvalue\r\n`
//! - Inline, a whitespace-separated line
//!     - `SET key value\r\n`
//!
//! Empty requests are skipped.
//!
//! # Reply
//!
//! - Status
//!     - `+OK\r\n`
//! - Error
//!     - `-Unknown command\r\n`
//! - Integer
//!     - `:2\r\n`
//! - Bulk
//!     - `$5\r\nvalue\r\n`
//! - Null
//!     - `$-1\r\n`

use super::types::{Command, Reply};
use anyhow::{bail, Context, Result};
use bytes::{BufMut, BytesMut};
use std::ops::Range;
use tokio_util::codec::{Decoder, Encoder};

const MAX_MULTIBULK_LEN: i64 = 1024 * 1024;
const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;
const MAX_INLINE_LEN: usize = 64 * 1024;

/// Bytes consumed by a complete request and the spans of its parts.
type Parsed = (usize, Vec<Range<usize>>);

#[derive(Default, Debug)]
pub struct Codec;

impl Decoder for Codec {
    type Item = Command;

    type Error = anyhow::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let parsed = match src.first().copied() {
                None => return Ok(None),
                Some(b'*') => parse_multibulk(src),
                Some(_) => parse_inline(src),
            };

            let (consumed, spans) = match parsed {
                Ok(Some(parsed)) => parsed,
                Ok(None) => return Ok(None),
                Err(e) => {
                    src.clear();
                    return Err(e);
                }
            };

            let frame = src.split_to(consumed).freeze();
            let parts = spans.into_iter().map(|span| frame.slice(span)).collect();

            if let Some(command) = Command::from_parts(parts) {
                return Ok(Some(command));
            }
        }
    }
}

impl Encoder<Reply> for Codec {
    type Error = anyhow::Error;

    fn encode(&mut self, item: Reply, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            Reply::Status(status) => write_line(dst, b'+', &status),
            Reply::Error(reason) => write_line(dst, b'-', &reason),
            Reply::Integer(n) => write_line(dst, b':', &n.to_string()),
            Reply::Bulk(data) => {
                write_line(dst, b'$', &data.len().to_string());
                dst.reserve(data.len() + 2);
                dst.put_slice(&data);
                dst.put_slice(b"\r\n");
            }
            Reply::Null => dst.put_slice(b"$-1\r\n"),
        }
        Ok(())
    }
}

fn parse_multibulk(buf: &[u8]) -> Result<Option<Parsed>> {
    let (count, mut pos) = match read_line(buf, 1, "mbulk")? {
        Some(line) => line,
        None => return Ok(None),
    };
    let count = parse_len(count).context("invalid multibulk length")?;
    if count > MAX_MULTIBULK_LEN {
        bail!("invalid multibulk length");
    }

    let mut spans = Vec::new();
    for _ in 0..count.max(0) {
        match buf.get(pos).copied() {
            None => return Ok(None),
            Some(b'$') => {}
            Some(other) => bail!("expected '$', got '{}'", other as char),
        }

        let (len, start) = match read_line(buf, pos + 1, "bulk")? {
            Some(line) => line,
            None => return Ok(None),
        };
        let len = parse_len(len).context("invalid bulk length")?;
        if !(0..=MAX_BULK_LEN).contains(&len) {
            bail!("invalid bulk length");
        }

        let end = start + len as usize;
        if buf.len() < end + 2 {
            return Ok(None);
        }
        if &buf[end..end + 2] != b"\r\n" {
            bail!("expected CRLF after bulk string");
        }

        spans.push(start..end);
        pos = end + 2;
    }

    Ok(Some((pos, spans)))
}

fn parse_inline(buf: &[u8]) -> Result<Option<Parsed>> {
    let newline = match buf.iter().position(|b| *b == b'\n') {
        Some(newline) => newline,
        None if buf.len() > MAX_INLINE_LEN => bail!("too big inline request"),
        None => return Ok(None),
    };

    let mut spans = Vec::new();
    let mut start = None;
    for (i, b) in buf[..newline].iter().enumerate() {
        match (b.is_ascii_whitespace(), start) {
            (false, None) => start = Some(i),
            (true, Some(s)) => {
                spans.push(s..i);
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        spans.push(s..newline);
    }

    Ok(Some((newline + 1, spans)))
}

/// The count line starting at `from` without its CRLF, and the offset past it.
fn read_line<'a>(buf: &'a [u8], from: usize, what: &str) -> Result<Option<(&'a [u8], usize)>> {
    let rest = match buf.get(from..) {
        Some(rest) => rest,
        None => return Ok(None),
    };
    let window = &rest[..rest.len().min(MAX_INLINE_LEN + 2)];
    match window.windows(2).position(|w| w == b"\r\n") {
        Some(end) => Ok(Some((&rest[..end], from + end + 2))),
        None if rest.len() > MAX_INLINE_LEN => bail!("too big {} count string", what),
        None => Ok(None),
    }
}

fn parse_len(digits: &[u8]) -> Result<i64> {
    Ok(std::str::from_utf8(digits)?.parse()?)
}

fn write_line(dst: &mut BytesMut, prefix: u8, line: &str) {
    dst.reserve(line.len() + 3);
    dst.put_u8(prefix);
    // A bare CR or LF would end the line early.
    dst.extend(
        line.bytes()
            .map(|b| if b == b'\r' || b == b'\n' { b' ' } else { b }),
    );
    dst.put_slice(b"\r\n");
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use proptest::prelude::*;

    fn command(parts: &[&'static [u8]]) -> Command {
        Command::from_parts(parts.iter().map(|p| Bytes::from_static(p)).collect()).unwrap()
    }

    #[test]
    fn succeeds_to_decode_wellformed_request() {
        let cases = vec![
            (
                b"*2\r\n$3\r\nGET\r\n$3\r\nkey\r\n".as_ref(),
                command(&[b"GET", b"key"]),
                "multi-bulk get",
            ),
            (
                b"*3\r\n$3\r\nset\r\n$3\r\nk\r\n\r\n$0\r\n\r\n".as_ref(),
                command(&[b"set", b"k\r\n", b""]),
                "multi-bulk with binary and empty arguments",
            ),
            (
                b"SET key  value\r\n".as_ref(),
                command(&[b"SET", b"key", b"value"]),
                "inline with crlf",
            ),
            (b"PING\n".as_ref(), command(&[b"PING"]), "inline with lf"),
            (
                b"\r\n*0\r\n*-1\r\nPING\r\n".as_ref(),
                command(&[b"PING"]),
                "empty requests skipped",
            ),
        ];

        cases
            .into_iter()
            .for_each(|(message, expected_command, reason)| {
                // Pre-condition.
                let mut decoder = Codec::default();
                let mut message = BytesMut::from(message);

                // Action.
                let decoded = decoder.decode(&mut message).unwrap();

                // Post-condition.
                assert_eq!(decoded, Some(expected_command), "{}", reason);
                assert!(message.is_empty(), "{}", reason);
            });
    }

    #[test]
    fn decodes_pipelined_requests_in_order() {
        // Pre-condition.
        let mut decoder = Codec::default();
        let mut message = BytesMut::from(b"*1\r\n$4\r\nPING\r\nECHO hi\r\n".as_ref());

        // Action.
        let first = decoder.decode(&mut message).unwrap();
        let second = decoder.decode(&mut message).unwrap();
        let third = decoder.decode(&mut message).unwrap();

        // Post-condition.
        assert_eq!(first, Some(command(&[b"PING"])));
        assert_eq!(second, Some(command(&[b"ECHO", b"hi"])));
        assert_eq!(third, None);
    }

    #[test]
    fn waits_for_incomplete_request() {
        let cases = vec![
            (b"*2\r\n$3\r\nGET\r\n".as_ref(), "missing argument"),
            (b"*2\r\n$3\r\nGET\r\n$3\r\nke".as_ref(), "truncated payload"),
            (b"*2\r\n$3".as_ref(), "truncated length"),
            (b"*2".as_ref(), "truncated count"),
            (b"GET key".as_ref(), "inline without newline"),
        ];

        cases.into_iter().for_each(|(message, reason)| {
            // Pre-condition.
            let mut decoder = Codec::default();
            let mut buffer = BytesMut::from(message);

            // Action.
            let decoded = decoder.decode(&mut buffer).unwrap();

            // Post-condition.
            assert_eq!(decoded, None, "{}", reason);
            assert_eq!(&buffer[..], message, "{}", reason);
        });
    }

    #[test]
    fn fails_to_decode_malformed_request() {
        let endless_count = [b"*".as_ref(), &[b'1'; MAX_INLINE_LEN + 1][..]].concat();
        let endless_length = [b"*1\r\n$".as_ref(), &[b'9'; MAX_INLINE_LEN + 1][..]].concat();
        let cases = vec![
            (endless_count.as_slice(), "unterminated element count"),
            (endless_length.as_slice(), "unterminated bulk length"),
            (b"*x\r\n".as_ref(), "non-numeric count"),
            (b"*1\r\n:1\r\n".as_ref(), "non-bulk element"),
            (b"*1\r\n$-5\r\n".as_ref(), "negative bulk length"),
            (b"*1\r\n$3\r\nabcd\r\n".as_ref(), "bulk longer than declared"),
            (b"*2000000\r\n".as_ref(), "too many elements"),
        ];

        cases.into_iter().for_each(|(message, reason)| {
            // Pre-condition.
            let mut decoder = Codec::default();
            let mut message = BytesMut::from(message);

            // Action.
            let decoded = decoder.decode(&mut message);

            // Post-condition.
            assert!(decoded.is_err(), "{}", reason);
            assert!(message.is_empty(), "{}", reason);
        });
    }

    #[test]
    fn fails_to_decode_oversized_inline_request() {
        // Pre-condition.
        let mut decoder = Codec::default();
        let mut message = BytesMut::from(vec![b'a'; MAX_INLINE_LEN + 1].as_slice());

        // Action.
        let decoded = decoder.decode(&mut message);

        // Post-condition.
        assert!(decoded.is_err());
    }

    #[test]
    fn succeeds_to_encode_reply() {
        let cases = vec![
            (Reply::ok(), b"+OK\r\n".as_ref(), "status"),
            (
                Reply::error("Unknown command"),
                b"-Unknown command\r\n".as_ref(),
                "error",
            ),
            (
                Reply::error("ERROR: boom\nDETAIL: more"),
                b"-ERROR: boom DETAIL: more\r\n".as_ref(),
                "error with newline",
            ),
            (Reply::Integer(2), b":2\r\n".as_ref(), "integer"),
            (
                Reply::Bulk(Bytes::from_static(b"a\r\nb")),
                b"$4\r\na\r\nb\r\n".as_ref(),
                "bulk",
            ),
            (Reply::Null, b"$-1\r\n".as_ref(), "null"),
        ];

        cases
            .into_iter()
            .for_each(|(reply, expected_message, reason)| {
                // Pre-condition.
                let mut encoder = Codec::default();
                let mut message = BytesMut::default();

                // Action.
                encoder.encode(reply, &mut message).unwrap();

                // Post-condition.
                assert_eq!(message, expected_message, "{}", reason)
            });
    }

    proptest! {
        #[test]
        fn decodes_request_delivered_in_two_chunks(
            parts in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..16), 1..6),
            cut in any::<prop::sample::Index>(),
        ) {
            // Pre-condition.
            let mut wire = format!("*{}\r\n", parts.len()).into_bytes();
            for part in &parts {
                wire.extend(format!("${}\r\n", part.len()).bytes());
                wire.extend(part);
                wire.extend(b"\r\n");
            }
            let cut = cut.index(wire.len());
            let mut decoder = Codec::default();
            let mut buffer = BytesMut::from(&wire[..cut]);

            // Action.
            let early = decoder.decode(&mut buffer).unwrap();
            buffer.extend_from_slice(&wire[cut..]);
            let complete = decoder.decode(&mut buffer).unwrap();

            // Post-condition.
            let expected = Command::from_parts(parts.into_iter().map(Bytes::from).collect());
            prop_assert_eq!(early, None);
            prop_assert_eq!(complete, expected);
            prop_assert!(buffer.is_empty());
        }

        #[test]
        fn fails_to_decode_request_with_invalid_count(count in "[a-z]{1,8}") {
            // Pre-condition.
            let mut message = BytesMut::from(format!("*{}\r\n", count).as_str());
            let mut decoder = Codec::default();

            // Action.
            let decoded = decoder.decode(&mut message);

            // Post-condition.
            prop_assert!(decoded.is_err());
            prop_assert!(message.is_empty());
        }
    }
}
