//! Test message payload codec
//!
//! Every message a test produces carries a textual token
//! `testid=<u64>, partition=<i32>, msg=<int>` identifying the run, the
//! partition the producer targeted, and the test's own message id.
//! `run_id=` is accepted in place of `testid=` when decoding.
//! Bytes after the message id are ignored so producers may pad payloads.

use crate::error::{Error, Result};
use crate::types::RunId;
use std::fmt;

/// Decoded payload token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageToken {
    /// Run the message belongs to
    pub run_id: RunId,
    /// Partition the producer targeted
    pub partition: i32,
    /// Test-assigned message id
    pub msg_id: i32,
}

impl MessageToken {
    /// Create a token
    pub const fn new(run_id: RunId, partition: i32, msg_id: i32) -> Self {
        Self {
            run_id,
            partition,
            msg_id,
        }
    }

    /// Encode as payload bytes
    ///
    /// The run id is always written under the `testid=` key, the form other
    /// clients in a shared cluster produce and parse. `run_id=` is only
    /// recognized by [`MessageToken::decode`].
    pub fn encode(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }

    /// Decode a payload
    ///
    /// # Errors
    /// Returns `Error::PayloadFormat` if the payload does not start with a
    /// well-formed token.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(payload).map_err(|_| Error::payload_format(payload))?;
        parse_token(text).ok_or_else(|| Error::payload_format(payload))
    }
}

impl fmt::Display for MessageToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "testid={}, partition={}, msg={}",
            self.run_id, self.partition, self.msg_id
        )
    }
}

fn parse_token(text: &str) -> Option<MessageToken> {
    let rest = text
        .strip_prefix("testid=")
        .or_else(|| text.strip_prefix("run_id="))?;
    let (run_id, rest) = take_number::<u64>(rest, false)?;
    let rest = rest.strip_prefix(',')?.trim_start().strip_prefix("partition=")?;
    let (partition, rest) = take_number::<i32>(rest, true)?;
    let rest = rest.strip_prefix(',')?.trim_start().strip_prefix("msg=")?;
    let (msg_id, _) = take_number::<i32>(rest, true)?;
    Some(MessageToken::new(RunId::from_raw(run_id), partition, msg_id))
}

fn take_number<N: std::str::FromStr>(s: &str, signed: bool) -> Option<(N, &str)> {
    let s = s.trim_start();
    let sign_len = if signed && s.starts_with('-') { 1 } else { 0 };
    let digits = s[sign_len..]
        .bytes()
        .take_while(|b| b.is_ascii_digit())
        .count();
    if digits == 0 {
        return None;
    }
    let end = sign_len + digits;
    let value = s[..end].parse().ok()?;
    Some((value, &s[end..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_format() {
        let token = MessageToken::new(RunId::from_raw(77), 2, 1234);
        assert_eq!(token.encode(), b"testid=77, partition=2, msg=1234".to_vec());
    }

    #[test]
    fn test_decode_encoded() {
        let token = MessageToken::new(RunId::from_raw(u64::MAX), -1, 0);
        assert_eq!(MessageToken::decode(&token.encode()).unwrap(), token);
    }

    #[test]
    fn test_decode_run_id_alias() {
        let token = MessageToken::decode(b"run_id=5, partition=0, msg=9").unwrap();
        assert_eq!(token, MessageToken::new(RunId::from_raw(5), 0, 9));
    }

    #[test]
    fn test_decode_ignores_trailing_padding() {
        let token = MessageToken::decode(b"testid=1, partition=3, msg=42 xxxxxxxx").unwrap();
        assert_eq!(token.msg_id, 42);
        assert_eq!(token.partition, 3);
    }

    #[test]
    fn test_decode_rejects_malformed() {
        for bad in [
            &b""[..],
            b"hello",
            b"testid=, partition=0, msg=1",
            b"testid=1 partition=0 msg=1",
            b"testid=1, partition=0",
            b"testid=-1, partition=0, msg=1",
            b"\xff\xfe",
        ] {
            let err = MessageToken::decode(bad).unwrap_err();
            assert!(matches!(err, Error::PayloadFormat { .. }));
        }
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn decode_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..64)) {
                let _ = MessageToken::decode(&bytes);
            }

            #[test]
            fn encoded_tokens_decode(run in any::<u64>(), partition in -1i32..1024, msg in any::<i32>()) {
                let token = MessageToken::new(RunId::from_raw(run), partition, msg);
                prop_assert_eq!(MessageToken::decode(&token.encode()).unwrap(), token);
            }
        }
    }
}
