//! Text encodings understood by views and segments.
//!
//! Every writer takes a `max_len` and never produces more bytes than that,
//! base64 included.

use std::fmt;
use std::str::FromStr;

use crate::errors::{IpcBufferError, Result};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Encoding {
    #[default]
    Utf8,
    Ascii,
    Binary,
    Base64,
}

impl Encoding {
    pub fn name(&self) -> &'static str {
        match self {
            Encoding::Utf8 => "utf8",
            Encoding::Ascii => "ascii",
            Encoding::Binary => "binary",
            Encoding::Base64 => "base64",
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Encoding {
    type Err = IpcBufferError;

    fn from_str(s: &str) -> Result<Encoding> {
        match s.to_ascii_lowercase().as_str() {
            "utf8" | "utf-8" => Ok(Encoding::Utf8),
            "ascii" => Ok(Encoding::Ascii),
            "binary" => Ok(Encoding::Binary),
            "base64" => Ok(Encoding::Base64),
            _ => Err(IpcBufferError::UnsupportedEncoding(s.to_string())),
        }
    }
}

/// Outcome of an encoding write.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Written {
    pub bytes: usize,
    /// Characters of the source text that made it into `bytes`.
    pub chars: usize,
}

/// Encodes `text`, producing at most `max_len` bytes.
pub fn encode(encoding: Encoding, text: &str, max_len: usize) -> (Vec<u8>, Written) {
    let (bytes, chars) = match encoding {
        Encoding::Utf8 => encode_utf8(text, max_len),
        Encoding::Ascii => encode_narrow(text, max_len, 0x7f),
        Encoding::Binary => encode_narrow(text, max_len, 0xff),
        Encoding::Base64 => base64_decode(text, max_len),
    };
    let written = Written {
        bytes: bytes.len(),
        chars,
    };
    (bytes, written)
}

pub fn decode(encoding: Encoding, bytes: &[u8]) -> String {
    match encoding {
        Encoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
        Encoding::Ascii => bytes.iter().map(|&b| char::from(b & 0x7f)).collect(),
        Encoding::Binary => bytes.iter().map(|&b| char::from(b)).collect(),
        Encoding::Base64 => base64_encode(bytes),
    }
}

/// Number of bytes `text` occupies once written with `encoding`.
pub fn byte_length(text: &str, encoding: Encoding) -> usize {
    match encoding {
        Encoding::Utf8 => text.len(),
        Encoding::Ascii | Encoding::Binary => text.chars().count(),
        Encoding::Base64 => base64_decoded_size(text.as_bytes()),
    }
}

// Whole characters only: one that would straddle max_len is dropped.
fn encode_utf8(text: &str, max_len: usize) -> (Vec<u8>, usize) {
    let mut out = Vec::with_capacity(text.len().min(max_len));
    let mut chars = 0;
    let mut buf = [0u8; 4];
    for c in text.chars() {
        let encoded = c.encode_utf8(&mut buf);
        if out.len() + encoded.len() > max_len {
            break;
        }
        out.extend_from_slice(encoded.as_bytes());
        chars += 1;
    }
    (out, chars)
}

fn encode_narrow(text: &str, max_len: usize, mask: u32) -> (Vec<u8>, usize) {
    let out: Vec<u8> = text
        .chars()
        .take(max_len)
        .map(|c| (u32::from(c) & mask) as u8)
        .collect();
    let chars = out.len();
    (out, chars)
}

const BASE64_TABLE: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

fn unbase64(c: char) -> Option<u8> {
    match c {
        'A'..='Z' => Some(c as u8 - b'A'),
        'a'..='z' => Some(c as u8 - b'a' + 26),
        '0'..='9' => Some(c as u8 - b'0' + 52),
        '+' => Some(62),
        '/' => Some(63),
        _ => None,
    }
}

fn base64_decoded_size(src: &[u8]) -> usize {
    let remainder = src.len() % 4;
    let mut size = (src.len() / 4) * 3;
    if remainder != 0 {
        if size == 0 && remainder == 1 {
            // a lone sextet carries no whole byte
            size = 0;
        } else {
            size += 1 + usize::from(remainder == 3);
        }
    }
    if size > 0 {
        if src[src.len() - 1] == b'=' {
            size -= 1;
        }
        if src[src.len() - 2] == b'=' {
            size = size.saturating_sub(1);
        }
    }
    size
}

// Skips anything outside the alphabet, stops at the first '='.
fn base64_decode(text: &str, max_len: usize) -> (Vec<u8>, usize) {
    let mut out = Vec::with_capacity(base64_decoded_size(text.as_bytes()).min(max_len));
    let mut quad = [0u8; 4];
    let mut filled = 0;
    let mut chars = 0;

    for c in text.chars() {
        if c == '=' || out.len() == max_len {
            break;
        }
        chars += 1;
        let sextet = match unbase64(c) {
            Some(v) => v,
            None => continue,
        };
        quad[filled] = sextet;
        filled += 1;
        match filled {
            2 => out.push((quad[0] << 2) | (quad[1] >> 4)),
            3 => out.push((quad[1] << 4) | (quad[2] >> 2)),
            4 => {
                out.push((quad[2] << 6) | quad[3]);
                filled = 0;
            }
            _ => {}
        }
    }
    (out, chars)
}

fn base64_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity((bytes.len() + 2) / 3 * 4);
    for chunk in bytes.chunks(3) {
        let b0 = chunk[0];
        let b1 = chunk.get(1).copied();
        let b2 = chunk.get(2).copied();

        out.push(char::from(BASE64_TABLE[usize::from(b0 >> 2)]));
        out.push(char::from(
            BASE64_TABLE[usize::from(((b0 & 0x03) << 4) | (b1.unwrap_or(0) >> 4))],
        ));
        match b1 {
            Some(b1) => out.push(char::from(
                BASE64_TABLE[usize::from(((b1 & 0x0f) << 2) | (b2.unwrap_or(0) >> 6))],
            )),
            None => out.push('='),
        }
        match b2 {
            Some(b2) => out.push(char::from(BASE64_TABLE[usize::from(b2 & 0x3f)])),
            None => out.push('='),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_names_case_insensitively() -> Result<()> {
        assert_eq!("UTF8".parse::<Encoding>()?, Encoding::Utf8);
        assert_eq!("Utf-8".parse::<Encoding>()?, Encoding::Utf8);
        assert_eq!("ASCII".parse::<Encoding>()?, Encoding::Ascii);
        assert_eq!("binary".parse::<Encoding>()?, Encoding::Binary);
        assert_eq!("Base64".parse::<Encoding>()?, Encoding::Base64);
        Ok(())
    }

    #[test]
    fn defaults_to_utf8() {
        assert_eq!(Encoding::default(), Encoding::Utf8);
        assert_eq!(Encoding::default().to_string(), "utf8");
    }

    #[test]
    fn rejects_unknown_names() {
        match "ucs2".parse::<Encoding>() {
            Err(IpcBufferError::UnsupportedEncoding(name)) => assert_eq!(name, "ucs2"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn utf8_never_splits_a_character() {
        // "é" is two bytes, only "h" fits before it in 2 bytes
        let (bytes, written) = encode(Encoding::Utf8, "hé", 2);
        assert_eq!(bytes, b"h");
        assert_eq!(written, Written { bytes: 1, chars: 1 });

        let (bytes, written) = encode(Encoding::Utf8, "hé", 3);
        assert_eq!(bytes, "hé".as_bytes());
        assert_eq!(written.chars, 2);
    }

    #[test]
    fn ascii_and_binary_narrow_code_points() {
        let (ascii, _) = encode(Encoding::Ascii, "a\u{e9}", 10);
        assert_eq!(ascii, vec![b'a', 0xe9 & 0x7f]);

        let (binary, _) = encode(Encoding::Binary, "a\u{e9}\u{100}", 10);
        assert_eq!(binary, vec![b'a', 0xe9, 0x00]);

        assert_eq!(decode(Encoding::Binary, &[0x61, 0xe9]), "a\u{e9}");
        assert_eq!(decode(Encoding::Ascii, &[0x61, 0xe1]), "aa");
    }

    #[test]
    fn narrow_writers_clamp() {
        let (bytes, written) = encode(Encoding::Ascii, "abcdef", 3);
        assert_eq!(bytes, b"abc");
        assert_eq!(written.chars, 3);
    }

    #[test]
    fn base64_decode_skips_noise_and_accepts_unpadded() {
        let (bytes, _) = encode(Encoding::Base64, "aGVs\nbG8=", 64);
        assert_eq!(bytes, b"hello");

        let (bytes, _) = encode(Encoding::Base64, "aGVsbG8", 64);
        assert_eq!(bytes, b"hello");
    }

    #[test]
    fn base64_decode_honours_max_len() {
        let (bytes, written) = encode(Encoding::Base64, "aGVsbG8gd29ybGQ=", 4);
        assert_eq!(bytes, b"hell");
        assert_eq!(written.bytes, 4);
    }

    #[test]
    fn base64_encode_pads() {
        assert_eq!(decode(Encoding::Base64, b"hello"), "aGVsbG8=");
        assert_eq!(decode(Encoding::Base64, b"hell"), "aGVsbA==");
        assert_eq!(decode(Encoding::Base64, b"hel"), "aGVs");
        assert_eq!(decode(Encoding::Base64, b""), "");
    }

    #[test]
    fn byte_lengths() {
        assert_eq!(byte_length("hé", Encoding::Utf8), 3);
        assert_eq!(byte_length("hé", Encoding::Ascii), 2);
        assert_eq!(byte_length("hé", Encoding::Binary), 2);
        assert_eq!(byte_length("aGVsbG8=", Encoding::Base64), 5);
        assert_eq!(byte_length("aGVsbA==", Encoding::Base64), 4);
        assert_eq!(byte_length("aGVsbG8", Encoding::Base64), 5);
        assert_eq!(byte_length("a", Encoding::Base64), 0);
        assert_eq!(byte_length("==", Encoding::Base64), 0);
    }
}
