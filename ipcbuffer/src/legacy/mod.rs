//! Positional, loosely typed entry points for callers that still speak the
//! old `Buffer(subject, encoding|key, offset|key, key)` and
//! `write(string, offset|encoding, encoding|offset)` conventions.
//!
//! Arguments are sniffed here and only here; everything past this module
//! goes through the typed [`View`] API.

use crate::codec::Encoding;
use crate::core::SegmentKey;
use crate::errors::{IpcBufferError, Result};
use crate::view::{Source, View};

#[derive(Clone, Debug)]
pub enum LegacyArg {
    Undefined,
    Number(f64),
    Text(String),
    Bytes(Vec<u8>),
    View(View),
}

impl LegacyArg {
    fn is_undefined(&self) -> bool {
        matches!(self, LegacyArg::Undefined)
    }
}

static UNDEFINED: LegacyArg = LegacyArg::Undefined;

const SUBJECT: &str =
    "a view (to clone), a number (length), bytes (octets) or a string (to copy)";
const ENCODING_OR_KEY: &str = "a number (ipc key) or a string (encoding or ipc name)";
const KEY: &str = "a number (ipc key) or a string (ipc name)";

enum Placement {
    Pooled,
    Keyed(SegmentKey),
}

/// Builds a view from positional arguments.
///
/// * `[view, length, offset]` makes another window on `view`'s segment,
///   `offset` counted from the start of the segment.
/// * `[length | bytes | text, encoding or key, key]` allocates, from the
///   pool or from a keyed segment. A string second argument naming an
///   encoding selects the encoding, any other string is a key.
pub fn construct(args: &[LegacyArg]) -> Result<View> {
    let arg = |i: usize| args.get(i).unwrap_or(&UNDEFINED);

    if let LegacyArg::View(parent) = arg(0) {
        let length = match arg(1) {
            LegacyArg::Undefined => parent.len(),
            LegacyArg::Number(n) => to_index(*n, 2, "a number (length)")?,
            _ => return Err(invalid(2, "a number (length)")),
        };
        let offset = match arg(2) {
            LegacyArg::Undefined => parent.offset(),
            LegacyArg::Number(n) => to_index(*n, 3, "a number (offset)")?,
            _ => return Err(invalid(3, "a number (offset)")),
        };
        if args.len() > 3 {
            return Err(invalid(4, "absent after a view's offset"));
        }
        return View::new(Source::View {
            view: parent,
            length,
            offset,
        });
    }

    let mut encoding = Encoding::Utf8;
    let mut placement = Placement::Pooled;
    match arg(1) {
        LegacyArg::Undefined => {}
        LegacyArg::Text(s) if looks_like_encoding(s) => encoding = s.parse()?,
        other => placement = key_at(other, 2, ENCODING_OR_KEY)?,
    }
    if !arg(2).is_undefined() {
        if let Placement::Keyed(_) = placement {
            return Err(invalid(3, "absent once a key was given"));
        }
        placement = key_at(arg(2), 3, KEY)?;
    }
    if args.len() > 3 {
        return Err(invalid(4, "absent"));
    }

    let source = match arg(0) {
        LegacyArg::Number(n) => Source::Length(to_index(*n, 1, SUBJECT)?),
        LegacyArg::Bytes(bytes) => Source::Bytes(bytes),
        LegacyArg::Text(text) => Source::Text(text, encoding),
        _ => return Err(invalid(1, SUBJECT)),
    };
    match placement {
        Placement::Pooled => View::new(source),
        Placement::Keyed(key) => match source {
            Source::Length(length) => View::new(Source::Key { length, key: &key }),
            _ => View::new_shared(source, &key),
        },
    }
}

/// `write(text, offset, encoding)`, also accepting `write(text, encoding,
/// offset)`: when `a` is not a finite number the two are swapped.
pub fn write(view: &View, text: &str, a: &LegacyArg, b: &LegacyArg) -> Result<usize> {
    let (offset, encoding) = match a {
        LegacyArg::Number(n) if n.is_finite() => (a, b),
        _ => (b, a),
    };
    let offset = match offset {
        LegacyArg::Undefined => 0,
        LegacyArg::Number(n) if n.is_nan() => 0,
        LegacyArg::Number(n) => to_index(*n, 2, "a non-negative number (offset)")?,
        _ => return Err(invalid(2, "a number (offset)")),
    };
    view.write(text, offset, encoding_at(encoding, 3)?)
}

/// `toString(encoding, start, end)`: missing or negative bounds fall back to
/// 0, a missing end to the view's length, and both are clamped to the view.
pub fn to_string(
    view: &View,
    encoding: &LegacyArg,
    start: &LegacyArg,
    end: &LegacyArg,
) -> Result<String> {
    let encoding = encoding_at(encoding, 1)?;
    let start = clamp_bound(start, 0, view.len(), 2)?;
    let end = clamp_bound(end, view.len(), view.len(), 3)?;
    view.decode(encoding, start..end)
}

fn clamp_bound(arg: &LegacyArg, missing: usize, len: usize, position: usize) -> Result<usize> {
    match arg {
        LegacyArg::Undefined => Ok(missing),
        LegacyArg::Number(n) if n.is_nan() => Ok(missing),
        LegacyArg::Number(n) if *n <= 0.0 => Ok(0),
        LegacyArg::Number(n) if *n >= len as f64 => Ok(len),
        LegacyArg::Number(n) => Ok(n.trunc() as usize),
        _ => Err(invalid(position, "a number")),
    }
}

fn encoding_at(arg: &LegacyArg, position: usize) -> Result<Encoding> {
    match arg {
        LegacyArg::Undefined => Ok(Encoding::Utf8),
        LegacyArg::Text(name) => name.parse(),
        _ => Err(invalid(position, "a string (encoding)")),
    }
}

fn key_at(arg: &LegacyArg, position: usize, expected: &'static str) -> Result<Placement> {
    match arg {
        LegacyArg::Number(n) if *n == 0.0 => Ok(Placement::Pooled),
        LegacyArg::Number(n) => {
            let id = to_index(*n, position, expected)?;
            u32::try_from(id)
                .map(|id| Placement::Keyed(SegmentKey::Id(id)))
                .map_err(|_| invalid(position, expected))
        }
        LegacyArg::Text(s) => s
            .parse()
            .map(Placement::Keyed)
            .map_err(|_| invalid(position, expected)),
        _ => Err(invalid(position, expected)),
    }
}

// Any string mentioning an encoding family counts as an encoding.
fn looks_like_encoding(s: &str) -> bool {
    let s = s.to_ascii_lowercase();
    ["ascii", "binary", "base64", "utf"]
        .iter()
        .any(|name| s.contains(name))
}

fn to_index(n: f64, position: usize, expected: &'static str) -> Result<usize> {
    if n.is_finite() && n >= 0.0 && n.fract() == 0.0 && n < usize::MAX as f64 {
        Ok(n as usize)
    } else {
        Err(invalid(position, expected))
    }
}

fn invalid(position: usize, expected: &'static str) -> IpcBufferError {
    IpcBufferError::InvalidArgument { position, expected }
}
