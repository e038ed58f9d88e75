//! Generated output format.
//!
//! The output is a C++ source fragment that is also the only persisted state
//! of the tool, so the [`emitter`] and [`parser`] share the grammar defined
//! here:
//!
//! ```text
//! #define BINARY_EMBEDDER_ITEM_COUNT (<N>)
//! #define BINARY_EMBEDDER_NAMES s_BE_Names_<session>
//! #define BINARY_EMBEDDER_DATAS s_BE_Datas_<session>
//! #define BINARY_EMBEDDER_SIZES s_BE_Sizes_<session>
//! #define BINARY_EMBEDDER_TIMES s_BE_Times_<session>
//!
//! static wchar_t s_BE_Names_<session>_0[] = L"<escaped name>";
//! static unsigned char s_BE_Datas_<session>_0[] = {<decimal bytes>};
//! static wchar_t * s_BE_Names_<session>[] = { ... };
//! static unsigned char * s_BE_Datas_<session>[] = { ... };
//! static __int64 s_BE_Sizes_<session>[] = { 0x<size>, ... };
//! static __int64 s_BE_Times_<session>[] = { 0x<binary timestamp>, ... };
//! ```

pub mod emitter;
pub mod parser;

use crate::element::SessionId;
use crate::error::{Error, Result};

pub use emitter::Emitter;
pub use parser::{load_prior, parse_output, read_output, ParsedOutput};

/// Macro holding the number of embedded items
pub const DEFINE_ITEM_COUNT: &str = "#define BINARY_EMBEDDER_ITEM_COUNT";
/// Macro naming the array of element names
pub const DEFINE_NAMES: &str = "#define BINARY_EMBEDDER_NAMES";
/// Macro naming the array of element data
pub const DEFINE_DATAS: &str = "#define BINARY_EMBEDDER_DATAS";
/// Macro naming the array of element sizes
pub const DEFINE_SIZES: &str = "#define BINARY_EMBEDDER_SIZES";
/// Macro naming the array of element timestamps
pub const DEFINE_TIMES: &str = "#define BINARY_EMBEDDER_TIMES";

const NAMES_PREFIX: &str = "s_BE_Names_";
const DATAS_PREFIX: &str = "s_BE_Datas_";
const SIZES_PREFIX: &str = "s_BE_Sizes_";
const TIMES_PREFIX: &str = "s_BE_Times_";

/// Symbol names of the four generated arrays
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupNames {
    /// Array of element names
    pub names: String,
    /// Array of element data
    pub datas: String,
    /// Array of element sizes
    pub sizes: String,
    /// Array of element timestamps
    pub times: String,
}

impl GroupNames {
    /// Builds the group names for a session
    pub fn for_session(session: &SessionId) -> Self {
        Self {
            names: format!("{}{}", NAMES_PREFIX, session),
            datas: format!("{}{}", DATAS_PREFIX, session),
            sizes: format!("{}{}", SIZES_PREFIX, session),
            times: format!("{}{}", TIMES_PREFIX, session),
        }
    }
}

/// Recovers the session token from a names-group symbol
pub fn session_from_names_group(group: &str) -> Option<SessionId> {
    group
        .trim()
        .strip_prefix(NAMES_PREFIX)
        .and_then(SessionId::parse)
}

/// Text encoding of the generated file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TextEncoding {
    /// UTF-8 without a byte order mark
    #[default]
    Utf8,
    /// UTF-16 little endian with a byte order mark
    Utf16Le,
}

impl TextEncoding {
    /// Encodes output text
    pub fn encode(&self, text: &str) -> Vec<u8> {
        match self {
            TextEncoding::Utf8 => text.as_bytes().to_vec(),
            TextEncoding::Utf16Le => {
                let mut out = Vec::with_capacity(2 + text.len() * 2);
                out.extend_from_slice(&[0xFF, 0xFE]);
                for unit in text.encode_utf16() {
                    out.extend_from_slice(&unit.to_le_bytes());
                }
                out
            }
        }
    }
}

/// Decodes a previously written file, detecting the encoding from its BOM.
///
/// Files without a BOM are read as UTF-8.
pub fn decode_text(bytes: &[u8]) -> Result<String> {
    match bytes {
        [0xEF, 0xBB, 0xBF, rest @ ..] => utf8(rest),
        [0xFF, 0xFE, rest @ ..] => utf16(rest, u16::from_le_bytes),
        [0xFE, 0xFF, rest @ ..] => utf16(rest, u16::from_be_bytes),
        _ => utf8(bytes),
    }
}

fn utf8(bytes: &[u8]) -> Result<String> {
    String::from_utf8(bytes.to_vec())
        .map_err(|e| Error::malformed(0, format!("invalid UTF-8: {}", e)))
}

fn utf16(bytes: &[u8], unit: fn([u8; 2]) -> u16) -> Result<String> {
    if bytes.len() % 2 != 0 {
        return Err(Error::malformed(0, "odd byte count in UTF-16 text"));
    }
    let units: Vec<u16> = bytes.chunks_exact(2).map(|c| unit([c[0], c[1]])).collect();
    String::from_utf16(&units).map_err(|e| Error::malformed(0, format!("invalid UTF-16: {}", e)))
}

/// Escapes a logical name for a wide string literal
pub fn escape_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 8);
    for c in name.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            _ => out.push(c),
        }
    }
    out
}

/// Reverses [`escape_name`].
///
/// Unknown escape sequences are kept as written.
pub fn unescape_name(escaped: &str) -> String {
    let mut out = String::with_capacity(escaped.len());
    let mut chars = escaped.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('"') => out.push('"'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}
