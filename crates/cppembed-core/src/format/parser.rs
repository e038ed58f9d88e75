//! Output parsing.
//!
//! Reads a previously generated output back into [`Element`]s. Parsing runs in
//! two passes over the lines:
//!
//! 1. Find the item count and the four group declarations. If any is missing
//!    or the count is zero, the file holds no prior state.
//! 2. Read `;`-terminated statements and assign names, data, sizes and
//!    timestamps into `count` pre-allocated slots.
//!
//! Every slot must be complete at the end, otherwise the file is rejected.
//! [`load_prior`] turns any failure into "no prior state", since prior
//! output only lets unchanged files skip re-embedding.

use super::{decode_text, session_from_names_group, unescape_name, GroupNames};
use super::{DEFINE_DATAS, DEFINE_ITEM_COUNT, DEFINE_NAMES, DEFINE_SIZES, DEFINE_TIMES};
use crate::element::{Element, SessionId, Timestamp};
use crate::error::{Error, Result};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use tracing::{debug, trace, warn};

/// Elements and session recovered from an existing output
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedOutput {
    /// Session token found in the names-group declaration, if valid
    pub session: Option<SessionId>,
    /// Reconstructed elements in declaration order
    pub elements: Vec<Element>,
}

impl ParsedOutput {
    /// Output with no prior state
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Loads prior state from `path`, never failing.
///
/// A missing file yields empty state. Unreadable or malformed files are
/// logged and also yield empty state, keeping the session token when the
/// header was still readable.
pub fn load_prior(path: &Path) -> ParsedOutput {
    let text = match read_text(path) {
        Ok(Some(text)) => text,
        Ok(None) => {
            debug!("Output file {} does not exist, will create a new one", path.display());
            return ParsedOutput::empty();
        }
        Err(e) => {
            warn!("error reading existing output: {}", e);
            warn!("all files will be re-embedded from scratch");
            return ParsedOutput::empty();
        }
    };

    match parse_output(&text) {
        Ok(parsed) => {
            debug!(
                "Read {} existing elements from {}",
                parsed.elements.len(),
                path.display()
            );
            parsed
        }
        Err(e) => {
            warn!("error parsing existing output '{}': {}", path.display(), e);
            warn!("all files will be re-embedded from scratch");
            ParsedOutput {
                session: scan_session(&text),
                elements: Vec::new(),
            }
        }
    }
}

/// Reads and parses `path`, returning empty state if it does not exist
pub fn read_output(path: &Path) -> Result<ParsedOutput> {
    match read_text(path)? {
        Some(text) => parse_output(&text),
        None => Ok(ParsedOutput::empty()),
    }
}

fn read_text(path: &Path) -> Result<Option<String>> {
    match fs::read(path) {
        Ok(bytes) => decode_text(&bytes).map(Some),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::file_read(path, e)),
    }
}

/// Parses generated output text
pub fn parse_output(text: &str) -> Result<ParsedOutput> {
    let mut lines = text.lines().enumerate();

    let mut count = None;
    let mut names = None;
    let mut datas = None;
    let mut sizes = None;
    let mut times = None;

    for (index, line) in lines.by_ref() {
        let line_no = index + 1;
        if let Some(rest) = after(line, DEFINE_ITEM_COUNT) {
            set_once(&mut count, parse_count(rest, line_no)?, line_no, "item count")?;
        } else if let Some(rest) = after(line, DEFINE_NAMES) {
            set_once(&mut names, group_name(rest, line_no)?, line_no, "names group")?;
        } else if let Some(rest) = after(line, DEFINE_DATAS) {
            set_once(&mut datas, group_name(rest, line_no)?, line_no, "datas group")?;
        } else if let Some(rest) = after(line, DEFINE_SIZES) {
            set_once(&mut sizes, group_name(rest, line_no)?, line_no, "sizes group")?;
        } else if let Some(rest) = after(line, DEFINE_TIMES) {
            set_once(&mut times, group_name(rest, line_no)?, line_no, "times group")?;
        }

        if count.is_some() && names.is_some() && datas.is_some() && sizes.is_some() && times.is_some()
        {
            break;
        }
    }

    let session = names.as_deref().and_then(session_from_names_group);
    let (Some(count), Some(names), Some(datas), Some(sizes), Some(times)) =
        (count, names, datas, sizes, times)
    else {
        trace!("Header incomplete, treating output as empty");
        return Ok(ParsedOutput {
            session,
            elements: Vec::new(),
        });
    };
    if count == 0 {
        return Ok(ParsedOutput {
            session,
            elements: Vec::new(),
        });
    }
    // Every element needs at least one statement of its own
    if count > text.len() {
        return Err(Error::malformed(0, format!("item count {} exceeds file size", count)));
    }

    let mut body = BodyParser::new(
        GroupNames {
            names,
            datas,
            sizes,
            times,
        },
        count,
    );

    while let Some((index, line)) = lines.next() {
        let mut statement = strip_comment(line).trim().to_string();
        if statement.is_empty() {
            continue;
        }
        while !statement.ends_with(';') {
            match lines.next() {
                Some((_, next)) => statement.push_str(strip_comment(next).trim()),
                None => break,
            }
        }
        body.apply(&statement, index + 1)?;
    }

    Ok(ParsedOutput {
        session,
        elements: body.finish()?,
    })
}

/// Finds the session token without parsing the rest of the file
fn scan_session(text: &str) -> Option<SessionId> {
    text.lines()
        .find_map(|line| after(line, DEFINE_NAMES))
        .and_then(session_from_names_group)
}

fn after<'a>(line: &'a str, token: &str) -> Option<&'a str> {
    line.find(token).map(|i| &line[i + token.len()..])
}

fn set_once<T>(slot: &mut Option<T>, value: T, line: usize, what: &str) -> Result<()> {
    if slot.is_some() {
        return Err(Error::malformed(line, format!("{} declared more than once", what)));
    }
    *slot = Some(value);
    Ok(())
}

fn parse_count(rest: &str, line: usize) -> Result<usize> {
    let open = rest.find('(');
    let close = rest.find(')');
    match (open, close) {
        (Some(open), Some(close)) if open < close => rest[open + 1..close]
            .trim()
            .parse()
            .map_err(|e| Error::malformed(line, format!("invalid item count: {}", e))),
        _ => Err(Error::malformed(line, "item count is not parenthesized")),
    }
}

fn group_name(rest: &str, line: usize) -> Result<String> {
    let name = rest.trim();
    if name.is_empty() {
        return Err(Error::malformed(line, "empty group name"));
    }
    Ok(name.to_string())
}

/// Removes a trailing `//` comment, ignoring `//` inside string literals
fn strip_comment(line: &str) -> &str {
    let bytes = line.as_bytes();
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
        } else if b == b'"' {
            in_string = true;
        } else if b == b'/' && bytes.get(i + 1) == Some(&b'/') {
            return &line[..i];
        }
    }
    line
}

/// Returns the body of the first string literal in `s`, still escaped
fn string_literal(s: &str) -> Option<&str> {
    let start = s.find('"')? + 1;
    let body = &s[start..];
    let mut escaped = false;
    for (i, c) in body.char_indices() {
        match c {
            '\\' if !escaped => escaped = true,
            '"' if !escaped => return Some(&body[..i]),
            _ => escaped = false,
        }
    }
    None
}

/// Returns the brace- or quote-delimited payload of `s`, verbatim
fn delimited_payload(s: &str) -> Option<&str> {
    match s.find('{') {
        Some(open) => {
            let inner = &s[open + 1..];
            inner.find('}').map(|close| &inner[..close])
        }
        None => string_literal(s),
    }
}

fn parse_hex(value: &str, line: usize) -> Result<u64> {
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value);
    u64::from_str_radix(digits, 16)
        .map_err(|e| Error::malformed(line, format!("invalid hex value '{}': {}", value, e)))
}

/// Element fields collected while parsing
#[derive(Debug, Clone, Default)]
struct PartialElement {
    name: Option<String>,
    data: Option<String>,
    size: Option<u64>,
    time: Option<Timestamp>,
}

impl PartialElement {
    fn into_element(self, index: usize) -> Result<Element> {
        let missing = |field| Error::IncompleteElement {
            index,
            missing: field,
        };
        Ok(Element {
            name: self.name.ok_or_else(|| missing("name"))?,
            data: self.data.ok_or_else(|| missing("data"))?,
            size_in_bytes: self.size.ok_or_else(|| missing("size"))?,
            last_modify_time: self.time.ok_or_else(|| missing("timestamp"))?,
        })
    }
}

/// Second-pass state: statement classification into pre-allocated slots
struct BodyParser {
    name_item: String,
    name_array: String,
    data_item: String,
    data_array: String,
    sizes_array: String,
    times_array: String,
    slots: Vec<PartialElement>,
}

impl BodyParser {
    fn new(groups: GroupNames, count: usize) -> Self {
        Self {
            name_item: format!("{}_", groups.names),
            name_array: format!("{}[]", groups.names),
            data_item: format!("{}_", groups.datas),
            data_array: format!("{}[]", groups.datas),
            sizes_array: format!("{}[]", groups.sizes),
            times_array: format!("{}[]", groups.times),
            slots: vec![PartialElement::default(); count],
        }
    }

    fn apply(&mut self, statement: &str, line: usize) -> Result<()> {
        if let Some(rest) = item_suffix(statement, &self.name_item, &self.name_array) {
            let index = self.index(rest, line)?;
            let literal = string_literal(value_part(statement, line)?)
                .ok_or_else(|| Error::malformed(line, "name is not a string literal"))?;
            self.slots[index].name = Some(unescape_name(literal));
        } else if let Some(rest) = item_suffix(statement, &self.data_item, &self.data_array) {
            let index = self.index(rest, line)?;
            let payload = delimited_payload(value_part(statement, line)?)
                .ok_or_else(|| Error::malformed(line, "data is not delimited"))?;
            self.slots[index].data = Some(payload.to_string());
        } else if statement.contains(&self.sizes_array) {
            for (index, value) in self.hex_list(statement, line)?.into_iter().enumerate() {
                self.slots[index].size = Some(value);
            }
        } else if statement.contains(&self.times_array) {
            for (index, value) in self.hex_list(statement, line)?.into_iter().enumerate() {
                let time = Timestamp::from_binary(value as i64)?;
                self.slots[index].time = Some(time);
            }
        }
        Ok(())
    }

    fn index(&self, rest: &str, line: usize) -> Result<usize> {
        let end = rest
            .find('[')
            .ok_or_else(|| Error::malformed(line, "missing '[' after element symbol"))?;
        let index: usize = rest[..end]
            .trim()
            .parse()
            .map_err(|e| Error::malformed(line, format!("invalid element index: {}", e)))?;
        if index >= self.slots.len() {
            return Err(Error::malformed(
                line,
                format!("element index {} out of range ({} items)", index, self.slots.len()),
            ));
        }
        Ok(index)
    }

    fn hex_list(&self, statement: &str, line: usize) -> Result<Vec<u64>> {
        let inner = value_part(statement, line).and_then(|value| {
            delimited_payload(value)
                .filter(|_| value.contains('{'))
                .ok_or_else(|| Error::malformed(line, "array is not brace-delimited"))
        })?;
        let values = inner
            .split(',')
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| parse_hex(v, line))
            .collect::<Result<Vec<_>>>()?;
        if values.len() > self.slots.len() {
            return Err(Error::malformed(
                line,
                format!("{} values for {} items", values.len(), self.slots.len()),
            ));
        }
        Ok(values)
    }

    fn finish(self) -> Result<Vec<Element>> {
        self.slots
            .into_iter()
            .enumerate()
            .map(|(index, partial)| partial.into_element(index))
            .collect()
    }
}

/// Text after a per-item symbol, unless the statement is the aggregate array
fn item_suffix<'a>(statement: &'a str, item: &str, array: &str) -> Option<&'a str> {
    if statement.contains(array) {
        return None;
    }
    statement.find(item).map(|i| &statement[i + item.len()..])
}

fn value_part(statement: &str, line: usize) -> Result<&str> {
    statement
        .find('=')
        .map(|i| &statement[i + 1..])
        .ok_or_else(|| Error::malformed(line, "statement has no '='"))
}
