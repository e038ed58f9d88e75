//! Output emission.
//!
//! [`Emitter`] renders the final element collection into the generated
//! source text. Rendering is deterministic: the same elements and session
//! always produce the same bytes.

use super::{escape_name, GroupNames, TextEncoding};
use super::{DEFINE_DATAS, DEFINE_ITEM_COUNT, DEFINE_NAMES, DEFINE_SIZES, DEFINE_TIMES};
use crate::element::{Element, SessionId};
use crate::error::{Error, Result};
use std::fmt::Write as FmtWrite;
use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::debug;

const BANNER: &str =
    "//////////////////////////////////////////////////////////////////////////";
const ENTRY_INDENT: &str = "                          ";
const CLOSE_INDENT: &str = "                             ";

/// Serializes elements into the generated output format
#[derive(Debug)]
pub struct Emitter<'a> {
    elements: &'a [Element],
    groups: GroupNames,
}

impl<'a> Emitter<'a> {
    /// Creates an emitter for the given elements and session
    pub fn new(elements: &'a [Element], session: &SessionId) -> Self {
        Self {
            elements,
            groups: GroupNames::for_session(session),
        }
    }

    /// Renders the output as a string
    pub fn render(&self) -> String {
        let capacity: usize = self.elements.iter().map(|e| e.data.len() + 128).sum();
        let mut output = String::with_capacity(capacity + 1024);
        self.write_to(&mut output).expect("String write cannot fail");
        output
    }

    /// Writes the output text to a formatter
    pub fn write_to(&self, w: &mut impl FmtWrite) -> std::fmt::Result {
        let groups = &self.groups;
        let count = self.elements.len();

        writeln!(w, "{}", BANNER)?;
        writeln!(w, "//Automatically generated by cppembed")?;
        writeln!(w, "{}", BANNER)?;
        writeln!(w)?;
        for define in [DEFINE_ITEM_COUNT, DEFINE_NAMES, DEFINE_DATAS, DEFINE_SIZES, DEFINE_TIMES] {
            if let Some(name) = define.strip_prefix("#define ") {
                writeln!(w, "#undef {}", name)?;
            }
        }
        writeln!(w, "{} ({})", DEFINE_ITEM_COUNT, count)?;
        writeln!(w, "{} {}", DEFINE_NAMES, groups.names)?;
        writeln!(w, "{} {}", DEFINE_DATAS, groups.datas)?;
        writeln!(w, "{} {}", DEFINE_SIZES, groups.sizes)?;
        writeln!(w, "{} {}", DEFINE_TIMES, groups.times)?;
        writeln!(w)?;

        writeln!(w, "// Elements (names)")?;
        for (i, element) in self.elements.iter().enumerate() {
            writeln!(
                w,
                "static wchar_t {}_{}[] = L\"{}\";",
                groups.names,
                i,
                escape_name(&element.name)
            )?;
        }
        writeln!(w)?;

        writeln!(w, "// Elements (data)")?;
        for (i, element) in self.elements.iter().enumerate() {
            writeln!(
                w,
                "static unsigned char {}_{}[] = {{{}}};",
                groups.datas, i, element.data
            )?;
        }
        writeln!(w)?;

        writeln!(w, "// Array of element names")?;
        writeln!(w, "static wchar_t * {}[] = {{", groups.names)?;
        for i in 0..count {
            writeln!(w, "{}{}_{},", ENTRY_INDENT, groups.names, i)?;
        }
        writeln!(w, "{}}};", CLOSE_INDENT)?;

        writeln!(w, "// Array of element data")?;
        writeln!(w, "static unsigned char * {}[] = {{", groups.datas)?;
        for i in 0..count {
            writeln!(w, "{}{}_{},", ENTRY_INDENT, groups.datas, i)?;
        }
        writeln!(w, "{}}};", CLOSE_INDENT)?;

        writeln!(w, "// Array of element data sizes")?;
        writeln!(w, "static __int64 {}[] = {{", groups.sizes)?;
        for element in self.elements {
            writeln!(w, "{}0x{:x},", ENTRY_INDENT, element.size_in_bytes)?;
        }
        writeln!(w, "{}}};", CLOSE_INDENT)?;

        writeln!(w, "// Array of element data timestamps")?;
        writeln!(w, "static __int64 {}[] = {{", groups.times)?;
        for element in self.elements {
            writeln!(w, "{}0x{:x},", ENTRY_INDENT, element.last_modify_time.to_binary())?;
        }
        writeln!(w, "{}}};", CLOSE_INDENT)
    }

    /// Writes the output file, replacing any existing one.
    ///
    /// The text goes to a temporary file next to `path` which is then
    /// renamed over it, so a failure leaves the previous output untouched.
    /// An existing output keeps its permissions; a new one gets the usual
    /// `0o666` minus umask instead of the temporary file's owner-only mode.
    pub fn write_file(&self, path: &Path, encoding: TextEncoding) -> Result<()> {
        let bytes = encoding.encode(&self.render());
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let existing = fs::metadata(path).ok().map(|m| m.permissions());

        let mut builder = tempfile::Builder::new();
        #[cfg(unix)]
        if existing.is_none() {
            use std::os::unix::fs::PermissionsExt;
            builder.permissions(fs::Permissions::from_mode(0o666));
        }
        let mut temp = builder.tempfile_in(dir).map_err(|e| Error::file_write(path, e))?;
        if let Some(permissions) = existing {
            temp.as_file()
                .set_permissions(permissions)
                .map_err(|e| Error::file_write(path, e))?;
        }
        temp.write_all(&bytes)
            .and_then(|()| temp.as_file().sync_all())
            .map_err(|e| Error::file_write(path, e))?;
        temp.persist(path).map_err(|e| Error::file_write(path, e.error))?;

        debug!(
            "Wrote {} elements ({} bytes) to {}",
            self.elements.len(),
            bytes.len(),
            path.display()
        );
        Ok(())
    }
}
