//! Plain-text field dumps.
//!
//! One row per line, every value right-aligned in six characters with one decimal, values
//! separated by a single space.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use heatgrid_core::error::Result;

use crate::storage::Field;

/// Write `field` to `writer`.
pub fn write_field<W: Write>(writer: &mut W, field: &Field) -> Result<()> {
    for row in field.rows() {
        let mut values = row.iter();
        if let Some(first) = values.next() {
            write!(writer, "{:6.1}", first)?;
        }
        for value in values {
            write!(writer, " {:6.1}", value)?;
        }
        writeln!(writer)?;
    }
    Ok(())
}

/// Render `field` as a string.
pub fn render_field(field: &Field) -> Result<String> {
    let mut out = Vec::with_capacity(field.size() * field.size() * 7);
    write_field(&mut out, field)?;
    Ok(String::from_utf8_lossy(&out).into_owned())
}

/// Write `field` to the file at `path`, replacing it.
pub fn save_field(path: impl AsRef<Path>, field: &Field) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    write_field(&mut writer, field)?;
    writer.flush()?;
    Ok(())
}
