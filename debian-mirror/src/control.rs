// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Control paragraphs (stanzas).

Repository index files like `Packages` and `Release` are sequences of
*paragraphs* separated by blank lines. Each paragraph is an ordered series of
`Key: value` fields, where values may continue onto following lines that
begin with whitespace.

See <https://www.debian.org/doc/debian-policy/ch-controlfields.html>.
*/

use {
    crate::error::{DebianError, Result},
    futures::{AsyncBufRead, AsyncBufReadExt},
    std::{
        collections::HashMap,
        io::{BufRead, Write},
        str::FromStr,
    },
};

/// A field in a control paragraph.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ControlField {
    name: String,
    value: String,
}

impl ControlField {
    /// Construct an instance from a field name and value.
    pub fn new(name: impl ToString, value: impl ToString) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
        }
    }

    /// The name of this field.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The raw value of this field.
    ///
    /// Continuation lines are preserved, including their leading whitespace.
    pub fn value_str(&self) -> &str {
        &self.value
    }

    /// Iterate over whitespace delimited words in the value.
    pub fn iter_words(&self) -> impl Iterator<Item = &str> {
        self.value.split_ascii_whitespace()
    }

    /// Iterate over lines in the value with leading whitespace stripped.
    ///
    /// Empty lines are skipped. Multi-line fields like `SHA256` in `Release` files
    /// typically have an empty first line.
    pub fn iter_lines(&self) -> impl Iterator<Item = &str> {
        self.value
            .lines()
            .map(|l| l.trim_start())
            .filter(|l| !l.is_empty())
    }

    /// Write the field to a writer, terminated by a newline.
    pub fn write<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_all(self.name.as_bytes())?;
        writer.write_all(b":")?;
        // Multi-line values with an empty first line are written without the space.
        if !self.value.starts_with('\n') {
            writer.write_all(b" ")?;
        }
        writer.write_all(self.value.as_bytes())?;
        writer.write_all(b"\n")
    }
}

/// A paragraph (stanza) in a control file.
///
/// Field names are case insensitive on read and case preserving on set. A paragraph
/// holds at most one field of a given name.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
pub struct ControlParagraph {
    fields: Vec<ControlField>,
}

impl ControlParagraph {
    /// Whether the paragraph has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Set a field, replacing any existing field with the same name.
    pub fn set_field(&mut self, field: ControlField) {
        if let Some(existing) = self
            .fields
            .iter_mut()
            .find(|f| f.name.eq_ignore_ascii_case(&field.name))
        {
            *existing = field;
        } else {
            self.fields.push(field);
        }
    }

    /// Set a field from a name and value.
    pub fn set_field_from_string(&mut self, name: impl ToString, value: impl ToString) {
        self.set_field(ControlField::new(name, value));
    }

    /// Whether a named field is present.
    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    /// Iterate over fields in insertion order.
    pub fn iter_fields(&self) -> impl Iterator<Item = &ControlField> {
        self.fields.iter()
    }

    /// Obtain the field with a given name.
    pub fn field(&self, name: &str) -> Option<&ControlField> {
        self.fields.iter().find(|f| f.name.eq_ignore_ascii_case(name))
    }

    /// Obtain the raw string value of the named field.
    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.field(name).map(|f| f.value_str())
    }

    /// Obtain the raw string value of a field that must be present.
    ///
    /// Returns [DebianError::ControlRequiredFieldMissing] if absent.
    pub fn required_field_str(&self, name: &str) -> Result<&str> {
        self.field_str(name)
            .ok_or_else(|| DebianError::ControlRequiredFieldMissing(name.to_string()))
    }

    /// Obtain the value of a field parsed as a [u64].
    pub fn field_u64(&self, name: &str) -> Option<Result<u64>> {
        self.field_str(name)
            .map(|v| u64::from_str(v.trim()).map_err(DebianError::from))
    }

    /// Obtain the value of a field evaluated as a boolean.
    ///
    /// The field is [true] iff its value is `yes`.
    pub fn field_bool(&self, name: &str) -> Option<bool> {
        self.field_str(name).map(|v| v.trim() == "yes")
    }

    /// Iterate over whitespace delimited words of the named field.
    pub fn field_iter_value_words(&self, name: &str) -> Option<impl Iterator<Item = &str>> {
        self.field(name).map(|f| f.iter_words())
    }

    /// Iterate over non-empty lines of the named field.
    pub fn field_iter_value_lines(&self, name: &str) -> Option<impl Iterator<Item = &str>> {
        self.field(name).map(|f| f.iter_lines())
    }

    /// Convert this paragraph to a [HashMap] of field names to raw values.
    pub fn as_str_hash_map(&self) -> HashMap<&str, &str> {
        self.fields
            .iter()
            .map(|f| (f.name.as_str(), f.value.as_str()))
            .collect()
    }

    /// Serialize the paragraph to a writer.
    ///
    /// No blank line is written after the final field. Writers of multiple paragraphs
    /// must emit the separator themselves.
    pub fn write<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        for field in &self.fields {
            field.write(writer)?;
        }

        Ok(())
    }
}

impl std::fmt::Display for ControlParagraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut buf = vec![];
        self.write(&mut buf).map_err(|_| std::fmt::Error)?;
        f.write_str(&String::from_utf8_lossy(&buf))
    }
}

/// Line-fed parser state.
///
/// Lines are written one at a time and completed paragraphs are emitted as soon as
/// the terminating blank line is seen.
#[derive(Clone, Debug, Default)]
pub struct ControlFileParser {
    paragraph: ControlParagraph,
    field: Option<String>,
}

impl ControlFileParser {
    /// Feed a line to the parser.
    ///
    /// Returns the completed paragraph if this line terminated one.
    pub fn write_line(&mut self, line: &str) -> Result<Option<ControlParagraph>> {
        let line = line.trim_end_matches(&['\n', '\r'][..]);

        if line.trim().is_empty() {
            self.flush_field()?;

            return Ok(if self.paragraph.is_empty() {
                None
            } else {
                Some(std::mem::take(&mut self.paragraph))
            });
        }

        // Comments are allowed in some control files.
        if line.starts_with('#') {
            return Ok(None);
        }

        if line.starts_with(' ') || line.starts_with('\t') {
            match self.field.as_mut() {
                Some(field) => {
                    field.push('\n');
                    field.push_str(line);
                }
                None => {
                    return Err(DebianError::ControlParseError(format!(
                        "continuation line without a field: '{}'",
                        line
                    )));
                }
            }
        } else {
            self.flush_field()?;
            self.field = Some(line.to_string());
        }

        Ok(None)
    }

    /// Finish parsing, returning any in-progress paragraph.
    pub fn finish(mut self) -> Result<Option<ControlParagraph>> {
        self.flush_field()?;

        Ok(if self.paragraph.is_empty() {
            None
        } else {
            Some(self.paragraph)
        })
    }

    fn flush_field(&mut self) -> Result<()> {
        if let Some(raw) = self.field.take() {
            let (name, value) = raw.split_once(':').ok_or_else(|| {
                DebianError::ControlParseError(format!("error parsing line '{}'; missing colon", raw))
            })?;

            let name = name.trim();
            if name.is_empty() {
                return Err(DebianError::ControlParseError(format!(
                    "error parsing line '{}'; empty field name",
                    raw
                )));
            }

            // Strip whitespace after the colon but keep the layout of continuation lines.
            let value = value.trim_start_matches(&[' ', '\t'][..]).trim_end();

            self.paragraph.set_field_from_string(name, value);
        }

        Ok(())
    }
}

/// An iterator of [ControlParagraph] read from a [BufRead].
pub struct ControlParagraphReader<R: BufRead> {
    reader: R,
    parser: Option<ControlFileParser>,
}

impl<R: BufRead> ControlParagraphReader<R> {
    /// Create a new instance bound to a reader.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            parser: Some(ControlFileParser::default()),
        }
    }

    fn next_paragraph(&mut self) -> Result<Option<ControlParagraph>> {
        let mut line = String::new();

        while let Some(parser) = self.parser.as_mut() {
            line.clear();

            if self.reader.read_line(&mut line)? == 0 {
                return match self.parser.take() {
                    Some(parser) => parser.finish(),
                    None => Ok(None),
                };
            }

            if let Some(paragraph) = parser.write_line(&line)? {
                return Ok(Some(paragraph));
            }
        }

        Ok(None)
    }
}

impl<R: BufRead> Iterator for ControlParagraphReader<R> {
    type Item = Result<ControlParagraph>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_paragraph() {
            Ok(Some(p)) => Some(Ok(p)),
            Ok(None) => None,
            Err(e) => {
                // Don't keep emitting errors for the same corrupt input.
                self.parser = None;
                Some(Err(e))
            }
        }
    }
}

/// An asynchronous reader of [ControlParagraph].
pub struct ControlParagraphAsyncReader<R> {
    reader: R,
    parser: Option<ControlFileParser>,
}

impl<R> ControlParagraphAsyncReader<R>
where
    R: AsyncBufRead + Unpin,
{
    /// Create a new instance bound to a reader.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            parser: Some(ControlFileParser::default()),
        }
    }

    /// Read the next paragraph.
    ///
    /// Resolves to [None] at end of input.
    pub async fn read_paragraph(&mut self) -> Result<Option<ControlParagraph>> {
        let mut line = String::new();

        while let Some(parser) = self.parser.as_mut() {
            line.clear();

            if self.reader.read_line(&mut line).await? == 0 {
                return match self.parser.take() {
                    Some(parser) => parser.finish(),
                    None => Ok(None),
                };
            }

            if let Some(paragraph) = parser.write_line(&line)? {
                return Ok(Some(paragraph));
            }
        }

        Ok(None)
    }
}

/// An ordered series of paragraphs.
#[derive(Clone, Debug, Default)]
pub struct ControlFile {
    paragraphs: Vec<ControlParagraph>,
}

impl ControlFile {
    /// Parse a control file from a reader.
    pub fn parse_reader<R: BufRead>(reader: R) -> Result<Self> {
        Ok(Self {
            paragraphs: ControlParagraphReader::new(reader).collect::<Result<Vec<_>>>()?,
        })
    }

    /// Parse a control file from a string.
    pub fn parse_str(s: &str) -> Result<Self> {
        Self::parse_reader(std::io::Cursor::new(s.as_bytes()))
    }

    /// Add a paragraph.
    pub fn add_paragraph(&mut self, p: ControlParagraph) {
        self.paragraphs.push(p);
    }

    /// Obtain paragraphs in this file.
    pub fn paragraphs(&self) -> impl Iterator<Item = &ControlParagraph> {
        self.paragraphs.iter()
    }

    /// Obtain paragraphs, consuming self.
    pub fn into_paragraphs(self) -> impl Iterator<Item = ControlParagraph> {
        self.paragraphs.into_iter()
    }

    /// Serialize to a writer, separating paragraphs with blank lines.
    pub fn write<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        for (i, p) in self.paragraphs.iter().enumerate() {
            if i > 0 {
                writer.write_all(b"\n")?;
            }
            p.write(writer)?;
        }

        Ok(())
    }
}
