// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! `Release` descriptors.

A `Release` file is a single control paragraph describing a distribution: what it is,
which components and architectures it carries and the checksums of every index file
beneath it.

See <https://wiki.debian.org/DebianRepository/Format#A.22Release.22_files>.
*/

use {
    crate::{
        control::{ControlFile, ControlParagraph},
        error::{DebianError, Result},
        io::{ChecksumType, ContentDigest},
    },
    chrono::{DateTime, TimeZone, Utc},
    std::{io::BufRead, str::FromStr},
};

/// An entry in a `Release` checksum manifest.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReleaseFileEntry<'a> {
    /// Path relative to the `dists/<distribution>` directory.
    pub path: &'a str,
    pub digest: ContentDigest,
    pub size: u64,
}

/// A parsed `Release` file.
#[derive(Clone, Debug)]
pub struct ReleaseFile {
    paragraph: ControlParagraph,
}

impl From<ControlParagraph> for ReleaseFile {
    fn from(paragraph: ControlParagraph) -> Self {
        Self { paragraph }
    }
}

impl ReleaseFile {
    /// Parse a `Release` file from a reader.
    ///
    /// Exactly one paragraph must be present.
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self> {
        let mut paragraphs = ControlFile::parse_reader(reader)?
            .into_paragraphs()
            .collect::<Vec<_>>();

        match paragraphs.len() {
            1 => Ok(Self::from(paragraphs.remove(0))),
            n => Err(DebianError::ReleaseControlParagraphMismatch(n)),
        }
    }

    /// Parse a `Release` file from text.
    pub fn parse_str(s: &str) -> Result<Self> {
        Self::from_reader(std::io::Cursor::new(s.as_bytes()))
    }

    /// The underlying control paragraph.
    pub fn paragraph(&self) -> &ControlParagraph {
        &self.paragraph
    }

    pub fn origin(&self) -> Option<&str> {
        self.paragraph.field_str("Origin")
    }

    pub fn label(&self) -> Option<&str> {
        self.paragraph.field_str("Label")
    }

    pub fn suite(&self) -> Option<&str> {
        self.paragraph.field_str("Suite")
    }

    pub fn version(&self) -> Option<&str> {
        self.paragraph.field_str("Version")
    }

    pub fn codename(&self) -> Option<&str> {
        self.paragraph.field_str("Codename")
    }

    pub fn description(&self) -> Option<&str> {
        self.paragraph.field_str("Description")
    }

    /// Components advertised by the distribution.
    pub fn components(&self) -> Vec<&str> {
        self.paragraph
            .field_iter_value_words("Components")
            .map(|words| words.collect())
            .unwrap_or_default()
    }

    /// Architectures advertised by the distribution.
    pub fn architectures(&self) -> Vec<&str> {
        self.paragraph
            .field_iter_value_words("Architectures")
            .map(|words| words.collect())
            .unwrap_or_default()
    }

    /// The raw `Date` value.
    pub fn date_str(&self) -> Option<&str> {
        self.paragraph.field_str("Date")
    }

    /// When the release was generated, normalized to UTC.
    pub fn date(&self) -> Option<Result<DateTime<Utc>>> {
        self.date_str().map(|value| {
            let timestamp = mailparse::dateparse(value)?;

            Utc.timestamp_opt(timestamp, 0).single().ok_or_else(|| {
                DebianError::ControlParseError(format!("date out of range: {}", value))
            })
        })
    }

    /// Whether clients should fetch indices through `by-hash` paths.
    pub fn acquire_by_hash(&self) -> Option<bool> {
        self.paragraph.field_bool("Acquire-By-Hash")
    }

    /// Iterate over entries of the checksum manifest of the given flavor.
    ///
    /// Returns [None] if the manifest is absent. Entries are parsed as they are consumed.
    pub fn iter_index_files(
        &self,
        checksum: ChecksumType,
    ) -> Option<impl Iterator<Item = Result<ReleaseFileEntry<'_>>> + '_> {
        self.paragraph
            .field_iter_value_lines(checksum.field_name())
            .map(move |lines| {
                lines.map(move |line| {
                    // <digest> <size> <path>
                    let mut parts = line.split_ascii_whitespace();

                    let digest = parts.next().ok_or(DebianError::ReleaseMissingDigest)?;
                    let size = parts.next().ok_or(DebianError::ReleaseMissingSize)?;
                    let path = parts.next().ok_or(DebianError::ReleaseMissingPath)?;

                    if parts.next().is_some() {
                        return Err(DebianError::ReleasePathWithSpaces(line.to_string()));
                    }

                    Ok(ReleaseFileEntry {
                        path,
                        digest: ContentDigest::from_hex_digest(checksum, digest)?,
                        size: u64::from_str(size)?,
                    })
                })
            })
    }

    /// Find the manifest entry for a path using the strongest checksum available.
    pub fn find_index_file(&self, path: &str) -> Result<Option<ReleaseFileEntry<'_>>> {
        for checksum in ChecksumType::preferred_order() {
            if let Some(entries) = self.iter_index_files(checksum) {
                for entry in entries {
                    let entry = entry?;
                    if entry.path == path {
                        return Ok(Some(entry));
                    }
                }
            }
        }

        Ok(None)
    }
}
