// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! I/O helpers: content digests, compression and digesting streams. */

use {
    crate::error::{DebianError, Result},
    async_compression::futures::bufread::{BzDecoder, GzipDecoder, XzDecoder},
    digest::DynDigest,
    futures::{AsyncBufRead, AsyncRead, AsyncReadExt},
    pin_project::pin_project,
    std::{
        fmt::Formatter,
        pin::Pin,
        task::{Context, Poll},
    },
};

/// A checksum flavor used by repository indices.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum ChecksumType {
    Md5,
    Sha1,
    Sha256,
}

impl ChecksumType {
    /// Name of the field in `Release` files holding this checksum flavor.
    pub fn field_name(&self) -> &'static str {
        match self {
            Self::Md5 => "MD5Sum",
            Self::Sha1 => "SHA1",
            Self::Sha256 => "SHA256",
        }
    }

    /// Name of the field in `Packages` stanzas holding this checksum flavor.
    pub fn package_field_name(&self) -> &'static str {
        match self {
            Self::Md5 => "MD5sum",
            Self::Sha1 => "SHA1",
            Self::Sha256 => "SHA256",
        }
    }

    /// Checksum flavors, strongest first.
    pub fn preferred_order() -> impl Iterator<Item = ChecksumType> {
        [Self::Sha256, Self::Sha1, Self::Md5].into_iter()
    }

    /// Create a new hasher of this flavor.
    pub fn new_hasher(&self) -> Box<dyn DynDigest + Send> {
        match self {
            Self::Md5 => Box::new(md5::Md5::default()),
            Self::Sha1 => Box::new(sha1::Sha1::default()),
            Self::Sha256 => Box::new(sha2::Sha256::default()),
        }
    }
}

/// A content digest.
#[derive(Clone, Eq, Hash, PartialEq)]
pub enum ContentDigest {
    Md5(Vec<u8>),
    Sha1(Vec<u8>),
    Sha256(Vec<u8>),
}

impl std::fmt::Debug for ContentDigest {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Md5(data) => write!(f, "Md5({})", hex::encode(data)),
            Self::Sha1(data) => write!(f, "Sha1({})", hex::encode(data)),
            Self::Sha256(data) => write!(f, "Sha256({})", hex::encode(data)),
        }
    }
}

impl ContentDigest {
    /// Parse a hex digest of the given flavor.
    pub fn from_hex_digest(checksum: ChecksumType, digest: &str) -> Result<Self> {
        let digest = hex::decode(digest.trim())?;

        Ok(match checksum {
            ChecksumType::Md5 => Self::Md5(digest),
            ChecksumType::Sha1 => Self::Sha1(digest),
            ChecksumType::Sha256 => Self::Sha256(digest),
        })
    }

    /// Parse a SHA-256 hex digest.
    pub fn sha256_hex(digest: &str) -> Result<Self> {
        Self::from_hex_digest(ChecksumType::Sha256, digest)
    }

    /// Compute the digest of a byte slice.
    pub fn compute(checksum: ChecksumType, data: &[u8]) -> Self {
        let mut hasher = checksum.new_hasher();
        hasher.update(data);

        Self::from_bytes(checksum, hasher.finalize().into_vec())
    }

    fn from_bytes(checksum: ChecksumType, digest: Vec<u8>) -> Self {
        match checksum {
            ChecksumType::Md5 => Self::Md5(digest),
            ChecksumType::Sha1 => Self::Sha1(digest),
            ChecksumType::Sha256 => Self::Sha256(digest),
        }
    }

    pub fn digest_bytes(&self) -> &[u8] {
        match self {
            Self::Md5(x) | Self::Sha1(x) | Self::Sha256(x) => x,
        }
    }

    pub fn digest_hex(&self) -> String {
        hex::encode(self.digest_bytes())
    }

    pub fn checksum_type(&self) -> ChecksumType {
        match self {
            Self::Md5(_) => ChecksumType::Md5,
            Self::Sha1(_) => ChecksumType::Sha1,
            Self::Sha256(_) => ChecksumType::Sha256,
        }
    }
}

/// Compression formats for package indices.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Compression {
    None,
    Xz,
    Gzip,
    Bzip2,
}

impl Compression {
    /// Filename suffix of files in this format.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::None => "",
            Self::Xz => ".xz",
            Self::Gzip => ".gz",
            Self::Bzip2 => ".bzip2",
        }
    }

    /// The order in which index variants are attempted.
    pub fn fetch_order() -> impl Iterator<Item = Compression> {
        [Self::None, Self::Xz, Self::Gzip, Self::Bzip2].into_iter()
    }
}

/// Wrap a reader with transparent decompression.
pub fn read_decompressed(
    stream: Pin<Box<dyn AsyncBufRead + Send>>,
    compression: Compression,
) -> Pin<Box<dyn AsyncRead + Send>> {
    match compression {
        Compression::None => Box::pin(stream),
        Compression::Xz => Box::pin(XzDecoder::new(stream)),
        Compression::Gzip => Box::pin(GzipDecoder::new(stream)),
        Compression::Bzip2 => Box::pin(BzDecoder::new(stream)),
    }
}

/// Read a stream to the end as UTF-8 text.
pub async fn read_to_string(mut reader: Pin<Box<dyn AsyncRead + Send>>) -> Result<String> {
    let mut s = String::new();
    reader.read_to_string(&mut s).await?;

    Ok(s)
}

/// An [AsyncRead] adapter that digests and counts everything read through it.
///
/// Unlike a validating reader, nothing is checked in-stream: the caller obtains the
/// digest with [Self::finish] once the source is exhausted and decides what a mismatch
/// means.
#[pin_project]
pub struct DigestingReader<R> {
    #[pin]
    source: R,
    checksum: ChecksumType,
    hasher: Box<dyn DynDigest + Send>,
    bytes_read: u64,
}

impl<R> DigestingReader<R> {
    pub fn new(source: R, checksum: ChecksumType) -> Self {
        Self {
            source,
            checksum,
            hasher: checksum.new_hasher(),
            bytes_read: 0,
        }
    }

    /// Number of bytes read so far.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Obtain the digest of all content read and the number of bytes read.
    pub fn finish(self) -> (ContentDigest, u64) {
        (
            ContentDigest::from_bytes(self.checksum, self.hasher.finalize().into_vec()),
            self.bytes_read,
        )
    }
}

impl<R> AsyncRead for DigestingReader<R>
where
    R: AsyncRead,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<std::io::Result<usize>> {
        let this = self.project();

        match this.source.poll_read(cx, buf) {
            Poll::Ready(Ok(size)) => {
                this.hasher.update(&buf[0..size]);
                *this.bytes_read += size as u64;

                Poll::Ready(Ok(size))
            }
            res => res,
        }
    }
}

/// Compare content against an expected digest.
pub fn verify_digest(data: &[u8], expected: &ContentDigest) -> Result<()> {
    let got = ContentDigest::compute(expected.checksum_type(), data);

    if &got == expected {
        Ok(())
    } else {
        Err(DebianError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!(
                "digest mismatch: expected {}, got {}",
                expected.digest_hex(),
                got.digest_hex()
            ),
        )))
    }
}
