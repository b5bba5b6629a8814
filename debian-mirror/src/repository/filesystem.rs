// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Filesystem backed repositories and mirrors. */

use {
    crate::{
        error::{DebianError, Result},
        io::{ContentDigest, DigestingReader},
        repository::DataResolver,
    },
    async_trait::async_trait,
    futures::{io::BufReader, AsyncBufRead, AsyncRead},
    std::{
        path::{Component, Path, PathBuf},
        pin::Pin,
    },
};

/// A readable repository rooted at a local directory.
#[derive(Clone, Debug)]
pub struct FilesystemRepositoryReader {
    root_dir: PathBuf,
}

impl FilesystemRepositoryReader {
    /// Construct a new instance, bound to the root directory specified.
    ///
    /// No validation of the passed path is performed.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            root_dir: path.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl DataResolver for FilesystemRepositoryReader {
    async fn get_path(&self, path: &str) -> Result<Pin<Box<dyn AsyncBufRead + Send>>> {
        let path = self.root_dir.join(path);

        let f = async_std::fs::File::open(&path)
            .await
            .map_err(|e| DebianError::RepositoryIoPath(format!("{}", path.display()), e))?;

        Ok(Box::pin(BufReader::new(f)))
    }
}

/// Reject relative paths that could escape the directory they are joined to.
pub fn validate_relative_path(path: &str) -> Result<&Path> {
    let p = Path::new(path);

    if path.is_empty()
        || p.components().any(|c| {
            matches!(
                c,
                Component::ParentDir | Component::RootDir | Component::Prefix(_)
            )
        })
    {
        return Err(DebianError::UnsafePath(path.to_string()));
    }

    Ok(p)
}

/// Writes files beneath a local directory.
#[derive(Clone, Debug)]
pub struct FilesystemRepositoryWriter {
    root_dir: PathBuf,
}

impl FilesystemRepositoryWriter {
    /// Construct a new instance, bound to the root directory specified.
    ///
    /// The directory does not need to exist.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            root_dir: path.as_ref().to_path_buf(),
        }
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Resolve a relative path to its location on disk.
    pub fn resolve_path(&self, path: &str) -> Result<PathBuf> {
        Ok(self.root_dir.join(validate_relative_path(path)?))
    }

    /// Whether a file exists at a path.
    pub async fn exists(&self, path: &str) -> Result<bool> {
        let dest_path = self.resolve_path(path)?;

        match async_std::fs::metadata(&dest_path).await {
            Ok(metadata) => Ok(metadata.is_file()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(DebianError::RepositoryIoPath(path.to_string(), e)),
        }
    }

    /// Write a file from a reader, creating parent directories as needed.
    ///
    /// Returns the number of bytes written.
    pub async fn write_path(
        &self,
        path: &str,
        reader: Pin<Box<dyn AsyncRead + Send + '_>>,
    ) -> Result<u64> {
        let dest_path = self.resolve_path(path)?;

        if let Some(parent) = dest_path.parent() {
            // Concurrent creation of the same directory is not an error.
            async_std::fs::create_dir_all(parent)
                .await
                .map_err(|e| DebianError::RepositoryIoPath(format!("{}", parent.display()), e))?;
        }

        let mut fh = async_std::fs::File::create(&dest_path)
            .await
            .map_err(|e| DebianError::RepositoryIoPath(format!("{}", dest_path.display()), e))?;

        let bytes_written = futures::io::copy(reader, &mut fh)
            .await
            .map_err(|e| DebianError::RepositoryIoPath(format!("{}", dest_path.display()), e))?;

        futures::AsyncWriteExt::flush(&mut fh)
            .await
            .map_err(|e| DebianError::RepositoryIoPath(format!("{}", dest_path.display()), e))?;

        Ok(bytes_written)
    }

    /// Remove the file at a path.
    ///
    /// A file that is already absent is not an error.
    pub async fn remove_path(&self, path: &str) -> Result<()> {
        let dest_path = self.resolve_path(path)?;

        match async_std::fs::remove_file(&dest_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DebianError::RepositoryIoPath(path.to_string(), e)),
        }
    }

    /// Move a file to another path, replacing any file there.
    pub async fn rename_path(&self, from: &str, to: &str) -> Result<()> {
        let from_path = self.resolve_path(from)?;
        let to_path = self.resolve_path(to)?;

        async_std::fs::rename(&from_path, &to_path)
            .await
            .map_err(|e| DebianError::RepositoryIoPath(to.to_string(), e))
    }

    /// Compute the digest of an existing file.
    pub async fn digest_path(&self, path: &str, expected: &ContentDigest) -> Result<ContentDigest> {
        let dest_path = self.resolve_path(path)?;

        let f = async_std::fs::File::open(&dest_path)
            .await
            .map_err(|e| DebianError::RepositoryIoPath(path.to_string(), e))?;

        let mut reader = DigestingReader::new(f, expected.checksum_type());
        futures::io::copy(&mut reader, &mut futures::io::sink())
            .await
            .map_err(|e| DebianError::RepositoryIoPath(path.to_string(), e))?;

        Ok(reader.finish().0)
    }

    /// Whether an existing file has the expected digest.
    pub async fn verify_path(&self, path: &str, expected: &ContentDigest) -> Result<bool> {
        Ok(&self.digest_path(path, expected).await? == expected)
    }
}
