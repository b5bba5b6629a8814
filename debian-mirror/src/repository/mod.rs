// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Debian repositories and access to their content.

A repository is a URL with a `dists/<distribution>` tree beneath it:

```text
<url>/dists/<distribution>/Release
<url>/dists/<distribution>/Release.gpg
<url>/dists/<distribution>/InRelease
<url>/dists/<distribution>/<component>/binary-<arch>/Packages[.xz|.gz|.bzip2]
<url>/dists/<distribution>/<component>/binary-<arch>/Release
```

Content is obtained through a [DataResolver], which abstracts over HTTP servers and
local directories.
*/

use {
    crate::{
        error::{DebianError, Result},
        io::{read_decompressed, read_to_string, Compression},
        release::ReleaseFile,
    },
    async_trait::async_trait,
    futures::{AsyncBufRead, AsyncReadExt},
    log::debug,
    serde::Deserialize,
    std::pin::Pin,
    url::Url,
};

pub mod filesystem;
#[cfg(feature = "http")]
pub mod http;

/// Architectures used when a repository doesn't name any.
pub const DEFAULT_ARCHITECTURES: &[&str] = &["amd64", "i386"];

/// Provides content at paths relative to some root.
#[async_trait]
pub trait DataResolver: Send + Sync {
    /// Get the content of a relative path as an async reader.
    ///
    /// Missing content is reported as [DebianError::RepositoryIoPath] with an
    /// [std::io::ErrorKind::NotFound] error.
    async fn get_path(&self, path: &str) -> Result<Pin<Box<dyn AsyncBufRead + Send>>>;

    /// Get the full content of a relative path.
    async fn get_path_bytes(&self, path: &str) -> Result<Vec<u8>> {
        let mut reader = self.get_path(path).await?;

        let mut buf = vec![];
        reader
            .read_to_end(&mut buf)
            .await
            .map_err(|e| DebianError::RepositoryIoPath(path.to_string(), e))?;

        Ok(buf)
    }
}

/// Fetch an index, trying each compression suffix in turn.
///
/// `path` names the uncompressed variant. The first variant that can be fetched and
/// decoded wins. [DebianError::RepositoryIndexNotFound] is returned if none can.
pub async fn fetch_decompressed(resolver: &dyn DataResolver, path: &str) -> Result<String> {
    for compression in Compression::fetch_order() {
        let candidate = format!("{}{}", path, compression.extension());

        let reader = match resolver.get_path(&candidate).await {
            Ok(reader) => reader,
            Err(e) => {
                debug!("{} unavailable: {}", candidate, e);
                continue;
            }
        };

        match read_to_string(read_decompressed(reader, compression)).await {
            Ok(text) => {
                debug!("fetched {}", candidate);
                return Ok(text);
            }
            Err(e) => {
                debug!("failed to decode {}: {}", candidate, e);
            }
        }
    }

    Err(DebianError::RepositoryIndexNotFound(path.to_string()))
}

/// Obtain a [DataResolver] for a repository URL.
///
/// Values containing `://` are parsed as URLs. `file://` maps to a local directory and
/// `http://`/`https://` to an HTTP client. Anything else is a filesystem path.
pub fn reader_from_url(url: &str) -> Result<Box<dyn DataResolver>> {
    if !url.contains("://") {
        return Ok(Box::new(filesystem::FilesystemRepositoryReader::new(url)));
    }

    let parsed = Url::parse(url)?;

    match parsed.scheme() {
        "file" => {
            let path = parsed
                .to_file_path()
                .map_err(|_| DebianError::RepositoryUrlUnsupported(url.to_string()))?;

            Ok(Box::new(filesystem::FilesystemRepositoryReader::new(path)))
        }
        #[cfg(feature = "http")]
        "http" | "https" => Ok(Box::new(http::HttpRepositoryClient::new(parsed)?)),
        _ => Err(DebianError::RepositoryUrlUnsupported(url.to_string())),
    }
}

fn default_architectures() -> Vec<String> {
    DEFAULT_ARCHITECTURES.iter().map(|x| x.to_string()).collect()
}

/// Where a distribution lives and which parts of it to consume.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Repository {
    /// Base URL, the value following `deb` in `sources.list`.
    pub url: String,

    /// Distribution name, e.g. `bullseye`.
    pub distribution: String,

    /// Components to consume, e.g. `main`.
    pub components: Vec<String>,

    /// Architectures to consume.
    #[serde(default = "default_architectures")]
    pub architectures: Vec<String>,
}

impl Repository {
    pub fn new(
        url: impl ToString,
        distribution: impl ToString,
        components: impl IntoIterator<Item = impl ToString>,
        architectures: impl IntoIterator<Item = impl ToString>,
    ) -> Self {
        Self {
            url: url.to_string(),
            distribution: distribution.to_string(),
            components: components.into_iter().map(|x| x.to_string()).collect(),
            architectures: architectures.into_iter().map(|x| x.to_string()).collect(),
        }
    }

    /// Construct an instance from a `sources.list` line.
    ///
    /// e.g. `deb http://deb.debian.org/debian bullseye main contrib`. An
    /// `[arch=amd64,arm64]` option block selects architectures; other options are ignored.
    pub fn from_sources_list_entry(entry: &str) -> Result<Self> {
        let mut words = entry.split_whitespace();

        match words.next() {
            Some("deb") => {}
            _ => return Err(DebianError::SourcesListEntry(entry.to_string())),
        }

        let mut architectures = None;
        let mut words = words.peekable();

        if words.peek().map_or(false, |w| w.starts_with('[')) {
            for word in words.by_ref() {
                let option = word.trim_start_matches('[').trim_end_matches(']');

                if let Some(value) = option.strip_prefix("arch=") {
                    architectures = Some(
                        value
                            .split(',')
                            .filter(|x| !x.is_empty())
                            .map(|x| x.to_string())
                            .collect::<Vec<_>>(),
                    );
                }

                if word.ends_with(']') {
                    break;
                }
            }
        }

        let url = words
            .next()
            .ok_or_else(|| DebianError::SourcesListEntry(entry.to_string()))?;
        let distribution = words
            .next()
            .ok_or_else(|| DebianError::SourcesListEntry(entry.to_string()))?;
        let components = words.map(|x| x.to_string()).collect::<Vec<_>>();

        if components.is_empty() {
            return Err(DebianError::SourcesListEntry(entry.to_string()));
        }

        Ok(Self {
            url: url.to_string(),
            distribution: distribution.to_string(),
            components,
            architectures: architectures.unwrap_or_else(default_architectures),
        })
    }

    /// Path of the distribution directory, relative to the repository root.
    pub fn distribution_path(&self) -> String {
        format!("dists/{}", self.distribution)
    }

    pub fn release_path(&self) -> String {
        format!("{}/Release", self.distribution_path())
    }

    /// Paths of optional top-level metadata: signatures and the inline-signed release.
    pub fn release_auxiliary_paths(&self) -> Vec<String> {
        let dist = self.distribution_path();

        vec![format!("{}/Release.gpg", dist), format!("{}/InRelease", dist)]
    }

    /// Path of a `Packages` index relative to the distribution directory.
    ///
    /// This is how `Release` manifests name the file.
    pub fn packages_manifest_path(&self, component: &str, architecture: &str) -> String {
        format!("{}/binary-{}/Packages", component, architecture)
    }

    /// Path of the uncompressed `Packages` index relative to the repository root.
    pub fn packages_index_path(&self, component: &str, architecture: &str) -> String {
        format!(
            "{}/{}",
            self.distribution_path(),
            self.packages_manifest_path(component, architecture)
        )
    }

    /// Path of the per-architecture `Release` file relative to the repository root.
    pub fn architecture_release_path(&self, component: &str, architecture: &str) -> String {
        format!(
            "{}/{}/binary-{}/Release",
            self.distribution_path(),
            component,
            architecture
        )
    }

    /// Iterate over the `(component, architecture)` pairs to consume.
    pub fn iter_component_architectures(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.components.iter().flat_map(move |component| {
            self.architectures
                .iter()
                .map(move |arch| (component.as_str(), arch.as_str()))
        })
    }

    /// The URL with its scheme removed, used to namespace local mirrors.
    ///
    /// `http://deb.debian.org/debian/` becomes `deb.debian.org/debian`.
    pub fn url_without_scheme(&self) -> &str {
        let url = match self.url.split_once("://") {
            Some((_, rest)) => rest,
            None => self.url.as_str(),
        };

        url.trim_matches('/')
    }

    /// URL of a file relative to the repository root.
    pub fn file_url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Fetch and parse the `Release` file.
    pub async fn fetch_release(&self, resolver: &dyn DataResolver) -> Result<ReleaseFile> {
        let path = self.release_path();
        let data = resolver.get_path_bytes(&path).await?;

        ReleaseFile::from_reader(std::io::Cursor::new(data))
    }

    /// Every component the `Release` file advertises, not just the consumed ones.
    pub async fn all_components(&self, resolver: &dyn DataResolver) -> Result<Vec<String>> {
        Ok(self
            .fetch_release(resolver)
            .await?
            .components()
            .into_iter()
            .map(|x| x.to_string())
            .collect())
    }
}
