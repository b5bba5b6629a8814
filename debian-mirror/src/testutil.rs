// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Helpers for tests: synthetic packages and an in-memory repository. */

use {
    crate::{
        catalog::{write_packages_index, PackageCatalog, PackageRecord, RepositoryId},
        control::ControlParagraph,
        error::{DebianError, Result},
        io::{ChecksumType, ContentDigest},
        repository::{DataResolver, Repository},
        sources::SourceCollection,
    },
    async_trait::async_trait,
    futures::{io::BufReader, AsyncBufRead, AsyncRead, AsyncReadExt},
    std::{
        collections::HashMap,
        pin::Pin,
        sync::{Arc, Mutex},
        task::{Context, Poll},
    },
};

/// Content of the package file of a synthetic package.
pub fn payload(name: &str, version: &str) -> Vec<u8> {
    format!("{} {} package file content\n", name, version).into_bytes()
}

/// A synthetic `amd64` package with extra or overridden stanza fields.
///
/// `Size` and `SHA256` describe [payload()].
pub fn record_with(name: &str, version: &str, fields: &[(&str, &str)]) -> PackageRecord {
    let data = payload(name, version);

    let mut p = ControlParagraph::default();
    p.set_field_from_string("Package", name);
    p.set_field_from_string("Version", version);
    p.set_field_from_string("Architecture", "amd64");
    p.set_field_from_string(
        "Filename",
        format!("pool/main/{}_{}_amd64.deb", name, version.replace(':', "%3a")),
    );
    p.set_field_from_string("Size", data.len());
    p.set_field_from_string(
        "SHA256",
        ContentDigest::compute(ChecksumType::Sha256, &data).digest_hex(),
    );

    for (k, v) in fields {
        p.set_field_from_string(k, v);
    }

    PackageRecord::from_paragraph(p, RepositoryId(0)).unwrap()
}

/// A synthetic package providing the given virtual names.
pub fn record(name: &str, version: &str, provides: &[&str]) -> PackageRecord {
    if provides.is_empty() {
        record_with(name, version, &[])
    } else {
        let provides = provides.join(", ");
        record_with(name, version, &[("Provides", provides.as_str())])
    }
}

/// Render records as `Packages` index text.
pub fn packages_text(records: &[PackageRecord]) -> String {
    let mut buf = vec![];
    write_packages_index(records.iter(), &mut buf).unwrap();

    String::from_utf8(buf).unwrap()
}

/// URL of the nth synthetic repository.
pub fn repository_url(index: usize) -> String {
    format!("http://repo{}.example.com/debian", index)
}

/// The nth synthetic repository: distribution `stable`, component `main`, `amd64`.
pub fn repository(index: usize) -> Repository {
    Repository::new(repository_url(index), "stable", ["main"], ["amd64"])
}

/// An in-memory repository.
///
/// Clones share state, so a test can keep a handle while a [SourceCollection] owns
/// another.
#[derive(Clone, Debug, Default)]
pub struct MemoryResolver {
    files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    corrupt: Arc<Mutex<HashMap<String, usize>>>,
    requests: Arc<Mutex<HashMap<String, usize>>>,
    stalled: Arc<Mutex<HashMap<String, usize>>>,
}

/// A reader that never produces data.
struct Stalled;

impl AsyncRead for Stalled {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut [u8],
    ) -> Poll<std::io::Result<usize>> {
        Poll::Pending
    }
}

impl MemoryResolver {
    pub fn insert(&self, path: &str, data: Vec<u8>) {
        self.files.lock().unwrap().insert(path.to_string(), data);
    }

    pub fn remove(&self, path: &str) {
        self.files.lock().unwrap().remove(path);
    }

    /// Serve damaged content for the next `times` requests of `path`.
    pub fn corrupt(&self, path: &str, times: usize) {
        self.corrupt.lock().unwrap().insert(path.to_string(), times);
    }

    /// Serve only the first `bytes` of `path`, then hang forever.
    pub fn stall(&self, path: &str, bytes: usize) {
        self.stalled.lock().unwrap().insert(path.to_string(), bytes);
    }

    /// Serve `path` normally again after [Self::stall].
    pub fn unstall(&self, path: &str) {
        self.stalled.lock().unwrap().remove(path);
    }

    /// Number of requests made for `path`, successful or not.
    pub fn request_count(&self, path: &str) -> usize {
        self.requests.lock().unwrap().get(path).copied().unwrap_or(0)
    }

    /// Serve a synthetic repository: its `Release`, `Packages` index and package files.
    pub fn serve_repository(&self, repository: &Repository, records: &[PackageRecord]) {
        self.insert(
            &repository.release_path(),
            format!(
                "Codename: {}\nComponents: {}\nArchitectures: {}\n",
                repository.distribution,
                repository.components.join(" "),
                repository.architectures.join(" ")
            )
            .into_bytes(),
        );

        for (component, arch) in repository.iter_component_architectures() {
            self.insert(
                &repository.packages_index_path(component, arch),
                packages_text(records).into_bytes(),
            );
        }

        for r in records {
            self.insert(r.filename(), payload(r.name(), r.version_str()));
        }
    }
}

#[async_trait]
impl DataResolver for MemoryResolver {
    async fn get_path(&self, path: &str) -> Result<Pin<Box<dyn AsyncBufRead + Send>>> {
        *self
            .requests
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_default() += 1;

        let mut data = self
            .files
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| {
                DebianError::RepositoryIoPath(
                    path.to_string(),
                    std::io::Error::new(std::io::ErrorKind::NotFound, "not in memory"),
                )
            })?;

        if let Some(remaining) = self.corrupt.lock().unwrap().get_mut(path) {
            if *remaining > 0 {
                *remaining -= 1;
                data.extend_from_slice(b"garbage");
            }
        }

        if let Some(bytes) = self.stalled.lock().unwrap().get(path) {
            data.truncate(*bytes);
            return Ok(Box::pin(BufReader::new(
                futures::io::Cursor::new(data).chain(Stalled),
            )));
        }

        Ok(Box::pin(futures::io::Cursor::new(data)))
    }
}

/// Build a collection of synthetic repositories holding the given records.
pub fn collection(repositories: Vec<Vec<PackageRecord>>) -> SourceCollection {
    collection_with_resolvers(repositories).0
}

/// Like [collection()], also returning handles to each repository's content.
///
/// Every repository serves its records through [MemoryResolver::serve_repository].
pub fn collection_with_resolvers(
    repositories: Vec<Vec<PackageRecord>>,
) -> (SourceCollection, Vec<MemoryResolver>) {
    let mut parts = vec![];
    let mut resolvers = vec![];

    for (index, records) in repositories.into_iter().enumerate() {
        let repo = repository(index);
        let resolver = MemoryResolver::default();
        resolver.serve_repository(&repo, &records);

        let catalog = PackageCatalog::from_records(RepositoryId(index), records);

        parts.push((
            repo,
            Box::new(resolver.clone()) as Box<dyn DataResolver>,
            catalog,
        ));
        resolvers.push(resolver);
    }

    (SourceCollection::from_parts(parts), resolvers)
}
