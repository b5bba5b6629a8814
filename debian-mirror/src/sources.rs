// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Collections of repositories queried as one. */

use {
    crate::{
        catalog::{PackageCatalog, PackageId, PackageRecord, RepositoryId},
        dependency::{DependencyVariants, PackageRequest, SingleDependency},
        error::{DebianError, Result},
        repository::{reader_from_url, DataResolver, Repository},
    },
    log::info,
    std::{
        collections::{BTreeSet, HashSet},
        sync::Arc,
    },
};

/// A repository with the means to read it and its loaded catalog.
pub struct SourceRepository {
    id: RepositoryId,
    repository: Repository,
    reader: Box<dyn DataResolver>,
    catalog: PackageCatalog,
}

impl std::fmt::Debug for SourceRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceRepository")
            .field("id", &self.id)
            .field("repository", &self.repository)
            .field("packages", &self.catalog.len())
            .finish()
    }
}

impl SourceRepository {
    pub fn id(&self) -> RepositoryId {
        self.id
    }

    pub fn repository(&self) -> &Repository {
        &self.repository
    }

    pub fn reader(&self) -> &dyn DataResolver {
        self.reader.as_ref()
    }

    pub fn catalog(&self) -> &PackageCatalog {
        &self.catalog
    }
}

/// An ordered list of repositories with union views over their catalogs.
///
/// Queries visit repositories in list order and each catalog in index order, so the
/// order of returned candidates is deterministic.
#[derive(Debug, Default)]
pub struct SourceCollection {
    sources: Vec<SourceRepository>,
}

impl SourceCollection {
    /// Load catalogs for repositories, deriving readers from their URLs.
    pub async fn load(repositories: impl IntoIterator<Item = Repository>) -> Result<Self> {
        let mut with_readers = vec![];
        for repository in repositories {
            let reader = reader_from_url(&repository.url)?;
            with_readers.push((repository, reader));
        }

        Self::load_with_readers(with_readers).await
    }

    /// Load catalogs for repositories read through the given resolvers.
    ///
    /// Repositories are loaded one after another.
    pub async fn load_with_readers(
        repositories: impl IntoIterator<Item = (Repository, Box<dyn DataResolver>)>,
    ) -> Result<Self> {
        let mut sources = vec![];

        for (index, (repository, reader)) in repositories.into_iter().enumerate() {
            let id = RepositoryId(index);

            info!(
                "loading package indices of {} {}",
                repository.url, repository.distribution
            );
            let catalog = PackageCatalog::load(id, &repository, reader.as_ref()).await?;

            sources.push(SourceRepository {
                id,
                repository,
                reader,
                catalog,
            });
        }

        Ok(Self { sources })
    }

    /// Assemble a collection from catalogs that are already built.
    ///
    /// Each catalog must have been built with the [RepositoryId] of its position.
    pub fn from_parts(
        parts: impl IntoIterator<Item = (Repository, Box<dyn DataResolver>, PackageCatalog)>,
    ) -> Self {
        Self {
            sources: parts
                .into_iter()
                .enumerate()
                .map(|(index, (repository, reader, catalog))| SourceRepository {
                    id: RepositoryId(index),
                    repository,
                    reader,
                    catalog,
                })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Iterate over repositories in list order.
    pub fn iter(&self) -> impl Iterator<Item = &SourceRepository> {
        self.sources.iter()
    }

    /// Resolve the repository a record belongs to.
    pub fn repository(&self, id: RepositoryId) -> Option<&SourceRepository> {
        self.sources.get(id.0)
    }

    /// Repositories whose URL equals `url`, ignoring trailing slashes.
    pub fn find_by_url<'a>(&'a self, url: &'a str) -> impl Iterator<Item = &'a SourceRepository> {
        self.sources
            .iter()
            .filter(move |s| s.repository.url.trim_end_matches('/') == url.trim_end_matches('/'))
    }

    /// Every record across all repositories.
    pub fn iter_packages(&self) -> impl Iterator<Item = &Arc<PackageRecord>> {
        self.sources.iter().flat_map(|s| s.catalog.iter_packages())
    }

    /// Records named `name` in any repository.
    pub fn get<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Arc<PackageRecord>> {
        self.sources.iter().flat_map(move |s| s.catalog.packages(name))
    }

    /// Union of the architectures of all repositories.
    pub fn architectures(&self) -> BTreeSet<&str> {
        self.sources
            .iter()
            .flat_map(|s| s.repository.architectures.iter().map(|x| x.as_str()))
            .collect()
    }

    /// Every record satisfying a single alternative.
    ///
    /// Candidates are found through the provided-name index, so virtual packages resolve
    /// to their providers.
    pub fn packages_fulfilling<'a>(
        &'a self,
        dependency: &'a SingleDependency,
    ) -> impl Iterator<Item = &'a Arc<PackageRecord>> {
        self.sources.iter().flat_map(move |s| {
            s.catalog
                .provided(&dependency.package)
                .filter(move |p| dependency.fulfilled(p))
        })
    }

    /// Every record satisfying any alternative of a group, without duplicates.
    ///
    /// Alternatives are visited in declaration order.
    pub fn packages_fulfilling_variants(
        &self,
        variants: &DependencyVariants,
    ) -> Vec<Arc<PackageRecord>> {
        let mut seen = HashSet::<&PackageId>::new();
        let mut res = vec![];

        for dependency in variants.iter() {
            for p in self.packages_fulfilling(dependency) {
                if seen.insert(p.id()) {
                    res.push(p.clone());
                }
            }
        }

        res
    }

    /// Every record matching a request.
    pub fn packages_matching(&self, request: &PackageRequest) -> Vec<Arc<PackageRecord>> {
        match request {
            PackageRequest::Name(name) => self.get(name).cloned().collect(),
            PackageRequest::Constraint(variants) => self.packages_fulfilling_variants(variants),
        }
    }

    /// Find a record by exact name and version in the first repository having it.
    pub fn get_package(&self, name: &str, version: &str) -> Result<&Arc<PackageRecord>> {
        self.sources
            .iter()
            .find_map(|s| s.catalog.get_package(name, version).ok())
            .ok_or_else(|| DebianError::PackageNotFound(name.to_string(), version.to_string()))
    }

    /// Records named `name` whose version starts with `prefix`, in every repository.
    pub fn packages_with_version_prefix<'a>(
        &'a self,
        name: &'a str,
        prefix: &'a str,
    ) -> impl Iterator<Item = &'a Arc<PackageRecord>> {
        self.sources
            .iter()
            .flat_map(move |s| s.catalog.packages_with_version_prefix(name, prefix))
    }

    /// Download URL of a record's package file.
    pub fn package_url(&self, record: &PackageRecord) -> Result<String> {
        let source = self.repository(record.repository()).ok_or_else(|| {
            DebianError::PackageNotFound(record.name().to_string(), record.version_str().to_string())
        })?;

        Ok(source.repository.file_url(record.filename()))
    }
}
