// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Selection of the packages a mirror holds.

A [PackageFilter] contributes packages to a [MirrorTargetSet]. Filters run in the
order they were added and their output is merged by package identity.
*/

use {
    crate::{
        catalog::{PackageId, PackageRecord},
        dependency::PackageRequest,
        error::{DebianError, Result},
        resolver::{DependencyResolver, PackageSet},
        sources::SourceCollection,
    },
    log::info,
    std::{fmt::Debug, sync::Arc},
};

/// What a filter can see while producing packages.
pub struct FilterContext<'a> {
    pub sources: &'a SourceCollection,

    /// Packages selected by filters that ran earlier.
    pub selected: &'a MirrorTargetSet,

    /// Whether dependency expansion follows `Recommends`.
    pub follow_recommends: bool,
}

/// Contributes packages to a mirror.
pub trait PackageFilter: Debug + Send + Sync {
    /// Produce packages to add to the mirror.
    ///
    /// Producing a package that is already selected is harmless.
    fn produce(&self, context: &FilterContext<'_>) -> Result<Vec<Arc<PackageRecord>>>;
}

/// Every package of one architecture from the repositories at a URL.
///
/// Dependencies are not expanded.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ArchitectureFilter {
    pub url: String,
    pub architecture: String,
}

impl ArchitectureFilter {
    pub fn new(url: impl ToString, architecture: impl ToString) -> Self {
        Self {
            url: url.to_string(),
            architecture: architecture.to_string(),
        }
    }
}

impl PackageFilter for ArchitectureFilter {
    fn produce(&self, context: &FilterContext<'_>) -> Result<Vec<Arc<PackageRecord>>> {
        let mut matched_repository = false;
        let mut res = vec![];

        for source in context.sources.find_by_url(&self.url) {
            matched_repository = true;

            res.extend(
                source
                    .catalog()
                    .iter_packages()
                    .filter(|p| p.architecture() == self.architecture)
                    .cloned(),
            );
        }

        if !matched_repository {
            return Err(DebianError::RepositoryNotConfigured(self.url.clone()));
        }

        Ok(res)
    }
}

/// The dependency closure of every package matching a request.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DependencyFilter {
    pub request: PackageRequest,
}

impl DependencyFilter {
    pub fn new(request: PackageRequest) -> Self {
        Self { request }
    }

    /// Construct an instance from a package name or relationship expression.
    pub fn parse(expression: &str) -> Result<Self> {
        Ok(Self::new(PackageRequest::parse(expression)?))
    }
}

impl PackageFilter for DependencyFilter {
    fn produce(&self, context: &FilterContext<'_>) -> Result<Vec<Arc<PackageRecord>>> {
        Ok(DependencyResolver::new(context.sources)
            .follow_recommends(context.follow_recommends)
            .resolve_request(&self.request)
            .into_values()
            .collect())
    }
}

/// The packages a mirror will hold, deduplicated by identity.
#[derive(Clone, Debug, Default)]
pub struct MirrorTargetSet {
    packages: PackageSet,
}

impl MirrorTargetSet {
    /// Run filters in order and merge their output.
    pub fn from_filters(
        sources: &SourceCollection,
        filters: &[Box<dyn PackageFilter>],
        follow_recommends: bool,
    ) -> Result<Self> {
        let mut set = Self::default();

        for filter in filters {
            let produced = filter.produce(&FilterContext {
                sources,
                selected: &set,
                follow_recommends,
            })?;

            let before = set.len();
            set.extend(produced);
            info!("{:?} added {} packages", filter, set.len() - before);
        }

        Ok(set)
    }

    /// Add a package. Returns false if a package with the same identity was present.
    pub fn insert(&mut self, record: Arc<PackageRecord>) -> bool {
        if self.packages.contains_key(record.id()) {
            false
        } else {
            self.packages.insert(record.id().clone(), record);
            true
        }
    }

    pub fn contains(&self, id: &PackageId) -> bool {
        self.packages.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// Sum of the declared sizes of all packages.
    pub fn total_size(&self) -> u64 {
        self.packages.values().map(|p| p.size()).sum()
    }

    /// Iterate over packages in identity order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<PackageRecord>> {
        self.packages.values()
    }
}

impl Extend<Arc<PackageRecord>> for MirrorTargetSet {
    fn extend<T: IntoIterator<Item = Arc<PackageRecord>>>(&mut self, iter: T) {
        for record in iter {
            self.insert(record);
        }
    }
}
