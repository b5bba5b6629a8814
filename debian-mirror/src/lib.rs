// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Dependency-closed mirrors of Debian repositories.

This crate builds local copies of subsets of Debian repositories. A mirror holds the
packages selected by a set of filters, plus everything those packages need to be
installed, plus the repository metadata, laid out so `apt` can consume it.

# A Tour of Functionality

Repositories are plain [control files](control): `Release` files ([release::ReleaseFile])
describe a distribution and `Packages` indices list its binary packages, one
[control::ControlParagraph] per package. Versions ([package_version::PackageVersion])
compare with Debian semantics and relationship fields like `Depends` parse into
[dependency::DependencyList].

[repository::Repository] describes where a distribution lives and which components and
architectures to consume. Content is obtained through the [repository::DataResolver]
trait, implemented for HTTP servers and local directories.

Loading happens in two phases. [sources::SourceCollection::load] fetches every `Packages`
index and builds a [catalog::PackageCatalog] per repository. Queries then run against the
loaded, immutable collection, with each package record referring back to its repository
by a [catalog::RepositoryId].

[resolver::DependencyResolver] computes dependency closures across all repositories.
[filter::PackageFilter] implementations turn user intent (a package name, a relationship
expression, an architecture) into the [filter::MirrorTargetSet] a mirror will hold.

Finally, [mirror::MirrorBuilder] copies metadata and downloads the selected packages
concurrently, verifying every file against its declared SHA-256 and retrying corrupted
downloads.

```no_run
use debian_mirror::{
    filter::DependencyFilter,
    mirror::MirrorBuilder,
    repository::Repository,
    sources::SourceCollection,
};

# async fn run() -> debian_mirror::error::Result<()> {
let sources = SourceCollection::load([Repository::from_sources_list_entry(
    "deb http://deb.debian.org/debian bullseye main",
)?])
.await?;

let mut builder = MirrorBuilder::new(sources, "/srv/mirror");
builder.add_filter(Box::new(DependencyFilter::parse("zlib1g (>= 1:1.2.11)")?));

let report = builder.create().await?;
println!("{} packages failed", report.failed_count());
# Ok(())
# }
```
*/

pub mod catalog;
pub mod control;
pub mod dependency;
pub mod error;
pub mod filter;
pub mod io;
pub mod mirror;
pub mod package_version;
pub mod release;
pub mod repository;
pub mod resolver;
pub mod sources;
#[cfg(test)]
mod testutil;
