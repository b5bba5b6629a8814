// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Package records and per-repository catalogs.

A [PackageCatalog] indexes every binary package a repository offers for its configured
components and architectures, both by package name and by the names each package
provides. Catalogs are built by an explicit [PackageCatalog::load] call and are
immutable afterwards.
*/

use {
    crate::{
        control::{ControlParagraph, ControlParagraphReader},
        dependency::{DependencyList, DependencyVariants},
        error::{DebianError, Result},
        io::{ChecksumType, ContentDigest},
        package_version::PackageVersion,
        repository::{fetch_decompressed, DataResolver, Repository},
    },
    log::{info, warn},
    std::{
        collections::{HashMap, HashSet},
        fmt::{Display, Formatter},
        io::Write,
        sync::Arc,
    },
};

/// Index of a repository within a [crate::sources::SourceCollection].
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct RepositoryId(pub usize);

/// Identity of a binary package.
///
/// The version is kept as written so that identity never depends on version
/// normalization.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct PackageId {
    pub name: String,
    pub version: String,
    pub architecture: String,
}

impl Display for PackageId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {}", self.name, self.version, self.architecture)
    }
}

/// A binary package as described by one stanza of a `Packages` index.
#[derive(Clone, Debug)]
pub struct PackageRecord {
    paragraph: ControlParagraph,
    id: PackageId,
    version: PackageVersion,
    size: u64,
    filename: String,
    sha256: ContentDigest,
    md5: Option<ContentDigest>,
    depends: DependencyList,
    pre_depends: DependencyList,
    recommends: DependencyList,
    provides: Vec<String>,
    repository: RepositoryId,
}

fn parse_relationship(paragraph: &ControlParagraph, field: &str) -> Result<DependencyList> {
    match paragraph.field_str(field) {
        Some(value) => DependencyList::parse(value),
        None => Ok(DependencyList::default()),
    }
}

/// Extract names from a `Provides` value, discarding versions and qualifiers.
fn parse_provides(value: &str) -> Vec<String> {
    value
        .split(',')
        .filter_map(|entry| {
            entry
                .split(|c: char| c.is_whitespace() || c == '(' || c == ':')
                .find(|x| !x.is_empty())
        })
        .map(|x| x.to_string())
        .collect()
}

impl PackageRecord {
    /// Construct an instance from a `Packages` stanza.
    ///
    /// `Package`, `Version`, `Architecture`, `Filename`, `Size` and `SHA256` are mandatory.
    pub fn from_paragraph(paragraph: ControlParagraph, repository: RepositoryId) -> Result<Self> {
        let name = paragraph.required_field_str("Package")?.trim().to_string();
        let version_str = paragraph.required_field_str("Version")?.trim().to_string();
        let architecture = paragraph
            .required_field_str("Architecture")?
            .trim()
            .to_string();
        let filename = paragraph.required_field_str("Filename")?.trim().to_string();
        let size = paragraph
            .field_u64("Size")
            .ok_or_else(|| DebianError::ControlRequiredFieldMissing("Size".to_string()))??;
        let sha256 = ContentDigest::from_hex_digest(
            ChecksumType::Sha256,
            paragraph.required_field_str(ChecksumType::Sha256.package_field_name())?,
        )?;
        let md5 = paragraph
            .field_str(ChecksumType::Md5.package_field_name())
            .map(|v| ContentDigest::from_hex_digest(ChecksumType::Md5, v))
            .transpose()?;

        let version = PackageVersion::parse(&version_str)?;
        let depends = parse_relationship(&paragraph, "Depends")?;
        let pre_depends = parse_relationship(&paragraph, "Pre-Depends")?;
        let recommends = parse_relationship(&paragraph, "Recommends")?;
        let provides = paragraph
            .field_str("Provides")
            .map(parse_provides)
            .unwrap_or_default();

        Ok(Self {
            paragraph,
            id: PackageId {
                name,
                version: version_str,
                architecture,
            },
            version,
            size,
            filename,
            sha256,
            md5,
            depends,
            pre_depends,
            recommends,
            provides,
            repository,
        })
    }

    pub fn id(&self) -> &PackageId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.id.name
    }

    pub fn version(&self) -> &PackageVersion {
        &self.version
    }

    /// The version as written in the index.
    pub fn version_str(&self) -> &str {
        &self.id.version
    }

    pub fn architecture(&self) -> &str {
        &self.id.architecture
    }

    /// Declared size of the package file in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Path of the package file relative to the repository root.
    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn sha256(&self) -> &ContentDigest {
        &self.sha256
    }

    pub fn md5(&self) -> Option<&ContentDigest> {
        self.md5.as_ref()
    }

    pub fn depends(&self) -> &DependencyList {
        &self.depends
    }

    pub fn pre_depends(&self) -> &DependencyList {
        &self.pre_depends
    }

    pub fn recommends(&self) -> &DependencyList {
        &self.recommends
    }

    /// Virtual package names this package provides.
    pub fn provides(&self) -> &[String] {
        &self.provides
    }

    pub fn provides_name(&self, name: &str) -> bool {
        self.provides.iter().any(|x| x == name)
    }

    /// The repository this record was read from.
    pub fn repository(&self) -> RepositoryId {
        self.repository
    }

    /// The original stanza.
    pub fn paragraph(&self) -> &ControlParagraph {
        &self.paragraph
    }

    /// Relationship groups that must be satisfied for this package to be usable.
    ///
    /// `Depends` and `Pre-Depends` are treated identically. `Recommends` is appended
    /// when requested.
    pub fn relationship_groups(
        &self,
        include_recommends: bool,
    ) -> impl Iterator<Item = &DependencyVariants> {
        let recommends = if include_recommends {
            Some(self.recommends.groups())
        } else {
            None
        };

        self.depends
            .groups()
            .chain(self.pre_depends.groups())
            .chain(recommends.into_iter().flatten())
    }
}

/// Parse every stanza of a `Packages` index, failing on the first invalid one.
pub fn parse_packages_index(text: &str, repository: RepositoryId) -> Result<Vec<PackageRecord>> {
    ControlParagraphReader::new(std::io::Cursor::new(text.as_bytes()))
        .map(|paragraph| PackageRecord::from_paragraph(paragraph?, repository))
        .collect()
}

/// Serialize records into `Packages` index text.
pub fn write_packages_index<'a, W: Write>(
    records: impl IntoIterator<Item = &'a PackageRecord>,
    writer: &mut W,
) -> Result<()> {
    for (i, record) in records.into_iter().enumerate() {
        if i > 0 {
            writer.write_all(b"\n")?;
        }
        record.paragraph.write(writer)?;
    }

    Ok(())
}

/// The packages one repository offers.
#[derive(Clone, Debug, Default)]
pub struct PackageCatalog {
    repository: RepositoryId,
    records: Vec<Arc<PackageRecord>>,
    ids: HashSet<PackageId>,
    by_name: HashMap<String, Vec<usize>>,
    by_provided: HashMap<String, Vec<usize>>,
    skipped: usize,
}

impl PackageCatalog {
    /// Build a catalog from records already in memory.
    ///
    /// Records are attributed to `repository`. Records whose identity was already seen
    /// are ignored.
    pub fn from_records(
        repository: RepositoryId,
        records: impl IntoIterator<Item = PackageRecord>,
    ) -> Self {
        let mut catalog = Self {
            repository,
            ..Default::default()
        };

        for mut record in records {
            record.repository = repository;
            catalog.add_record(record);
        }

        catalog
    }

    /// Fetch every `(component, architecture)` index of a repository and index its records.
    ///
    /// A package index that can't be fetched in any compression format is fatal. So is
    /// control syntax that can't be split into stanzas. A stanza with missing or
    /// malformed fields only loses that package; it is logged and counted in
    /// [Self::skipped_count].
    pub async fn load(
        id: RepositoryId,
        repository: &Repository,
        resolver: &dyn DataResolver,
    ) -> Result<Self> {
        let mut catalog = Self {
            repository: id,
            ..Default::default()
        };

        for (component, architecture) in repository.iter_component_architectures() {
            let path = repository.packages_index_path(component, architecture);
            let text = fetch_decompressed(resolver, &path).await?;

            let before = catalog.len();
            let skipped_before = catalog.skipped;

            for paragraph in ControlParagraphReader::new(std::io::Cursor::new(text.as_bytes())) {
                let paragraph = paragraph?;
                let name = paragraph
                    .field_str("Package")
                    .map(|x| x.trim().to_string())
                    .unwrap_or_else(|| "<unnamed>".to_string());

                match PackageRecord::from_paragraph(paragraph, id) {
                    Ok(record) => catalog.add_record(record),
                    Err(e) => {
                        warn!("{}: skipping malformed package {}: {}", path, name, e);
                        catalog.skipped += 1;
                    }
                }
            }

            info!(
                "{} {}/{}: indexed {} packages, skipped {}",
                repository.url,
                component,
                architecture,
                catalog.len() - before,
                catalog.skipped - skipped_before
            );
        }

        Ok(catalog)
    }

    fn add_record(&mut self, record: PackageRecord) {
        if !self.ids.insert(record.id.clone()) {
            return;
        }

        let index = self.records.len();

        self.by_name
            .entry(record.name().to_string())
            .or_default()
            .push(index);

        // The provided-name index holds each package under its own name and every name it
        // provides. Provides don't chain.
        let mut provided = vec![record.name().to_string()];
        provided.extend(record.provides.iter().cloned());
        provided.dedup();

        for name in provided {
            let entries = self.by_provided.entry(name).or_default();
            if !entries.contains(&index) {
                entries.push(index);
            }
        }

        self.records.push(Arc::new(record));
    }

    pub fn repository(&self) -> RepositoryId {
        self.repository
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Number of stanzas [Self::load] dropped because they didn't describe a valid package.
    pub fn skipped_count(&self) -> usize {
        self.skipped
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Iterate over all records in index order.
    pub fn iter_packages(&self) -> impl Iterator<Item = &Arc<PackageRecord>> {
        self.records.iter()
    }

    /// Records with the given package name.
    pub fn packages<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a Arc<PackageRecord>> {
        self.lookup(&self.by_name, name)
    }

    /// Records named `name` or providing `name`.
    pub fn provided<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a Arc<PackageRecord>> {
        self.lookup(&self.by_provided, name)
    }

    fn lookup<'a>(
        &'a self,
        index: &'a HashMap<String, Vec<usize>>,
        name: &str,
    ) -> impl Iterator<Item = &'a Arc<PackageRecord>> {
        index
            .get(name)
            .into_iter()
            .flatten()
            .filter_map(move |i| self.records.get(*i))
    }

    /// Find the record with an exact name and version string.
    ///
    /// If several architectures match, the first indexed wins.
    pub fn get_package(&self, name: &str, version: &str) -> Result<&Arc<PackageRecord>> {
        self.packages(name)
            .find(|p| p.version_str() == version)
            .ok_or_else(|| DebianError::PackageNotFound(name.to_string(), version.to_string()))
    }

    /// Records named `name` whose version string starts with `prefix`.
    pub fn packages_with_version_prefix<'a>(
        &'a self,
        name: &str,
        prefix: &'a str,
    ) -> impl Iterator<Item = &'a Arc<PackageRecord>> {
        self.packages(name)
            .filter(move |p| p.version_str().starts_with(prefix))
    }
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::testutil::{packages_text, record, MemoryResolver},
        indoc::indoc,
    };

    const STANZA: &str = indoc! {"
        Package: postfix
        Version: 3.5.6-1
        Architecture: amd64
        Maintainer: LaMont Jones <lamont@debian.org>
        Installed-Size: 4139
        Pre-Depends: init-system-helpers (>= 1.54~)
        Depends: libc6 (>= 2.14), cpio, netbase, adduser (>= 3.48), dpkg (>= 1.8.3), debconf (>= 0.5) | debconf-2.0
        Recommends: python3
        Provides: default-mta, mail-transport-agent (= 3.5), mta:any
        Filename: pool/main/p/postfix/postfix_3.5.6-1_amd64.deb
        Size: 1511324
        MD5sum: 1b4f5cbd5e5c2b19ee1ec1fd6d6bd0d4
        SHA256: 0b7ad0a3e5b5e1e1ea80a91bb8e3e0c4f60e8b5bd4ed1a9e2ad6b9b0b0e8f3a1
    "};

    #[test]
    fn parse_record() -> Result<()> {
        let records = parse_packages_index(STANZA, RepositoryId(3))?;
        assert_eq!(records.len(), 1);

        let p = &records[0];
        assert_eq!(p.name(), "postfix");
        assert_eq!(p.version_str(), "3.5.6-1");
        assert_eq!(p.architecture(), "amd64");
        assert_eq!(p.size(), 1511324);
        assert_eq!(p.filename(), "pool/main/p/postfix/postfix_3.5.6-1_amd64.deb");
        assert_eq!(p.repository(), RepositoryId(3));
        assert!(p.md5().is_some());
        assert_eq!(p.provides(), &["default-mta", "mail-transport-agent", "mta"]);
        assert_eq!(p.depends().groups().count(), 6);
        assert_eq!(p.pre_depends().groups().count(), 1);
        assert_eq!(p.relationship_groups(false).count(), 7);
        assert_eq!(p.relationship_groups(true).count(), 8);

        Ok(())
    }

    #[test]
    fn missing_field_is_distinguishable() {
        let text = STANZA.replace("SHA256:", "SHA1:");

        match parse_packages_index(&text, RepositoryId(0)) {
            Err(DebianError::ControlRequiredFieldMissing(field)) => assert_eq!(field, "SHA256"),
            other => panic!("unexpected result: {:?}", other.map(|r| r.len())),
        }
    }

    #[test]
    fn catalog_indices() -> Result<()> {
        let catalog = PackageCatalog::from_records(
            RepositoryId(0),
            vec![
                record("exim4", "4.94-1", &["mail-transport-agent"]),
                record("postfix", "3.5-1", &["mail-transport-agent"]),
                record("postfix", "3.6-1", &[]),
                // Duplicate identity, e.g. an `all` package seen in two indices.
                record("postfix", "3.6-1", &[]),
            ],
        );

        assert_eq!(catalog.len(), 3);
        assert_eq!(catalog.packages("postfix").count(), 2);
        assert_eq!(catalog.packages("mail-transport-agent").count(), 0);
        assert_eq!(
            catalog
                .provided("mail-transport-agent")
                .map(|p| p.name())
                .collect::<Vec<_>>(),
            vec!["exim4", "postfix"]
        );
        assert_eq!(catalog.provided("postfix").count(), 2);
        assert_eq!(catalog.provided("missing").count(), 0);

        assert_eq!(catalog.get_package("postfix", "3.5-1")?.version_str(), "3.5-1");
        assert!(matches!(
            catalog.get_package("postfix", "9.9"),
            Err(DebianError::PackageNotFound(_, _))
        ));

        assert_eq!(
            catalog
                .packages_with_version_prefix("postfix", "3.6")
                .map(|p| p.version_str())
                .collect::<Vec<_>>(),
            vec!["3.6-1"]
        );

        Ok(())
    }

    #[test]
    fn index_round_trip() -> Result<()> {
        let records = vec![
            record("a", "1.0", &["v"]),
            record("b", "2.0-1", &[]),
        ];

        let mut buf = vec![];
        write_packages_index(records.iter(), &mut buf)?;

        let text = String::from_utf8(buf).map_err(|e| DebianError::ControlParseError(e.to_string()))?;
        let reparsed = parse_packages_index(&text, RepositoryId(0))?;

        assert_eq!(
            records.iter().map(|r| r.id()).collect::<Vec<_>>(),
            reparsed.iter().map(|r| r.id()).collect::<Vec<_>>()
        );
        for (a, b) in records.iter().zip(reparsed.iter()) {
            assert_eq!(a.paragraph(), b.paragraph());
            assert_eq!(a.sha256(), b.sha256());
            assert_eq!(a.provides(), b.provides());
        }

        Ok(())
    }

    #[tokio::test]
    async fn load_catalog() -> Result<()> {
        let repo = Repository::new("http://example.com/debian", "stable", ["main"], ["amd64", "i386"]);

        let resolver = MemoryResolver::default();
        resolver.insert(
            "dists/stable/main/binary-amd64/Packages",
            packages_text(&[record("a", "1.0", &[]), record("b", "1.0", &[])]).into_bytes(),
        );
        resolver.insert(
            "dists/stable/main/binary-i386/Packages",
            packages_text(&[record("c", "1.0", &[])]).into_bytes(),
        );

        let catalog = PackageCatalog::load(RepositoryId(1), &repo, &resolver).await?;
        assert_eq!(catalog.len(), 3);
        assert_eq!(catalog.repository(), RepositoryId(1));
        assert!(catalog.iter_packages().all(|p| p.repository() == RepositoryId(1)));

        assert_eq!(catalog.skipped_count(), 0);

        // A mandatory index missing entirely fails the load.
        let repo = Repository::new("http://example.com/debian", "stable", ["main"], ["arm64"]);
        assert!(matches!(
            PackageCatalog::load(RepositoryId(1), &repo, &resolver).await,
            Err(DebianError::RepositoryIndexNotFound(_))
        ));

        Ok(())
    }

    #[tokio::test]
    async fn malformed_stanza_skipped() -> Result<()> {
        let repo = Repository::new("http://example.com/debian", "stable", ["main"], ["amd64"]);

        let good = packages_text(&[record("a", "1.0", &[])]);
        let bad_depends = indoc! {"
            Package: b
            Version: 1.0
            Architecture: amd64
            Depends: foo (>= )
            Filename: pool/main/b_1.0_amd64.deb
            Size: 10
            SHA256: 0b7ad0a3e5b5e1e1ea80a91bb8e3e0c4f60e8b5bd4ed1a9e2ad6b9b0b0e8f3a1
        "};
        let no_sha256 = STANZA.replace("SHA256:", "SHA1:");

        let resolver = MemoryResolver::default();
        resolver.insert(
            "dists/stable/main/binary-amd64/Packages",
            format!("{}\n{}\n{}", bad_depends, good, no_sha256).into_bytes(),
        );

        let catalog = PackageCatalog::load(RepositoryId(0), &repo, &resolver).await?;
        assert_eq!(
            catalog.iter_packages().map(|p| p.name()).collect::<Vec<_>>(),
            vec!["a"]
        );
        assert_eq!(catalog.skipped_count(), 2);

        Ok(())
    }
}
