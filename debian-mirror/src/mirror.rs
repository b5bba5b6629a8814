// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Materialization of local mirrors.

A [MirrorBuilder] holds a [SourceCollection] and a list of [PackageFilter]. Calling
[MirrorBuilder::create] resolves the filters into a [MirrorTargetSet] and then runs two
phases:

1. Metadata. Sequentially, for every repository: `Release`, `Release.gpg` and `InRelease`,
   then every variant of every `Packages` index and the per-architecture `Release`
   files. All of these are optional. Failures are logged and skipped. Indices listed in
   the `Release` checksum manifest are verified and dropped if they don't match.
2. Packages. Package files are downloaded by a bounded number of concurrent workers.
   Each download is digested and compared to the SHA-256 the index declares. On
   mismatch the file is removed and the download retried until the retry budget is
   exhausted. A package that fails does not stop the others.

Files land at `<destination>/<repository URL without scheme>/<path in repository>`.
Package files already present locally are not downloaded again.
*/

use {
    crate::{
        catalog::{PackageId, PackageRecord},
        filter::{ArchitectureFilter, DependencyFilter, MirrorTargetSet, PackageFilter},
        io::{verify_digest, ChecksumType, Compression, DigestingReader},
        release::ReleaseFile,
        repository::{filesystem::FilesystemRepositoryWriter, DataResolver, Repository},
        sources::{SourceCollection, SourceRepository},
        error::{DebianError, Result},
    },
    futures::StreamExt,
    log::{error, info, warn},
    serde::Deserialize,
    std::{
        fmt::{Display, Formatter},
        path::{Path, PathBuf},
        sync::Arc,
    },
};

/// Default number of concurrent package downloads.
pub const DEFAULT_MAX_PARALLEL_DOWNLOADS: usize = 4;

/// Default number of extra download attempts after a checksum mismatch.
pub const DEFAULT_RETRIES: usize = 1;

/// A repository entry of a [MirrorConfig].
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum RepositoryConfig {
    /// A `sources.list` style line.
    SourcesList { sources_list: String },
    /// An explicit description.
    Repository(Repository),
}

impl RepositoryConfig {
    pub fn to_repository(&self) -> Result<Repository> {
        match self {
            Self::SourcesList { sources_list } => {
                Repository::from_sources_list_entry(sources_list)
            }
            Self::Repository(repo) => Ok(repo.clone()),
        }
    }
}

/// A filter entry of a [MirrorConfig].
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum FilterConfig {
    /// All packages of an architecture from the repositories at a URL.
    Architecture { url: String, architecture: String },
    /// The closure of a package name or relationship expression.
    Dependency(String),
}

impl FilterConfig {
    pub fn to_filter(&self) -> Result<Box<dyn PackageFilter>> {
        Ok(match self {
            Self::Architecture { url, architecture } => {
                Box::new(ArchitectureFilter::new(url, architecture))
            }
            Self::Dependency(expression) => Box::new(DependencyFilter::parse(expression)?),
        })
    }
}

/// Configuration of a mirror.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MirrorConfig {
    /// Local directory the mirror is written to.
    pub destination: PathBuf,

    /// Repositories to mirror from, in query order.
    pub repositories: Vec<RepositoryConfig>,

    /// Filters selecting packages, applied in order.
    #[serde(default)]
    pub filters: Vec<FilterConfig>,

    pub max_parallel_downloads: Option<usize>,

    /// Extra download attempts after a checksum mismatch.
    pub retries: Option<usize>,

    #[serde(default)]
    pub follow_recommends: bool,
}

impl MirrorConfig {
    pub fn repositories(&self) -> Result<Vec<Repository>> {
        self.repositories.iter().map(|r| r.to_repository()).collect()
    }
}

/// Phases of a mirror run.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MirrorPhase {
    ResolveFilters,
    Metadata,
    Packages,
}

impl Display for MirrorPhase {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::ResolveFilters => "resolving filters",
            Self::Metadata => "replicating metadata",
            Self::Packages => "downloading packages",
        })
    }
}

/// Where a package is in its download lifecycle.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PackageState {
    Pending,
    Downloading,
    Verifying,
    Done,
    CorruptRetry,
    Failed,
}

/// Progress of a mirror run.
#[derive(Clone, Debug)]
pub enum MirrorEvent {
    PhaseBegin(MirrorPhase),
    PhaseEnd(MirrorPhase),

    /// A metadata file was written with the given size.
    MetadataCopied(String, u64),

    /// A metadata file could not be fetched.
    MetadataSkipped(String),

    /// A metadata file didn't match the `Release` manifest and was discarded.
    MetadataMismatch(String),

    /// A metadata file was written although its `Release` manifest entry could not be
    /// parsed.
    MetadataUnverified(String, u64),

    /// Total declared bytes of all packages about to be processed.
    WriteSequenceBeginWithTotalBytes(u64),

    /// Declared bytes of a package whose processing finished.
    WriteSequenceProgressBytes(u64),

    WriteSequenceFinished,

    /// A package file already exists locally with the expected digest.
    PackageAlreadyPresent(PackageId),

    PackageStateChange(PackageId, PackageState),
}

impl Display for MirrorEvent {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PhaseBegin(phase) => write!(f, "begin {}", phase),
            Self::PhaseEnd(phase) => write!(f, "end {}", phase),
            Self::MetadataCopied(path, size) => write!(f, "wrote {} bytes to {}", size, path),
            Self::MetadataSkipped(path) => write!(f, "{} unavailable; skipped", path),
            Self::MetadataMismatch(path) => {
                write!(f, "{} does not match Release checksums; discarded", path)
            }
            Self::MetadataUnverified(path, size) => {
                write!(f, "wrote {} unverified bytes to {}", size, path)
            }
            Self::WriteSequenceBeginWithTotalBytes(total) => {
                write!(f, "processing {} bytes of packages", total)
            }
            Self::WriteSequenceProgressBytes(count) => write!(f, "processed {} bytes", count),
            Self::WriteSequenceFinished => write!(f, "finished processing packages"),
            Self::PackageAlreadyPresent(id) => write!(f, "{} is present", id),
            Self::PackageStateChange(id, state) => write!(f, "{}: {:?}", id, state),
        }
    }
}

/// Final outcome for a package.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PackageOutcome {
    /// Downloaded and verified.
    Done,
    /// The file already existed locally with the expected digest; nothing was fetched.
    AlreadyPresent,
    /// Gave up, with the reason.
    Failed(String),
}

/// What happened to one package.
#[derive(Clone, Debug)]
pub struct PackageReport {
    pub id: PackageId,

    /// Local path of the package file.
    pub path: PathBuf,

    pub outcome: PackageOutcome,

    /// Download attempts made.
    pub attempts: usize,

    /// Bytes written by the last attempt.
    pub bytes: u64,
}

/// Summary of a mirror run.
#[derive(Clone, Debug, Default)]
pub struct MirrorReport {
    pub packages: Vec<PackageReport>,
    pub metadata_copied: usize,
    pub metadata_skipped: usize,
    pub metadata_mismatched: usize,
    /// Metadata written without verification because its manifest entry was unparsable.
    pub metadata_unverified: usize,
}

impl MirrorReport {
    fn count(&self, f: impl Fn(&PackageOutcome) -> bool) -> usize {
        self.packages.iter().filter(|p| f(&p.outcome)).count()
    }

    pub fn done_count(&self) -> usize {
        self.count(|o| o == &PackageOutcome::Done)
    }

    pub fn already_present_count(&self) -> usize {
        self.count(|o| o == &PackageOutcome::AlreadyPresent)
    }

    pub fn failed_count(&self) -> usize {
        self.count(|o| matches!(o, PackageOutcome::Failed(_)))
    }

    /// Packages that could not be mirrored.
    pub fn failed(&self) -> impl Iterator<Item = &PackageReport> {
        self.packages
            .iter()
            .filter(|p| matches!(p.outcome, PackageOutcome::Failed(_)))
    }

    pub fn package(&self, id: &PackageId) -> Option<&PackageReport> {
        self.packages.iter().find(|p| &p.id == id)
    }
}

/// What a run would mirror.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DryRunSummary {
    pub package_count: usize,
    /// Sum of declared package sizes in bytes.
    pub total_size: u64,
}

/// Builds a local mirror from a set of repositories.
pub struct MirrorBuilder {
    sources: SourceCollection,
    destination: PathBuf,
    filters: Vec<Box<dyn PackageFilter>>,
    max_parallel_downloads: usize,
    retries: usize,
    follow_recommends: bool,
    progress_cb: Option<Box<dyn Fn(MirrorEvent) + Send + Sync>>,
}

impl MirrorBuilder {
    /// Construct an instance writing beneath `destination`.
    pub fn new(sources: SourceCollection, destination: impl AsRef<Path>) -> Self {
        Self {
            sources,
            destination: destination.as_ref().to_path_buf(),
            filters: vec![],
            max_parallel_downloads: DEFAULT_MAX_PARALLEL_DOWNLOADS,
            retries: DEFAULT_RETRIES,
            follow_recommends: false,
            progress_cb: None,
        }
    }

    /// Load sources named by a config and register its filters in order.
    pub async fn from_config(config: &MirrorConfig) -> Result<Self> {
        let sources = SourceCollection::load(config.repositories()?).await?;

        let mut builder = Self::new(sources, &config.destination);
        for filter in &config.filters {
            builder.add_filter(filter.to_filter()?);
        }

        if let Some(v) = config.max_parallel_downloads {
            builder.set_max_parallel_downloads(v);
        }
        if let Some(v) = config.retries {
            builder.set_retries(v);
        }
        builder.set_follow_recommends(config.follow_recommends);

        Ok(builder)
    }

    pub fn sources(&self) -> &SourceCollection {
        &self.sources
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Register a filter. Filters run in the order added.
    pub fn add_filter(&mut self, filter: Box<dyn PackageFilter>) {
        self.filters.push(filter);
    }

    /// Set the number of concurrent package downloads. `0` is treated as `1`.
    pub fn set_max_parallel_downloads(&mut self, value: usize) {
        self.max_parallel_downloads = value.max(1);
    }

    /// Set the number of extra attempts after a checksum mismatch.
    pub fn set_retries(&mut self, value: usize) {
        self.retries = value;
    }

    pub fn set_follow_recommends(&mut self, value: bool) {
        self.follow_recommends = value;
    }

    pub fn set_progress_callback(&mut self, cb: Box<dyn Fn(MirrorEvent) + Send + Sync>) {
        self.progress_cb = Some(cb);
    }

    fn emit(&self, event: MirrorEvent) {
        if let Some(cb) = &self.progress_cb {
            cb(event);
        }
    }

    /// Resolve all filters into the set of packages to mirror.
    pub fn target_set(&self) -> Result<MirrorTargetSet> {
        MirrorTargetSet::from_filters(&self.sources, &self.filters, self.follow_recommends)
    }

    /// Select packages exactly as [Self::create] would, without any I/O.
    pub fn dry_run(&self) -> Result<DryRunSummary> {
        let targets = self.target_set()?;

        let summary = DryRunSummary {
            package_count: targets.len(),
            total_size: targets.total_size(),
        };

        info!(
            "would mirror {} packages totaling {} bytes",
            summary.package_count, summary.total_size
        );

        Ok(summary)
    }

    /// Writer for the local directory of a repository.
    fn writer_for(&self, repository: &Repository) -> Result<FilesystemRepositoryWriter> {
        let namespace = repository.url_without_scheme();

        Ok(FilesystemRepositoryWriter::new(
            FilesystemRepositoryWriter::new(&self.destination).resolve_path(namespace)?,
        ))
    }

    /// Local path a package file is mirrored to.
    pub fn local_path(&self, record: &PackageRecord) -> Result<PathBuf> {
        let source = self.source_of(record)?;

        self.writer_for(source.repository())?
            .resolve_path(record.filename())
    }

    fn source_of(&self, record: &PackageRecord) -> Result<&SourceRepository> {
        self.sources.repository(record.repository()).ok_or_else(|| {
            DebianError::PackageNotFound(record.name().to_string(), record.version_str().to_string())
        })
    }

    /// Build the mirror.
    ///
    /// Only errors resolving filters are returned. Metadata failures are skipped and package
    /// failures are recorded in the report.
    pub async fn create(&self) -> Result<MirrorReport> {
        self.emit(MirrorEvent::PhaseBegin(MirrorPhase::ResolveFilters));
        let targets = self.target_set()?;
        self.emit(MirrorEvent::PhaseEnd(MirrorPhase::ResolveFilters));

        info!(
            "mirroring {} packages ({} bytes) to {}",
            targets.len(),
            targets.total_size(),
            self.destination.display()
        );

        let mut report = MirrorReport::default();

        self.emit(MirrorEvent::PhaseBegin(MirrorPhase::Metadata));
        for source in self.sources.iter() {
            self.replicate_metadata(source, &mut report).await;
        }
        self.emit(MirrorEvent::PhaseEnd(MirrorPhase::Metadata));

        self.emit(MirrorEvent::PhaseBegin(MirrorPhase::Packages));
        report.packages = self.mirror_packages(&targets).await;
        self.emit(MirrorEvent::PhaseEnd(MirrorPhase::Packages));

        info!(
            "{} packages downloaded, {} already present, {} failed",
            report.done_count(),
            report.already_present_count(),
            report.failed_count()
        );

        Ok(report)
    }

    /// Fetch a metadata file and write it locally.
    ///
    /// `manifest` verifies the content when it lists `manifest_path`. Returns the content
    /// if it was written.
    async fn copy_metadata(
        &self,
        reader: &dyn DataResolver,
        writer: &FilesystemRepositoryWriter,
        path: &str,
        manifest: Option<(&ReleaseFile, String)>,
        report: &mut MirrorReport,
    ) -> Option<Vec<u8>> {
        let data = match reader.get_path_bytes(path).await {
            Ok(data) => data,
            Err(e) => {
                if e.is_not_found() {
                    info!("{} not available", path);
                } else {
                    warn!("failed to fetch {}: {}", path, e);
                }
                report.metadata_skipped += 1;
                self.emit(MirrorEvent::MetadataSkipped(path.to_string()));
                return None;
            }
        };

        let mut unverified = false;

        if let Some((release, manifest_path)) = manifest {
            let verified = match release.find_index_file(&manifest_path) {
                Ok(Some(entry)) => {
                    entry.size == data.len() as u64 && verify_digest(&data, &entry.digest).is_ok()
                }
                Ok(None) => true,
                Err(e) => {
                    warn!(
                        "unable to parse Release entry for {}: {}; {} is unverified",
                        manifest_path, e, path
                    );
                    unverified = true;
                    true
                }
            };

            if !verified {
                warn!("{} does not match the Release manifest; discarding", path);
                if let Err(e) = writer.remove_path(path).await {
                    warn!("failed to remove {}: {}", path, e);
                }
                report.metadata_mismatched += 1;
                self.emit(MirrorEvent::MetadataMismatch(path.to_string()));
                return None;
            }
        }

        match writer
            .write_path(path, Box::pin(futures::io::Cursor::new(&data)))
            .await
        {
            Ok(size) if unverified => {
                report.metadata_unverified += 1;
                self.emit(MirrorEvent::MetadataUnverified(path.to_string(), size));
                Some(data)
            }
            Ok(size) => {
                report.metadata_copied += 1;
                self.emit(MirrorEvent::MetadataCopied(path.to_string(), size));
                Some(data)
            }
            Err(e) => {
                warn!("failed to write {}: {}", path, e);
                report.metadata_skipped += 1;
                self.emit(MirrorEvent::MetadataSkipped(path.to_string()));
                None
            }
        }
    }

    async fn replicate_metadata(&self, source: &SourceRepository, report: &mut MirrorReport) {
        let repository = source.repository();
        let reader = source.reader();

        let writer = match self.writer_for(repository) {
            Ok(writer) => writer,
            Err(e) => {
                error!("cannot mirror {}: {}", repository.url, e);
                return;
            }
        };

        info!(
            "replicating metadata of {} {}",
            repository.url, repository.distribution
        );

        let release = match self
            .copy_metadata(reader, &writer, &repository.release_path(), None, report)
            .await
        {
            Some(data) => match ReleaseFile::from_reader(std::io::Cursor::new(data)) {
                Ok(release) => Some(release),
                Err(e) => {
                    warn!("unable to parse {}: {}", repository.release_path(), e);
                    None
                }
            },
            None => None,
        };

        for path in repository.release_auxiliary_paths() {
            self.copy_metadata(reader, &writer, &path, None, report).await;
        }

        for (component, architecture) in repository.iter_component_architectures() {
            let index_path = repository.packages_index_path(component, architecture);
            let manifest_path = repository.packages_manifest_path(component, architecture);

            for compression in Compression::fetch_order() {
                self.copy_metadata(
                    reader,
                    &writer,
                    &format!("{}{}", index_path, compression.extension()),
                    release
                        .as_ref()
                        .map(|r| (r, format!("{}{}", manifest_path, compression.extension()))),
                    report,
                )
                .await;
            }

            let arch_release = repository.architecture_release_path(component, architecture);
            self.copy_metadata(
                reader,
                &writer,
                &arch_release,
                release
                    .as_ref()
                    .map(|r| (r, format!("{}/binary-{}/Release", component, architecture))),
                report,
            )
            .await;
        }
    }

    async fn mirror_packages(&self, targets: &MirrorTargetSet) -> Vec<PackageReport> {
        self.emit(MirrorEvent::WriteSequenceBeginWithTotalBytes(
            targets.total_size(),
        ));

        let fs = targets.iter().map(|record| self.mirror_package(record));

        let mut reports = futures::stream::iter(fs)
            .buffer_unordered(self.max_parallel_downloads)
            .collect::<Vec<_>>()
            .await;

        self.emit(MirrorEvent::WriteSequenceFinished);

        reports.sort_by(|a, b| a.id.cmp(&b.id));

        reports
    }

    async fn mirror_package(&self, record: &Arc<PackageRecord>) -> PackageReport {
        let id = record.id().clone();

        let mut report = PackageReport {
            id: id.clone(),
            path: PathBuf::new(),
            outcome: PackageOutcome::Failed(String::new()),
            attempts: 0,
            bytes: 0,
        };

        self.emit(MirrorEvent::PackageStateChange(id.clone(), PackageState::Pending));

        let res = self.download_package(record, &mut report).await;

        if let Err(e) = res {
            error!("failed to mirror {}: {}", id, e);
            report.outcome = PackageOutcome::Failed(e.to_string());
        }

        match report.outcome {
            PackageOutcome::Done => {
                self.emit(MirrorEvent::PackageStateChange(id, PackageState::Done));
            }
            PackageOutcome::AlreadyPresent => {
                self.emit(MirrorEvent::PackageAlreadyPresent(id));
            }
            PackageOutcome::Failed(_) => {
                self.emit(MirrorEvent::PackageStateChange(id, PackageState::Failed));
            }
        }

        self.emit(MirrorEvent::WriteSequenceProgressBytes(record.size()));

        report
    }

    /// Drive one package through download, verification and retry.
    ///
    /// Fetch and write errors end the package immediately. Only checksum mismatches
    /// consume the retry budget.
    ///
    /// Downloads are written to `<filename>.partial` and renamed into place once
    /// verified, so an interrupted run never leaves a truncated file under the final
    /// name. A file already at the final name is only accepted if its digest matches.
    async fn download_package(
        &self,
        record: &PackageRecord,
        report: &mut PackageReport,
    ) -> Result<()> {
        let source = self.source_of(record)?;
        let writer = self.writer_for(source.repository())?;
        let path = record.filename();

        report.path = writer.resolve_path(path)?;

        if writer.exists(path).await? {
            if writer.verify_path(path, record.sha256()).await? {
                report.outcome = PackageOutcome::AlreadyPresent;
                return Ok(());
            }

            warn!(
                "{}: local {} does not match its index; downloading again",
                record.id(),
                path
            );
            writer.remove_path(path).await?;
        }

        let staged = format!("{}.partial", path);

        loop {
            report.attempts += 1;
            self.emit(MirrorEvent::PackageStateChange(
                record.id().clone(),
                PackageState::Downloading,
            ));

            let reader = source.reader().get_path(path).await?;
            let mut digesting = DigestingReader::new(reader, ChecksumType::Sha256);

            if let Err(e) = writer.write_path(&staged, Box::pin(&mut digesting)).await {
                writer.remove_path(&staged).await?;
                return Err(e);
            }

            self.emit(MirrorEvent::PackageStateChange(
                record.id().clone(),
                PackageState::Verifying,
            ));

            let (digest, bytes) = digesting.finish();
            report.bytes = bytes;

            if &digest == record.sha256() {
                writer.rename_path(&staged, path).await?;
                report.outcome = PackageOutcome::Done;
                return Ok(());
            }

            writer.remove_path(&staged).await?;

            if report.attempts > self.retries {
                error!(
                    "{}: checksum mismatch after {} attempts (expected {}, got {}); giving up",
                    record.id(),
                    report.attempts,
                    record.sha256().digest_hex(),
                    digest.digest_hex()
                );
                report.outcome = PackageOutcome::Failed(format!(
                    "checksum mismatch after {} attempts",
                    report.attempts
                ));
                return Ok(());
            }

            warn!(
                "{}: checksum mismatch (expected {}, got {}); retrying",
                record.id(),
                record.sha256().digest_hex(),
                digest.digest_hex()
            );
            self.emit(MirrorEvent::PackageStateChange(
                record.id().clone(),
                PackageState::CorruptRetry,
            ));
        }
    }
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::testutil::{collection_with_resolvers, record, record_with, repository_url},
        indoc::{formatdoc, indoc},
        std::sync::Mutex,
    };

    fn temp_dir() -> Result<tempfile::TempDir> {
        Ok(tempfile::Builder::new()
            .prefix("debian-mirror-test")
            .tempdir()?)
    }

    fn builder(
        repositories: Vec<Vec<PackageRecord>>,
        destination: &Path,
        expressions: &[&str],
    ) -> Result<(MirrorBuilder, Vec<crate::testutil::MemoryResolver>)> {
        let (sources, resolvers) = collection_with_resolvers(repositories);

        let mut builder = MirrorBuilder::new(sources, destination);
        for expression in expressions {
            builder.add_filter(Box::new(DependencyFilter::parse(expression)?));
        }

        Ok((builder, resolvers))
    }

    fn find<'a>(report: &'a MirrorReport, name: &str) -> &'a PackageReport {
        report.packages.iter().find(|p| p.id.name == name).unwrap()
    }

    #[tokio::test]
    async fn mirror_layout() -> Result<()> {
        let td = temp_dir()?;

        let (builder, _) = builder(
            vec![vec![
                record_with("a", "1.0", &[("Depends", "b")]),
                record("b", "1.0", &[]),
                record("c", "1.0", &[]),
            ]],
            td.path(),
            &["a"],
        )?;

        let report = builder.create().await?;
        assert_eq!(report.done_count(), 2);
        assert_eq!(report.failed_count(), 0);

        let root = td.path().join("repo0.example.com/debian");
        assert!(root.join("dists/stable/Release").is_file());
        assert!(root.join("dists/stable/main/binary-amd64/Packages").is_file());
        assert_eq!(
            std::fs::read(root.join("pool/main/a_1.0_amd64.deb"))?,
            crate::testutil::payload("a", "1.0")
        );
        assert!(root.join("pool/main/b_1.0_amd64.deb").is_file());
        assert!(!root.join("pool/main/c_1.0_amd64.deb").exists());

        // Optional files that don't exist upstream are skipped.
        assert!(!root.join("dists/stable/InRelease").exists());
        assert!(report.metadata_skipped > 0);
        assert!(report.metadata_copied >= 2);

        let a = find(&report, "a");
        assert_eq!(a.path, root.join("pool/main/a_1.0_amd64.deb"));
        assert_eq!(a.attempts, 1);
        assert_eq!(a.bytes, crate::testutil::payload("a", "1.0").len() as u64);

        Ok(())
    }

    #[tokio::test]
    async fn second_run_downloads_nothing() -> Result<()> {
        let td = temp_dir()?;

        let (builder, resolvers) = builder(
            vec![vec![
                record_with("a", "1.0", &[("Depends", "b")]),
                record("b", "1.0", &[]),
            ]],
            td.path(),
            &["a"],
        )?;

        let first = builder.create().await?;
        assert_eq!(first.done_count(), 2);

        let path = td.path().join("repo0.example.com/debian/pool/main/a_1.0_amd64.deb");
        let before = std::fs::read(&path)?;

        let second = builder.create().await?;
        assert_eq!(second.done_count(), 0);
        assert_eq!(second.already_present_count(), 2);
        assert_eq!(resolvers[0].request_count("pool/main/a_1.0_amd64.deb"), 1);
        assert_eq!(resolvers[0].request_count("pool/main/b_1.0_amd64.deb"), 1);
        assert_eq!(std::fs::read(&path)?, before);

        Ok(())
    }

    #[tokio::test]
    async fn corrupt_download_retried() -> Result<()> {
        let td = temp_dir()?;

        let (builder, resolvers) = builder(
            vec![vec![record("a", "1.0", &[]), record("b", "1.0", &[])]],
            td.path(),
            &["a", "b"],
        )?;

        resolvers[0].corrupt("pool/main/a_1.0_amd64.deb", 1);

        let report = builder.create().await?;

        let a = find(&report, "a");
        assert_eq!(a.outcome, PackageOutcome::Done);
        assert_eq!(a.attempts, 2);
        assert_eq!(find(&report, "b").outcome, PackageOutcome::Done);
        assert_eq!(
            std::fs::read(td.path().join("repo0.example.com/debian/pool/main/a_1.0_amd64.deb"))?,
            crate::testutil::payload("a", "1.0")
        );

        Ok(())
    }

    #[tokio::test]
    async fn corrupt_download_fails_in_isolation() -> Result<()> {
        let td = temp_dir()?;

        let (builder, resolvers) = builder(
            vec![vec![
                record("a", "1.0", &[]),
                record("b", "1.0", &[]),
                record("c", "1.0", &[]),
            ]],
            td.path(),
            &["a", "b", "c"],
        )?;

        resolvers[0].corrupt("pool/main/b_1.0_amd64.deb", 2);

        let report = builder.create().await?;

        assert_eq!(report.failed_count(), 1);
        assert_eq!(report.done_count(), 2);

        let b = report.failed().next().unwrap();
        assert_eq!(b.id.name, "b");
        assert_eq!(b.attempts, 2);
        assert!(matches!(b.outcome, PackageOutcome::Failed(_)));

        // The corrupt file is not left behind.
        assert!(!td
            .path()
            .join("repo0.example.com/debian/pool/main/b_1.0_amd64.deb")
            .exists());
        assert!(!td
            .path()
            .join("repo0.example.com/debian/pool/main/b_1.0_amd64.deb.partial")
            .exists());
        assert_eq!(resolvers[0].request_count("pool/main/b_1.0_amd64.deb"), 2);

        Ok(())
    }

    #[tokio::test]
    async fn interrupted_download_not_trusted() -> Result<()> {
        let td = temp_dir()?;

        let (builder, resolvers) =
            builder(vec![vec![record("a", "1.0", &[])]], td.path(), &["a"])?;

        let path = "pool/main/a_1.0_amd64.deb";
        let payload = crate::testutil::payload("a", "1.0");
        resolvers[0].stall(path, payload.len() / 2);

        assert!(tokio::time::timeout(
            std::time::Duration::from_millis(500),
            builder.create()
        )
        .await
        .is_err());

        let local = td.path().join("repo0.example.com/debian").join(path);
        assert!(!local.exists());

        resolvers[0].unstall(path);

        let report = builder.create().await?;
        assert_eq!(find(&report, "a").outcome, PackageOutcome::Done);
        assert_eq!(std::fs::read(&local)?, payload);
        assert_eq!(resolvers[0].request_count(path), 2);

        Ok(())
    }

    #[tokio::test]
    async fn truncated_local_file_replaced() -> Result<()> {
        let td = temp_dir()?;

        let (builder, resolvers) =
            builder(vec![vec![record("a", "1.0", &[])]], td.path(), &["a"])?;

        let path = "pool/main/a_1.0_amd64.deb";
        let payload = crate::testutil::payload("a", "1.0");

        let local = td.path().join("repo0.example.com/debian").join(path);
        std::fs::create_dir_all(local.parent().unwrap())?;
        std::fs::write(&local, &payload[..payload.len() / 2])?;

        let report = builder.create().await?;
        let a = find(&report, "a");
        assert_eq!(a.outcome, PackageOutcome::Done);
        assert_eq!(a.attempts, 1);
        assert_eq!(std::fs::read(&local)?, payload);
        assert_eq!(resolvers[0].request_count(path), 1);

        let report = builder.create().await?;
        assert_eq!(find(&report, "a").outcome, PackageOutcome::AlreadyPresent);
        assert_eq!(resolvers[0].request_count(path), 1);

        Ok(())
    }

    #[tokio::test]
    async fn retry_budget_is_configurable() -> Result<()> {
        let td = temp_dir()?;

        let (mut builder, resolvers) =
            builder(vec![vec![record("a", "1.0", &[])]], td.path(), &["a"])?;
        builder.set_retries(3);

        resolvers[0].corrupt("pool/main/a_1.0_amd64.deb", 3);

        let report = builder.create().await?;
        let a = find(&report, "a");
        assert_eq!(a.outcome, PackageOutcome::Done);
        assert_eq!(a.attempts, 4);

        Ok(())
    }

    #[tokio::test]
    async fn missing_package_file_fails() -> Result<()> {
        let td = temp_dir()?;

        let (builder, resolvers) = builder(
            vec![vec![record("a", "1.0", &[]), record("b", "1.0", &[])]],
            td.path(),
            &["a", "b"],
        )?;
        resolvers[0].remove("pool/main/a_1.0_amd64.deb");

        let report = builder.create().await?;
        let a = find(&report, "a");
        assert!(matches!(a.outcome, PackageOutcome::Failed(_)));
        assert_eq!(a.attempts, 1);
        assert_eq!(find(&report, "b").outcome, PackageOutcome::Done);

        Ok(())
    }

    #[tokio::test]
    async fn unsafe_filename_rejected() -> Result<()> {
        let td = temp_dir()?;

        let (builder, _) = builder(
            vec![vec![record_with(
                "evil",
                "1.0",
                &[("Filename", "../../../outside.deb")],
            )]],
            td.path(),
            &["evil"],
        )?;

        let report = builder.create().await?;
        assert_eq!(report.failed_count(), 1);
        assert!(!td.path().join("outside.deb").exists());

        Ok(())
    }

    #[tokio::test]
    async fn metadata_verified_against_release() -> Result<()> {
        let td = temp_dir()?;

        let (builder, resolvers) =
            builder(vec![vec![record("a", "1.0", &[])]], td.path(), &["a"])?;

        let index = b"Package: different\n".to_vec();
        let digest = crate::io::ContentDigest::compute(ChecksumType::Sha256, &index);
        resolvers[0].insert(
            "dists/stable/Release",
            formatdoc! {"
                    Codename: stable
                    Components: main
                    Architectures: amd64
                    SHA256:
                     {} {} main/binary-amd64/Packages
                     {} {} main/binary-amd64/Packages.xz
                ",
                digest.digest_hex(),
                index.len(),
                digest.digest_hex(),
                index.len(),
            }
            .into_bytes(),
        );
        resolvers[0].insert("dists/stable/main/binary-amd64/Packages.xz", index.clone());

        let report = builder.create().await?;

        let dist = td.path().join("repo0.example.com/debian/dists/stable");
        assert!(!dist.join("main/binary-amd64/Packages").exists());
        assert_eq!(std::fs::read(dist.join("main/binary-amd64/Packages.xz"))?, index);
        assert_eq!(report.metadata_mismatched, 1);

        // Package downloads are unaffected.
        assert_eq!(report.done_count(), 1);

        Ok(())
    }

    #[tokio::test]
    async fn unparsable_manifest_entry_counted_unverified() -> Result<()> {
        let td = temp_dir()?;

        let (builder, resolvers) =
            builder(vec![vec![record("a", "1.0", &[])]], td.path(), &["a"])?;

        resolvers[0].insert(
            "dists/stable/Release",
            indoc! {"
                Codename: stable
                Components: main
                Architectures: amd64
                SHA256:
                 not-a-digest 12 main/binary-amd64/Packages
            "}
            .as_bytes()
            .to_vec(),
        );

        let report = builder.create().await?;

        let dist = td.path().join("repo0.example.com/debian/dists/stable");
        assert!(dist.join("main/binary-amd64/Packages").is_file());
        assert_eq!(report.metadata_unverified, 1);
        assert_eq!(report.metadata_mismatched, 0);
        // Only the Release file itself counts as a clean copy.
        assert_eq!(report.metadata_copied, 1);

        Ok(())
    }

    #[tokio::test]
    async fn dry_run_matches_real_run() -> Result<()> {
        let td = temp_dir()?;

        let (mut builder, resolvers) = builder(
            vec![
                vec![
                    record_with("a", "1.0", &[("Depends", "v")]),
                    record("x", "1.0", &[]),
                ],
                vec![record("p", "2.0", &["v"])],
            ],
            td.path(),
            &["a"],
        )?;
        builder.add_filter(Box::new(ArchitectureFilter::new(repository_url(0), "amd64")));

        let summary = builder.dry_run()?;
        assert_eq!(summary.package_count, 3);
        assert_eq!(summary.total_size, builder.target_set()?.total_size());
        assert!(resolvers
            .iter()
            .all(|r| r.request_count("dists/stable/Release") == 0));
        assert!(std::fs::read_dir(td.path())?.next().is_none());

        let report = builder.create().await?;
        assert_eq!(report.packages.len(), summary.package_count);

        Ok(())
    }

    #[tokio::test]
    async fn progress_events() -> Result<()> {
        let td = temp_dir()?;

        let (mut builder, resolvers) =
            builder(vec![vec![record("a", "1.0", &[])]], td.path(), &["a"])?;
        resolvers[0].corrupt("pool/main/a_1.0_amd64.deb", 1);

        let events = Arc::new(Mutex::new(vec![]));
        let captured = events.clone();
        builder.set_progress_callback(Box::new(move |event| {
            if let MirrorEvent::PackageStateChange(_, state) = event {
                captured.lock().unwrap().push(state);
            }
        }));

        builder.create().await?;

        assert_eq!(
            *events.lock().unwrap(),
            vec![
                PackageState::Pending,
                PackageState::Downloading,
                PackageState::Verifying,
                PackageState::CorruptRetry,
                PackageState::Downloading,
                PackageState::Verifying,
                PackageState::Done,
            ]
        );

        Ok(())
    }

    #[test]
    fn parse_config() -> Result<()> {
        let config: MirrorConfig = serde_yaml::from_str(indoc! {r#"
            destination: /srv/mirror
            repositories:
              - url: http://de.archive.ubuntu.com/ubuntu
                distribution: bionic
                components: [main]
                architectures: [i386]
              - sources_list: deb https://dl.winehq.org/wine-builds/ubuntu bionic main
            filters:
              - dependency: wine-stable (>= 3.0.3)
              - architecture:
                  url: https://dl.winehq.org/wine-builds/ubuntu
                  architecture: amd64
            max_parallel_downloads: 8
        "#})
        .unwrap();

        assert_eq!(config.destination, PathBuf::from("/srv/mirror"));
        assert_eq!(config.max_parallel_downloads, Some(8));
        assert_eq!(config.retries, None);
        assert!(!config.follow_recommends);

        let repos = config.repositories()?;
        assert_eq!(repos[0].architectures, vec!["i386"]);
        assert_eq!(repos[1].url, "https://dl.winehq.org/wine-builds/ubuntu");
        assert_eq!(repos[1].architectures, vec!["amd64", "i386"]);

        let filters = config
            .filters
            .iter()
            .map(|f| f.to_filter())
            .collect::<Result<Vec<_>>>()?;
        assert_eq!(filters.len(), 2);

        assert!(serde_yaml::from_str::<MirrorConfig>("destination: /x\nrepositories: []\nbogus: 1\n").is_err());

        Ok(())
    }
}
