// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    clap::{Arg, ArgMatches, Command},
    debian_mirror::{
        dependency::PackageRequest,
        error::DebianError,
        mirror::{MirrorBuilder, MirrorConfig, MirrorEvent, PackageOutcome},
        repository::reader_from_url,
        resolver::{DependencyResolver, PackageSet},
        sources::SourceCollection,
    },
    log::LevelFilter,
    std::sync::{Arc, Mutex},
    thiserror::Error,
};

const CONFIG_ABOUT: &str = "\
# YAML Configuration

Commands read their configuration from a YAML file with the following keys:

destination (required) (string)
   Local directory the mirror is written to. Each repository is mirrored
   under a sub-directory named after its URL without the scheme. e.g.
   `http://deb.debian.org/debian` is mirrored to
   `<destination>/deb.debian.org/debian`.

repositories (required) (list)
   Repositories to mirror from. Each entry is either a mapping with the keys

      url (string)
         Base URL of the repository. `http://`, `https://` and `file://` URLs
         are supported. Values without `://` are local filesystem paths.
      distribution (string)
         Name of the distribution, e.g. `bullseye`.
      components (list[string])
         Components to consume, e.g. `main`.
      architectures (optional) (list[string])
         Architectures to consume. Defaults to `amd64` and `i386`.

   or a mapping with a single `sources_list` key holding a line in the
   format of `/etc/apt/sources.list`, e.g.
   `deb http://deb.debian.org/debian bullseye main`.

   When several repositories offer a package, they are consulted in the
   order listed.

filters (optional) (list)
   Filters selecting the packages to mirror. Each entry is one of

      dependency: <expression>
         A package name or a relationship expression such as
         `libc6 (>= 2.31)`. Every package matching the expression is
         mirrored together with its dependency closure.
      architecture:
        url: <url>
        architecture: <arch>
         Every package of an architecture from the repository with the
         given URL. Dependencies are not followed.

max_parallel_downloads (optional) (integer)
   Maximum number of concurrent package downloads. Defaults to 4.

retries (optional) (integer)
   Number of extra download attempts when a package file does not match
   its declared checksum. Defaults to 1.

follow_recommends (optional) (bool)
   Whether dependency closures include `Recommends`. Defaults to false.
";

const MIRROR_ABOUT: &str = "\
Build or update a local mirror.

Package indices of all configured repositories are loaded, filters are
resolved into the set of packages to mirror and then:

1. Repository metadata (`Release`, `Release.gpg`, `InRelease`, `Packages`
   indices and per-architecture `Release` files) is copied. Missing or
   unreadable metadata is skipped. Indices not matching the checksums in
   `Release` are discarded.
2. Package files are downloaded concurrently. Every file is verified
   against the SHA-256 its index declares. Corrupt downloads are removed
   and retried. Files already present locally are not downloaded again.

The command exits non-zero if any package could not be mirrored.
";

#[derive(Debug, Error)]
pub enum DmtError {
    #[error("argument parsing error: {0:?}")]
    Clap(#[from] clap::Error),

    #[error("{0:?}")]
    Debian(#[from] DebianError),

    #[error("I/O error: {0:?}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0:?}")]
    SerdeYaml(#[from] serde_yaml::Error),

    #[error("invalid sub-command: {0}")]
    InvalidSubCommand(String),
}

pub type Result<T> = std::result::Result<T, DmtError>;

fn yaml_config_arg<'help>() -> Arg<'help> {
    Arg::new("yaml-config")
        .long("--yaml-config")
        .takes_value(true)
        .required(true)
        .allow_invalid_utf8(true)
        .help("Path to a YAML file defining the mirror configuration")
}

fn init_logging(matches: &ArgMatches) {
    let log_level = match matches.occurrences_of("verbose") {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(log_level.as_str()),
    );

    // Disable log context except at higher log levels.
    if log_level <= LevelFilter::Info {
        builder
            .format_timestamp(None)
            .format_level(false)
            .format_target(false);
    }

    if log_level == LevelFilter::Info {
        builder.filter_module("rustls", LevelFilter::Error);
        builder.filter_module("reqwest", LevelFilter::Error);
    }

    builder.init();
}

/// Run the CLI, returning the process exit code.
pub async fn run_cli() -> Result<i32> {
    let mirror_about = format!("{}\n{}", MIRROR_ABOUT, CONFIG_ABOUT);
    let max_parallel_help = format!(
        "Maximum number of concurrent package downloads (this machine has {} CPUs)",
        num_cpus::get()
    );

    let app = Command::new("Debian Mirror Tool")
        .version("0.1")
        .author("Gregory Szorc <gregory.szorc@gmail.com>")
        .about("Build dependency-closed mirrors of Debian repositories")
        .arg_required_else_help(true)
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .global(true)
                .multiple_occurrences(true)
                .help("Increase logging verbosity. Can be specified multiple times."),
        );

    let app = app.subcommand(
        Command::new("mirror")
            .about("Build or update a local mirror")
            .long_about(mirror_about.as_str())
            .arg(yaml_config_arg())
            .arg(
                Arg::new("dry-run")
                    .long("--dry-run")
                    .help("Only report how many packages and bytes would be mirrored"),
            )
            .arg(
                Arg::new("max-parallel-io")
                    .long("--max-parallel-io")
                    .takes_value(true)
                    .help(max_parallel_help.as_str()),
            ),
    );

    let app = app.subcommand(
        Command::new("resolve")
            .about("Print the dependency closure of packages")
            .long_about(CONFIG_ABOUT)
            .arg(yaml_config_arg())
            .arg(
                Arg::new("expression")
                    .required(true)
                    .takes_value(true)
                    .multiple_values(true)
                    .help("Package name or relationship expression, e.g. `libc6 (>= 2.31)`"),
            ),
    );

    let mut app = app.subcommand(
        Command::new("sources")
            .about("Print what configured repositories advertise")
            .long_about(CONFIG_ABOUT)
            .arg(yaml_config_arg()),
    );

    let matches = app.clone().get_matches();

    init_logging(&matches);

    match matches.subcommand() {
        Some(("mirror", args)) => command_mirror(args).await,
        Some(("resolve", args)) => command_resolve(args).await,
        Some(("sources", args)) => command_sources(args).await,
        Some((command, _)) => Err(DmtError::InvalidSubCommand(command.to_string())),
        None => {
            app.print_help()?;
            Ok(0)
        }
    }
}

fn load_config(args: &ArgMatches) -> Result<MirrorConfig> {
    let yaml_path = args
        .value_of_os("yaml-config")
        .expect("yaml-config argument is required");

    let f = std::fs::File::open(yaml_path)?;

    Ok(serde_yaml::from_reader(f)?)
}

async fn command_mirror(args: &ArgMatches) -> Result<i32> {
    let config = load_config(args)?;

    let mut builder = MirrorBuilder::from_config(&config).await?;

    if args.is_present("max-parallel-io") {
        builder.set_max_parallel_downloads(args.value_of_t::<usize>("max-parallel-io")?);
    }

    if args.is_present("dry-run") {
        let summary = builder.dry_run()?;
        println!(
            "{} packages; {} bytes",
            summary.package_count, summary.total_size
        );

        return Ok(0);
    }

    let pb = Arc::new(Mutex::new(None));

    builder.set_progress_callback(Box::new(move |event: MirrorEvent| match event {
        MirrorEvent::WriteSequenceBeginWithTotalBytes(total) => {
            let mut bar = pbr::ProgressBar::new(total);
            bar.set_units(pbr::Units::Bytes);

            pb.lock().unwrap().replace(bar);
        }
        MirrorEvent::WriteSequenceProgressBytes(count) => {
            pb.lock()
                .unwrap()
                .as_mut()
                .expect("progress bar should be defined")
                .add(count);
        }
        MirrorEvent::WriteSequenceFinished => {
            let mut guard = pb.lock().unwrap();
            guard
                .as_mut()
                .expect("progress bar should be defined")
                .finish();
            guard.take();
        }
        MirrorEvent::PhaseBegin(_) | MirrorEvent::PhaseEnd(_) => {
            println!("{}", event);
        }
        _ => {}
    }));

    let report = builder.create().await?;

    println!(
        "metadata: {} copied; {} unverified; {} discarded; {} unavailable",
        report.metadata_copied,
        report.metadata_unverified,
        report.metadata_mismatched,
        report.metadata_skipped
    );
    println!(
        "{} packages downloaded; {} already present; {} failed",
        report.done_count(),
        report.already_present_count(),
        report.failed_count()
    );

    for package in report.failed() {
        if let PackageOutcome::Failed(reason) = &package.outcome {
            println!("failed: {}: {}", package.id, reason);
        }
    }

    Ok(if report.failed_count() > 0 { 1 } else { 0 })
}

async fn command_resolve(args: &ArgMatches) -> Result<i32> {
    let config = load_config(args)?;

    let requests = args
        .values_of("expression")
        .expect("expression argument is required")
        .map(PackageRequest::parse)
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let sources = SourceCollection::load(config.repositories()?).await?;
    let resolver = DependencyResolver::new(&sources).follow_recommends(config.follow_recommends);

    let mut closure = PackageSet::new();
    for request in &requests {
        closure.extend(resolver.resolve_request(request));
    }

    for record in closure.values() {
        println!(
            "{} {} {} {}",
            record.name(),
            record.version_str(),
            record.architecture(),
            record.filename()
        );
    }

    Ok(0)
}

async fn command_sources(args: &ArgMatches) -> Result<i32> {
    let config = load_config(args)?;

    for repository in config.repositories()? {
        let reader = reader_from_url(&repository.url)?;
        let release = repository.fetch_release(reader.as_ref()).await?;

        println!("{} {}", repository.url, repository.distribution);
        if let Some(date) = release.date_str() {
            println!("  date: {}", date);
        }
        println!("  components: {}", release.components().join(" "));
        println!("  architectures: {}", release.architectures().join(" "));
        println!(
            "  consumed: {} / {}",
            repository.components.join(" "),
            repository.architectures.join(" ")
        );
    }

    Ok(0)
}
