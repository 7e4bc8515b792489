use std::collections::{HashMap, HashSet};
use std::io::IsTerminal;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use blobmover::config::{AzureSettings, ChecksumModeSetting, DestinationKind, S3Settings, Settings};
use blobmover::error::MigrationError;
use blobmover::migrator::StreamingBlobMigrator;
use blobmover::orchestrator::BlobstoreMigrator;
use blobmover::store::{AzureConfig, AzureStore, FilesystemStore, S3Config, S3Store, Store};
use blobmover::watcher::ConsoleWatcher;

#[derive(Debug, Parser)]
#[command(name = "blobmover", version)]
struct Opt {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Move every object from the filesystem source into the configured destination.
    Migrate(MigrateArgs),
    /// Print the build identifier.
    Version,
}

#[derive(Debug, clap::Args)]
struct MigrateArgs {
    /// Path to a config file (TOML/YAML/JSON, `config` crate conventions).
    #[arg(long, default_value = "blobmover")]
    config: String,

    /// Root directory of the filesystem source.
    #[arg(long)]
    source: Option<String>,

    /// Destination backend: `s3` or `azure`.
    #[arg(long, value_enum)]
    destination: Option<DestinationArg>,

    /// Worker-pool capacity.
    #[arg(long)]
    concurrent_uploads: Option<usize>,

    /// Logical bucket to skip; may be given multiple times.
    #[arg(long = "exclude")]
    exclude: Vec<String>,

    #[arg(long)]
    access_key: Option<String>,
    #[arg(long)]
    secret_key: Option<String>,
    #[arg(long)]
    region: Option<String>,
    #[arg(long)]
    endpoint: Option<String>,
    #[arg(long)]
    disable_ssl: bool,
    #[arg(long)]
    insecure_skip_verify: bool,
    #[arg(long)]
    use_multipart_uploads: bool,

    #[arg(long)]
    account: Option<String>,
    #[arg(long)]
    account_key: Option<String>,

    #[arg(long)]
    buildpacks_bucket_name: Option<String>,
    #[arg(long)]
    droplets_bucket_name: Option<String>,
    #[arg(long)]
    packages_bucket_name: Option<String>,
    #[arg(long)]
    resources_bucket_name: Option<String>,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum DestinationArg {
    S3,
    Azure,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    setup_tracing();

    let opt = Opt::parse();
    let result = match opt.command {
        Command::Version => {
            println!("blobmover {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Command::Migrate(args) => run_migrate(args).await,
    };

    if let Err(err) = result {
        blobmover::error::log(&err);
        eprintln!("{err}");
        std::process::exit(1);
    }
}

async fn run_migrate(args: MigrateArgs) -> Result<(), MigrationError> {
    let settings = merge_settings(Settings::load(&args.config)?, args)?;

    let source = Arc::new(FilesystemStore::new(settings.blobstore_path.clone()));
    let destination: Arc<dyn Store> = match settings.destination {
        DestinationKind::S3 => {
            let s3 = settings.s3.clone().expect("validated at construction");
            Arc::new(S3Store::new(S3Config {
                region: s3.region,
                endpoint: s3.endpoint,
                access_key: s3.access_key,
                secret_key: s3.secret_key,
                disable_ssl: s3.disable_ssl,
                insecure_skip_verify: s3.insecure_skip_verify,
                use_multipart_uploads: s3.use_multipart_uploads,
                checksum_mode: s3.checksum_mode.into(),
                bucket_names: settings.bucket_names.clone(),
            }).await)
        }
        DestinationKind::Azure => {
            let azure = settings.azure.clone().expect("validated at construction");
            Arc::new(AzureStore::new(AzureConfig {
                account: azure.account,
                account_key: azure.account_key,
                container_names: settings.bucket_names.clone(),
            }))
        }
    };

    let exclude: HashSet<String> = settings.exclude.iter().cloned().collect();
    let migrator = Arc::new(StreamingBlobMigrator::new(destination.clone(), source.clone()));
    let watcher = Arc::new(ConsoleWatcher::new());
    let orchestrator = BlobstoreMigrator::new(settings.concurrent_uploads, migrator, exclude, watcher)?;

    orchestrator.migrate(destination, source).await
}

/// CLI flags override whatever the config file/environment supplied, last wins.
fn merge_settings(mut settings: Settings, args: MigrateArgs) -> Result<Settings, MigrationError> {
    if let Some(source) = args.source {
        settings.blobstore_path = source;
    }
    if let Some(concurrency) = args.concurrent_uploads {
        settings.concurrent_uploads = concurrency;
    }
    if !args.exclude.is_empty() {
        settings.exclude = args.exclude;
    }
    if let Some(destination) = args.destination {
        settings.destination = match destination {
            DestinationArg::S3 => DestinationKind::S3,
            DestinationArg::Azure => DestinationKind::Azure,
        };
    }

    let mut bucket_overrides: HashMap<String, String> = HashMap::new();
    if let Some(name) = args.buildpacks_bucket_name {
        bucket_overrides.insert("cc-buildpacks".into(), name);
    }
    if let Some(name) = args.droplets_bucket_name {
        bucket_overrides.insert("cc-droplets".into(), name);
    }
    if let Some(name) = args.packages_bucket_name {
        bucket_overrides.insert("cc-packages".into(), name);
    }
    if let Some(name) = args.resources_bucket_name {
        bucket_overrides.insert("cc-resources".into(), name);
    }
    settings.bucket_names.extend(bucket_overrides);

    if args.access_key.is_some() || args.secret_key.is_some() || args.region.is_some() || args.endpoint.is_some() {
        let mut s3 = settings.s3.unwrap_or(S3Settings {
            region: String::new(),
            endpoint: String::new(),
            access_key: String::new(),
            secret_key: String::new(),
            disable_ssl: false,
            insecure_skip_verify: false,
            use_multipart_uploads: false,
            checksum_mode: ChecksumModeSetting::StreamHash,
        });
        if let Some(v) = args.access_key {
            s3.access_key = v;
        }
        if let Some(v) = args.secret_key {
            s3.secret_key = v;
        }
        if let Some(v) = args.region {
            s3.region = v;
        }
        if let Some(v) = args.endpoint {
            s3.endpoint = v;
        }
        s3.disable_ssl |= args.disable_ssl;
        s3.insecure_skip_verify |= args.insecure_skip_verify;
        s3.use_multipart_uploads |= args.use_multipart_uploads;
        settings.s3 = Some(s3);
    }

    if args.account.is_some() || args.account_key.is_some() {
        let mut azure = settings.azure.unwrap_or(AzureSettings { account: String::new(), account_key: String::new() });
        if let Some(v) = args.account {
            azure.account = v;
        }
        if let Some(v) = args.account_key {
            azure.account_key = v;
        }
        settings.azure = Some(azure);
    }

    settings.validate()
}

fn setup_tracing() {
    let env_filter = EnvFilter::from_default_env();
    let enable_color = std::io::stdout().is_terminal();

    tracing_subscriber::fmt().pretty().with_env_filter(env_filter).with_ansi(enable_color).init();
}
