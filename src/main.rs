use anyhow::{Context, Result};
use clap::Parser;
use gedi_sync::checksum::HashAlgorithm;
use gedi_sync::cmr::{CatalogFormat, Paging, CMR_HOST, DATA_MIME_TYPE};
use gedi_sync::credentials::{self, default_netrc, TOKEN_VAR, USERNAME_VAR};
use gedi_sync::download::{self, parse_mode};
use gedi_sync::product::Product;
use gedi_sync::request::{SyncRequest, DEFAULT_VERSION};
use gedi_sync::session::{SessionBuilder, ARCHIVE_HOST, LOGIN_HOST, TIMEOUT};
use gedi_sync::sync::{sync_product, SyncReport};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Search the NASA CMR for GEDI granules and keep a local copy of each one up to date
#[derive(Parser, Debug)]
#[command(name = "gedi-sync", disable_version_flag = true)]
struct Args {
    /// Products to sync
    #[arg(value_enum, required_unless_present = "request")]
    products: Vec<Product>,

    /// Working directory for downloaded granules
    #[arg(short = 'D', long, default_value = ".")]
    directory: PathBuf,

    /// Earthdata login username
    #[arg(short = 'U', long, env = USERNAME_VAR)]
    user: Option<String>,

    /// Credentials file (defaults to ~/.netrc)
    #[arg(short = 'N', long)]
    netrc: Option<PathBuf>,

    /// Earthdata bearer token, used instead of username and password
    #[arg(long, env = TOKEN_VAR, hide_env_values = true)]
    token: Option<String>,

    /// Number of parallel workers; 0 syncs serially
    #[arg(short = 'P', long = "np", default_value_t = 0)]
    processes: usize,

    /// Dataset version
    #[arg(short = 'v', long = "version", default_value = DEFAULT_VERSION)]
    dataset_version: String,

    /// Bounding box: LAT_MIN LON_MIN LAT_MAX LON_MAX
    #[arg(
        short = 'B',
        long,
        num_args = 4,
        allow_negative_numbers = true,
        value_names = ["LAT_MIN", "LON_MIN", "LAT_MAX", "LON_MAX"],
        conflicts_with = "polygon"
    )]
    bbox: Option<Vec<f64>>,

    /// Polygon file (.shp, .kml, .json or .geojson)
    #[arg(short = 'p', long)]
    polygon: Option<PathBuf>,

    /// Time range as two ISO-8601 bounds
    #[arg(short = 'T', long, num_args = 2, value_names = ["START", "END"])]
    time: Option<Vec<String>>,

    /// Octal permission mode for created files and directories
    #[arg(short = 'M', long, default_value = "775", value_parser = parse_mode_arg)]
    mode: u32,

    #[arg(long, value_enum, default_value_t = Paging::Offset)]
    paging: Paging,

    #[arg(long, value_enum, default_value_t = CatalogFormat::References)]
    catalog: CatalogFormat,

    /// Hash used when a checksum descriptor does not name one
    #[arg(long, value_enum, default_value_t = HashAlgorithm::Md5)]
    checksum: HashAlgorithm,

    /// Connect and read timeout for every http call, in seconds
    #[arg(long, default_value_t = TIMEOUT.as_secs())]
    timeout: u64,

    /// Send credentials with every request rather than only to the login host
    /// and the host each request was addressed to
    #[arg(long)]
    authorization_header: bool,

    /// Read the sync request from a TOML file instead of the flags above
    #[arg(long, conflicts_with = "products")]
    request: Option<PathBuf>,

    /// Write the per-granule results as JSON
    #[arg(long)]
    report: Option<PathBuf>,

    /// Verbose output
    #[arg(short = 'V', long)]
    verbose: bool,
}

fn parse_mode_arg(value: &str) -> std::result::Result<u32, String> {
    parse_mode(value).map_err(|e| e.to_string())
}

impl Args {
    fn sync_request(self: &Self) -> Result<SyncRequest> {
        if let Some(path) = &self.request {
            return SyncRequest::read(path)
                .with_context(|| format!("Unable to load sync request {}", path.display()));
        }

        let time = match self.time.as_deref() {
            Some([start, end]) => Some([start.clone(), end.clone()]),
            _ => None,
        };

        Ok(SyncRequest {
            products: self.products.clone(),
            version: self.dataset_version.clone(),
            directory: self.directory.clone(),
            bbox: self.bbox.clone(),
            polygon: self.polygon.clone(),
            time,
            processes: self.processes,
            mode: format!("{:o}", self.mode),
            paging: self.paging,
            catalog: self.catalog,
            checksum: self.checksum,
            data_type: DATA_MIME_TYPE.to_string(),
        })
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "info,gedi_sync=debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    // Filters are validated before any credentials are requested
    let request = args.sync_request()?;
    let queries = request.queries()?;
    let options = request.options()?;

    let netrc = args.netrc.clone().or_else(default_netrc);
    let credentials = credentials::resolve(LOGIN_HOST, args.token.clone(), netrc.as_deref(), args.user.clone())?;
    let sessions = SessionBuilder::new(credentials)
        .timeout(Duration::from_secs(args.timeout))
        .authorization_header(args.authorization_header);

    sessions.build()?.check_connection(ARCHIVE_HOST).await?;
    download::create_dir(&options.directory, options.mode).await?;

    let search = request.search(CMR_HOST);
    let mut report = SyncReport::default();
    for query in &queries {
        info!(product = %query.product, "Syncing {}", query.product.description());
        let product_report = sync_product(&search, &sessions, query, &options)
            .await
            .with_context(|| format!("Sync of {} aborted", query.product))?;
        info!(product = %query.product, "{}", product_report.summary());
        report.extend(product_report);
    }

    if queries.len() > 1 {
        info!("{}", report.summary());
    }
    if let Some(path) = &args.report {
        report.write(path)?;
    }
    Ok(())
}
