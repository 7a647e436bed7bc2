use crate::checksum::HashAlgorithm;
use crate::cmr::{CatalogFormat, CmrSearch, Paging, DATA_MIME_TYPE};
use crate::download::parse_mode;
use crate::error::{Result, SyncError};
use crate::product::Product;
use crate::query::{GranuleQuery, TemporalFilter};
use crate::spatial::{BoundingBox, SpatialFilter};
use crate::sync::SyncOptions;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_VERSION: &str = "002";

fn default_version() -> String {
    DEFAULT_VERSION.to_string()
}

fn default_mode() -> String {
    "775".to_string()
}

fn default_data_type() -> String {
    DATA_MIME_TYPE.to_string()
}

/// A complete sync run, as read from or written to a TOML file.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct SyncRequest {
    pub products: Vec<Product>,
    #[serde(default = "default_version")]
    pub version: String,
    pub directory: PathBuf,
    /// lat_min, lon_min, lat_max, lon_max
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub polygon: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<[String; 2]>,
    #[serde(default)]
    pub processes: usize,
    /// Octal permission bits for created files and directories
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default)]
    pub paging: Paging,
    #[serde(default)]
    pub catalog: CatalogFormat,
    #[serde(default)]
    pub checksum: HashAlgorithm,
    /// MIME type of the data link in the json catalog
    #[serde(default = "default_data_type")]
    pub data_type: String,
}

impl SyncRequest {
    pub fn new(products: Vec<Product>, directory: impl Into<PathBuf>) -> Self {
        Self {
            products,
            version: default_version(),
            directory: directory.into(),
            bbox: None,
            polygon: None,
            time: None,
            processes: 0,
            mode: default_mode(),
            paging: Paging::default(),
            catalog: CatalogFormat::default(),
            checksum: HashAlgorithm::default(),
            data_type: default_data_type(),
        }
    }

    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).map_err(|e| SyncError::io(&path, e))?;
        let request: Self =
            toml::from_str(&content).map_err(|e| SyncError::parse("sync request", e))?;
        Ok(request)
    }

    pub fn write<P: AsRef<Path>>(self: &Self, path: P) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| SyncError::parse("sync request", e))?;
        fs::write(&path, content).map_err(|e| SyncError::io(&path, e))
    }

    /// One query per product, with the spatial and temporal filters validated
    /// before anything touches the network.
    pub fn queries(self: &Self) -> Result<Vec<GranuleQuery>> {
        if self.products.is_empty() {
            return Err(SyncError::Configuration("No products requested".to_string()));
        }

        let bbox = self.bbox.as_deref().map(BoundingBox::from_slice).transpose()?;
        let spatial = SpatialFilter::resolve(bbox, self.polygon.as_deref())?;
        let temporal = self
            .time
            .as_ref()
            .map(|[start, end]| TemporalFilter::parse(start, end))
            .transpose()?;

        let queries = self
            .products
            .iter()
            .map(|product| {
                GranuleQuery::new(*product)
                    .version(&self.version)
                    .spatial(spatial.clone())
                    .temporal(temporal)
            })
            .collect();
        Ok(queries)
    }

    pub fn options(self: &Self) -> Result<SyncOptions> {
        Ok(SyncOptions {
            directory: self.directory.clone(),
            processes: self.processes,
            mode: parse_mode(&self.mode)?,
            algorithm: self.checksum,
        })
    }

    pub fn search(self: &Self, host: &str) -> CmrSearch {
        CmrSearch::new(host)
            .format(self.catalog)
            .paging(self.paging)
            .data_type(&self.data_type)
    }
}
