//! Granule discovery against the NASA Common Metadata Repository (CMR)
mod json;
mod references;

use crate::error::{HttpError, Result, SyncError};
use crate::query::GranuleQuery;
use crate::session::Session;
use clap::ValueEnum;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info, warn};
use url::Url;

pub const CMR_HOST: &str = "https://cmr.earthdata.nasa.gov";
pub const PAGE_SIZE: usize = 10;
pub const DATA_MIME_TYPE: &str = "application/x-hdf5";

const SCROLL_HEADER: &str = "CMR-Scroll-Id";
const HITS_HEADER: &str = "CMR-Hits";

/// One matching granule, as discovered by the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GranuleRef {
    pub name: String,
    pub id: String,
    /// Catalog location of the granule's metadata record
    pub location: String,
    pub revision: Option<String>,
    /// Remote data file
    pub url: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Paging {
    /// Increment `page_num` until a page comes back empty
    #[default]
    Offset,
    /// Echo the scroll id until a page comes back empty or the hit count is reached
    Scroll,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CatalogFormat {
    /// XML reference listing; each granule's metadata record is fetched for its access url
    #[default]
    References,
    /// JSON feed with typed links
    Json,
}

pub trait GranuleSearch {
    /// All granules matching `query`, in discovery order and without duplicates.
    async fn search(&self, session: &Session, query: &GranuleQuery) -> Result<Vec<GranuleRef>>;
}

/// A catalog entry that still needs its metadata record fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Reference {
    name: String,
    id: String,
    location: String,
    revision: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PageEntry {
    Granule(GranuleRef),
    Reference(Reference),
}

#[derive(Debug, Default)]
struct Page {
    hits: Option<u64>,
    /// Entries on the page, including ones that were skipped
    received: usize,
    entries: Vec<PageEntry>,
}

/// Cursor state for a single search call.
#[derive(Debug)]
struct PageState {
    page_num: usize,
    scroll_id: Option<String>,
    hits: Option<u64>,
    received: u64,
    seen: HashSet<String>,
    granules: Vec<GranuleRef>,
}

impl PageState {
    fn new() -> Self {
        Self {
            page_num: 1,
            scroll_id: None,
            hits: None,
            received: 0,
            seen: HashSet::new(),
            granules: vec![],
        }
    }

    fn insert(&mut self, granule: GranuleRef) {
        if self.seen.insert(granule.name.clone()) {
            self.granules.push(granule);
        }
    }
}

#[derive(Debug, Clone)]
pub struct CmrSearch {
    host: String,
    format: CatalogFormat,
    paging: Paging,
    page_size: usize,
    data_type: String,
}

impl Default for CmrSearch {
    fn default() -> Self {
        Self::new(CMR_HOST)
    }
}

impl CmrSearch {
    pub fn new(host: &str) -> Self {
        Self {
            host: host.trim_end_matches('/').to_string(),
            format: CatalogFormat::default(),
            paging: Paging::default(),
            page_size: PAGE_SIZE,
            data_type: DATA_MIME_TYPE.to_string(),
        }
    }

    pub fn format(mut self, format: CatalogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn paging(mut self, paging: Paging) -> Self {
        self.paging = paging;
        self
    }

    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// MIME type of the link that points at the data file (json catalog only).
    pub fn data_type(mut self, data_type: &str) -> Self {
        self.data_type = data_type.to_string();
        self
    }

    fn endpoint(self: &Self) -> String {
        match self.format {
            CatalogFormat::References => format!("{}/search/granules", self.host),
            CatalogFormat::Json => format!("{}/search/granules.json", self.host),
        }
    }

    fn page_url(self: &Self, query: &GranuleQuery, state: &PageState) -> Result<Url> {
        let mut params = query.params();
        params.push(("page_size".to_string(), self.page_size.to_string()));
        match self.paging {
            Paging::Offset => params.push(("page_num".to_string(), state.page_num.to_string())),
            Paging::Scroll => params.push(("scroll".to_string(), "true".to_string())),
        }
        Url::parse_with_params(&self.endpoint(), &params)
            .map_err(|e| SyncError::Configuration(format!("Invalid catalog url: {e}")))
    }

    async fn fetch_page(
        self: &Self,
        session: &Session,
        query: &GranuleQuery,
        state: &mut PageState,
    ) -> Result<Page> {
        let url = self.page_url(query, state)?;

        let search_error = |source: HttpError| SyncError::Search {
            url: url.to_string(),
            source,
        };

        let mut headers = HeaderMap::new();
        if let Some(scroll_id) = &state.scroll_id {
            let value = HeaderValue::from_str(scroll_id).map_err(|_| {
                search_error(HttpError::Header(format!("Scroll id {scroll_id:?} is not a valid header value")))
            })?;
            headers.insert(SCROLL_HEADER, value);
        }

        debug!(%url, "Requesting catalog page");
        let response = session
            .get_with_headers(url.as_str(), headers)
            .await
            .map_err(search_error)?;

        if state.scroll_id.is_none() && self.paging == Paging::Scroll {
            // Without a scroll id every request would return the first page again
            let scroll_id = extract_header(response.headers(), SCROLL_HEADER).ok_or_else(|| {
                search_error(HttpError::Header(format!("Scroll response has no {SCROLL_HEADER} header")))
            })?;
            state.scroll_id = Some(scroll_id);
        }
        let header_hits = extract_header(response.headers(), HITS_HEADER).and_then(|h| h.parse().ok());

        let body = response
            .text()
            .await
            .map_err(|e| search_error(e.into()))?;

        let mut page = match self.format {
            CatalogFormat::References => references::parse_references(&body)?,
            CatalogFormat::Json => json::parse_feed(&body, &self.host, &self.data_type)?,
        };
        page.hits = page.hits.or(header_hits);
        Ok(page)
    }

    async fn resolve(self: &Self, session: &Session, entry: PageEntry) -> Result<Option<GranuleRef>> {
        let reference = match entry {
            PageEntry::Granule(granule) => return Ok(Some(granule)),
            PageEntry::Reference(reference) => reference,
        };

        let metadata = session
            .get(&reference.location)
            .await
            .map_err(|source| SyncError::Search {
                url: reference.location.clone(),
                source,
            })?
            .text()
            .await
            .map_err(|e| SyncError::Search {
                url: reference.location.clone(),
                source: e.into(),
            })?;

        match references::extract_access_url(&metadata) {
            Some(url) => Ok(Some(GranuleRef {
                name: reference.name,
                id: reference.id,
                location: reference.location,
                revision: reference.revision,
                url,
            })),
            None => {
                warn!(granule = %reference.name, "Metadata record has no online access url, skipping");
                Ok(None)
            }
        }
    }

    async fn clear_scroll(self: &Self, session: &Session, scroll_id: &str) {
        let url = format!("{}/search/clear-scroll", self.host);
        let body = serde_json::json!({ "scroll_id": scroll_id });
        if let Err(e) = session.post_with_headers(&url, HeaderMap::new(), &body).await {
            warn!(error = %e, "Unable to release scroll session");
        }
    }
}

impl GranuleSearch for CmrSearch {
    async fn search(&self, session: &Session, query: &GranuleQuery) -> Result<Vec<GranuleRef>> {
        let mut state = PageState::new();

        loop {
            let page = self.fetch_page(session, query, &mut state).await?;
            state.hits = state.hits.or(page.hits);
            state.received += page.received as u64;

            if page.received == 0 {
                break;
            }
            for entry in page.entries {
                if let Some(granule) = self.resolve(session, entry).await? {
                    state.insert(granule);
                }
            }

            match self.paging {
                Paging::Offset => state.page_num += 1,
                Paging::Scroll => {
                    if state.hits.is_some_and(|hits| state.received >= hits) {
                        break;
                    }
                }
            }
        }

        if let Some(scroll_id) = state.scroll_id.take() {
            self.clear_scroll(session, &scroll_id).await;
        }

        info!(
            product = %query.product,
            hits = ?state.hits,
            "Query returned {} files",
            state.granules.len()
        );
        Ok(state.granules)
    }
}

fn extract_header(headers: &HeaderMap, name: &str) -> Option<String> {
    Some(headers.get(name)?.to_str().ok()?.to_string())
}
