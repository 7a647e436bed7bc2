use crate::error::{Result, SyncError};
use crate::product::Product;
use crate::spatial::SpatialFilter;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime};
use std::fmt;

/// Width the catalog uses for zero-padded version numbers.
const VERSION_WIDTH: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instant {
    Naive(NaiveDateTime),
    Offset(DateTime<FixedOffset>),
}

impl Instant {
    /// Accepts a date, a naive date-time or an RFC 3339 date-time.
    pub fn parse(value: &str) -> Result<Self> {
        let value = value.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
            return Ok(Self::Offset(dt));
        }
        for format in [
            "%Y-%m-%dT%H:%M:%S",
            "%Y-%m-%dT%H:%M:%S%.f",
            "%Y-%m-%d %H:%M:%S",
        ] {
            if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
                return Ok(Self::Naive(dt));
            }
        }
        NaiveDate::parse_from_str(value, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(Self::Naive)
            .ok_or_else(|| SyncError::Configuration(format!("Invalid ISO-8601 time: {value}")))
    }

    fn as_utc(&self) -> NaiveDateTime {
        match self {
            Self::Naive(dt) => *dt,
            Self::Offset(dt) => dt.naive_utc(),
        }
    }
}

impl fmt::Display for Instant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Naive(dt) => write!(f, "{}", dt.format("%Y-%m-%dT%H:%M:%S%.f")),
            Self::Offset(dt) => write!(f, "{}", dt.to_rfc3339()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TemporalFilter {
    pub start: Instant,
    pub end: Instant,
}

impl TemporalFilter {
    pub fn parse(start: &str, end: &str) -> Result<Self> {
        let start = Instant::parse(start)?;
        let end = Instant::parse(end)?;
        if start.as_utc() > end.as_utc() {
            return Err(SyncError::Configuration(format!(
                "Time range start {start} is after end {end}"
            )));
        }
        Ok(Self { start, end })
    }

    pub fn to_query_value(&self) -> String {
        format!("{},{}", self.start, self.end)
    }
}

/// Version clauses sent to the catalog. Numeric versions are expanded to every
/// zero-padded width up to three digits, so "2" and "002" both yield
/// ["2", "02", "002"].
pub fn version_clauses(version: &str) -> Vec<String> {
    let version = version.trim();
    if version.is_empty() {
        return vec![];
    }
    if !version.chars().all(|c| c.is_ascii_digit()) {
        return vec![version.to_string()];
    }

    let stripped = version.trim_start_matches('0');
    let stripped = if stripped.is_empty() { "0" } else { stripped };

    let mut clauses: Vec<String> = (stripped.len()..=VERSION_WIDTH.max(stripped.len()))
        .map(|width| format!("{stripped:0>width$}"))
        .collect();
    if !clauses.iter().any(|c| c == version) {
        clauses.push(version.to_string());
    }
    clauses
}

#[derive(Debug, Clone, PartialEq)]
pub struct GranuleQuery {
    pub product: Product,
    pub version: Option<String>,
    pub spatial: SpatialFilter,
    pub temporal: Option<TemporalFilter>,
}

impl GranuleQuery {
    pub fn new(product: Product) -> Self {
        Self {
            product,
            version: None,
            spatial: SpatialFilter::None,
            temporal: None,
        }
    }

    pub fn version(mut self, version: &str) -> Self {
        self.version = Some(version.to_string());
        self
    }

    pub fn spatial(mut self, spatial: SpatialFilter) -> Self {
        self.spatial = spatial;
        self
    }

    pub fn temporal(mut self, temporal: Option<TemporalFilter>) -> Self {
        self.temporal = temporal;
        self
    }

    /// Filter parameters in catalog order: short name, versions, spatial, temporal.
    pub fn params(self: &Self) -> Vec<(String, String)> {
        let mut params = vec![("short_name".to_string(), self.product.short_name().to_string())];

        for clause in self.version.as_deref().map(version_clauses).unwrap_or_default() {
            params.push(("version".to_string(), clause));
        }
        if let Some((key, value)) = self.spatial.query_param() {
            params.push((key.to_string(), value));
        }
        if let Some(temporal) = &self.temporal {
            params.push(("temporal".to_string(), temporal.to_query_value()));
        }
        params
    }
}
