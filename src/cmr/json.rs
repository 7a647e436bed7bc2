use super::{GranuleRef, Page, PageEntry};
use crate::error::{Result, SyncError};
use serde::Deserialize;
use tracing::warn;

#[derive(Deserialize, Debug)]
struct Response {
    feed: Feed,
}

#[derive(Deserialize, Debug)]
struct Feed {
    #[serde(default)]
    entry: Vec<Entry>,
}

#[derive(Deserialize, Debug)]
struct Entry {
    id: String,
    title: Option<String>,
    producer_granule_id: Option<String>,
    revision_id: Option<serde_json::Value>,
    #[serde(default)]
    links: Vec<Link>,
}

#[derive(Deserialize, Debug)]
struct Link {
    href: String,
    #[serde(rename = "type")]
    mime_type: Option<String>,
    rel: Option<String>,
}

pub(super) fn parse_feed(content: &str, host: &str, data_type: &str) -> Result<Page> {
    let response: Response =
        serde_json::from_str(content).map_err(|e| SyncError::parse("granule feed", e))?;

    let mut page = Page {
        received: response.feed.entry.len(),
        ..Default::default()
    };

    for entry in response.feed.entry {
        match extract_granule(entry, host, data_type) {
            Ok(granule) => page.entries.push(PageEntry::Granule(granule)),
            Err(id) => warn!(granule = %id, data_type, "No data link of the expected type, skipping"),
        }
    }
    Ok(page)
}

fn extract_granule(entry: Entry, host: &str, data_type: &str) -> std::result::Result<GranuleRef, String> {
    let Some(url) = extract_data_link(&entry.links, data_type) else {
        return Err(entry.id);
    };

    let name = entry
        .producer_granule_id
        .or(entry.title)
        .unwrap_or_else(|| entry.id.clone());
    let revision = entry.revision_id.map(|r| match r {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    });

    Ok(GranuleRef {
        name,
        location: format!("{host}/search/concepts/{}", entry.id),
        id: entry.id,
        revision,
        url,
    })
}

fn extract_data_link(links: &[Link], data_type: &str) -> Option<String> {
    links
        .iter()
        // inherited collection links are documentation, not data
        .filter(|l| !l.rel.as_deref().is_some_and(|rel| rel.ends_with("/metadata#")))
        .find(|l| l.mime_type.as_deref() == Some(data_type))
        .map(|l| l.href.clone())
}
