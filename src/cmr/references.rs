use super::{Page, PageEntry, Reference};
use crate::error::{Result, SyncError};
use roxmltree::Node;
use tracing::warn;

pub(super) fn parse_references(content: &str) -> Result<Page> {
    let doc = roxmltree::Document::parse(content).map_err(|e| SyncError::parse("reference listing", e))?;

    // total number of hits for the query, not just this page
    let hits = doc
        .descendants()
        .find(|n| n.has_tag_name("hits"))
        .and_then(|n| n.text())
        .and_then(|t| t.trim().parse().ok());

    let mut page = Page {
        hits,
        ..Default::default()
    };

    for node in doc.descendants().filter(|n| n.has_tag_name("reference")) {
        page.received += 1;
        match extract_reference(node) {
            Some(reference) => page.entries.push(PageEntry::Reference(reference)),
            None => warn!("Reference without name, id or location, skipping"),
        }
    }
    Ok(page)
}

fn extract_child_text(node: Node, tag: &str) -> Option<String> {
    let text = node.children().find(|n| n.has_tag_name(tag))?.text()?.trim();
    if text.is_empty() {
        return None;
    }
    Some(text.to_string())
}

fn extract_reference(node: Node) -> Option<Reference> {
    Some(Reference {
        name: extract_child_text(node, "name")?,
        id: extract_child_text(node, "id")?,
        location: extract_child_text(node, "location")?,
        revision: extract_child_text(node, "revision-id"),
    })
}

/// First `OnlineAccessURLs/OnlineAccessURL/URL` of a granule metadata record.
pub(super) fn extract_access_url(content: &str) -> Option<String> {
    let doc = roxmltree::Document::parse(content).ok()?;
    let url = doc
        .descendants()
        .filter(|n| n.has_tag_name("OnlineAccessURLs"))
        .flat_map(|n| n.children().filter(|c| c.has_tag_name("OnlineAccessURL")))
        .find_map(|n| extract_child_text(n, "URL"))?;
    Some(url)
}
