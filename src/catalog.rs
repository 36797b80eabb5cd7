//! # Catalog Search
//!
//! Granule search against the Common Metadata Repository (CMR). A query names a
//! dataset, a bounding box and a time window; the client follows the
//! `CMR-Search-After` header until every match has been returned (or the
//! configured cap is reached).

use crate::auth::EarthdataSession;
use crate::error::{PipelineError, PipelineResult};
use crate::input::{BoundingBox, PipelineConfig, TimeRange};
use log::{debug, info};
use serde::Deserialize;

/// Largest page CMR serves
pub const MAX_PAGE_SIZE: usize = 2000;

const SEARCH_AFTER_HEADER: &str = "CMR-Search-After";
const HITS_HEADER: &str = "CMR-Hits";

/// One download link attached to a granule.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RelatedUrl {
    #[serde(rename = "URL")]
    pub url: String,
    /// CMR link type, e.g. `GET DATA` or `GET DATA VIA DIRECT ACCESS`
    #[serde(rename = "Type", default)]
    pub kind: String,
}

/// A catalog search result. Only its links are consumed downstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Granule {
    pub concept_id: String,
    pub granule_ur: String,
    pub related_urls: Vec<RelatedUrl>,
}

#[derive(Deserialize)]
struct UmmPage {
    #[serde(default)]
    items: Vec<UmmItem>,
}

#[derive(Deserialize)]
struct UmmItem {
    meta: UmmMeta,
    umm: UmmGranule,
}

#[derive(Deserialize)]
struct UmmMeta {
    #[serde(rename = "concept-id")]
    concept_id: String,
}

#[derive(Deserialize)]
struct UmmGranule {
    #[serde(rename = "GranuleUR", default)]
    granule_ur: String,
    #[serde(rename = "RelatedUrls", default)]
    related_urls: Vec<RelatedUrl>,
}

/// Parses one `granules.umm_json` response body.
pub fn parse_granule_page(body: &str) -> PipelineResult<Vec<Granule>> {
    let page: UmmPage = serde_json::from_str(body)
        .map_err(|e| PipelineError::Catalog(format!("Malformed search response: {}", e)))?;
    Ok(page
        .items
        .into_iter()
        .map(|item| Granule {
            concept_id: item.meta.concept_id,
            granule_ur: item.umm.granule_ur,
            related_urls: item.umm.related_urls,
        })
        .collect())
}

/// Spatial and temporal granule query.
#[derive(Debug, Clone, PartialEq)]
pub struct GranuleQuery {
    pub short_name: String,
    pub bounding_box: BoundingBox,
    pub time_range: TimeRange,
    pub cloud_hosted: bool,
    /// `None` requests every match
    pub max_granules: Option<usize>,
}

impl GranuleQuery {
    pub fn from_config(config: &PipelineConfig) -> Self {
        GranuleQuery {
            short_name: config.dataset.clone(),
            bounding_box: config.bounding_box,
            time_range: config.time_range,
            cloud_hosted: config.cloud_hosted,
            max_granules: config.max_granules,
        }
    }

    pub fn page_size(&self) -> usize {
        self.max_granules
            .map(|max| max.min(MAX_PAGE_SIZE))
            .unwrap_or(MAX_PAGE_SIZE)
    }

    pub fn query_params(&self) -> Vec<(&'static str, String)> {
        vec![
            ("short_name", self.short_name.clone()),
            ("bounding_box", self.bounding_box.to_query_string()),
            ("temporal", self.time_range.to_query_string()),
            ("cloud_hosted", self.cloud_hosted.to_string()),
            ("page_size", self.page_size().to_string()),
        ]
    }
}

/// Client for the CMR granule search endpoint.
pub struct CatalogClient {
    session: EarthdataSession,
    base_url: String,
}

impl CatalogClient {
    pub fn new(session: &EarthdataSession, base_url: &str) -> Self {
        CatalogClient {
            session: session.clone(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn search_url(&self) -> String {
        format!("{}/search/granules.umm_json", self.base_url)
    }

    /// Runs the query, paging until all matches are collected.
    pub async fn search(&self, query: &GranuleQuery) -> PipelineResult<Vec<Granule>> {
        let url = self.search_url();
        let params = query.query_params();
        let page_size = query.page_size();
        let mut granules = Vec::new();
        let mut search_after: Option<String> = None;

        info!(
            "Searching {} for {} within {} during {}",
            url,
            query.short_name,
            query.bounding_box,
            query.time_range.to_query_string()
        );

        loop {
            let mut request = self.session.authorized_get(&url).query(&params);
            if let Some(ref token) = search_after {
                request = request.header(SEARCH_AFTER_HEADER, token);
            }

            let response = request
                .send()
                .await
                .map_err(|e| PipelineError::Catalog(format!("{}: {}", url, e)))?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(PipelineError::Catalog(format!(
                    "{} returned status {}: {}",
                    url, status, body
                )));
            }

            if search_after.is_none() {
                if let Some(hits) = response.headers().get(HITS_HEADER) {
                    info!("Catalog reports {} matching granules", hits.to_str().unwrap_or("?"));
                }
            }
            let next = response
                .headers()
                .get(SEARCH_AFTER_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);

            let body = response
                .text()
                .await
                .map_err(|e| PipelineError::Catalog(format!("{}: {}", url, e)))?;
            let page = parse_granule_page(&body)?;
            let page_len = page.len();
            granules.extend(page);
            debug!("Received {} granules ({} total)", page_len, granules.len());

            match next_page(page_len, granules.len(), page_size, next, query.max_granules) {
                PageStep::Continue(token) => search_after = Some(token),
                PageStep::Stop { keep } => {
                    granules.truncate(keep);
                    break;
                }
            }
        }

        info!("Catalog search returned {} granules", granules.len());
        Ok(granules)
    }
}

/// What the search loop does after receiving a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageStep {
    /// Request the next page with this `CMR-Search-After` token
    Continue(String),
    /// Stop, keeping the first `keep` granules collected so far
    Stop { keep: usize },
}

/// Decides whether to request another page.
///
/// The search stops once `max_granules` is reached (truncating the overshoot
/// of the last page), when a page comes back shorter than `page_size`, or
/// when the catalog sends no continuation token.
pub fn next_page(
    page_len: usize,
    total: usize,
    page_size: usize,
    next: Option<String>,
    max_granules: Option<usize>,
) -> PageStep {
    if let Some(max) = max_granules
        && total >= max
    {
        return PageStep::Stop { keep: max };
    }
    match next {
        Some(token) if page_len >= page_size && page_len > 0 => PageStep::Continue(token),
        _ => PageStep::Stop { keep: total },
    }
}
