//! Offset pagination over Compass search endpoints.

use crate::compass::client::RawResponse;
use crate::compass::json::decode_json;
use crate::compass::models::PageResult;
use crate::compass::session::TermSession;
use crate::compass::{CompassApi, CompassError};
use reqwest::header::COOKIE;
use serde::de::DeserializeOwned;
use tracing::{debug, trace, warn};
use url::Url;

/// Largest `pageMaxSize` Compass honours.
pub const MAX_PAGE_SIZE: u32 = 500;

/// One page of an endpoint, built fresh for every request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub endpoint: Url,
    pub offset: u64,
    pub page_size: u32,
}

impl PageRequest {
    pub fn url(&self) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("pageOffset", &self.offset.to_string())
            .append_pair("pageMaxSize", &self.page_size.to_string());
        url
    }
}

/// Clamp a requested page size into `1..=MAX_PAGE_SIZE`.
pub fn clamp_page_size(requested: u32) -> u32 {
    requested.clamp(1, MAX_PAGE_SIZE)
}

/// A page that decoded cleanly.
struct Page<T> {
    success: bool,
    total_count: u64,
    items: Vec<T>,
}

fn decode_page<T: DeserializeOwned>(raw: RawResponse) -> Result<Page<T>, CompassError> {
    let malformed = |source: anyhow::Error| CompassError::ParseFailed {
        status: raw.status.as_u16(),
        url: raw.url.clone(),
        source,
    };

    let page: PageResult<T> = decode_json(&raw.body).map_err(malformed)?;
    let items = page
        .data
        .ok_or_else(|| malformed(anyhow::anyhow!("page data was null")))?;
    Ok(Page {
        success: page.success,
        total_count: page.total_count,
        items,
    })
}

/// Walks one endpoint page by page under a term session.
///
/// Pages are requested strictly in order. The server-reported total is
/// re-read from every page since Compass has been seen to change it
/// mid-crawl. A page flagged unsuccessful, or an empty page before the
/// reported total is reached, is taken as a lost session: the session is
/// renewed and the same offset requested again, at most once per offset.
pub struct Paginator<'a> {
    api: &'a CompassApi,
    session: &'a TermSession,
    page_size: u32,
}

impl<'a> Paginator<'a> {
    pub fn new(api: &'a CompassApi, session: &'a TermSession, page_size: u32) -> Self {
        Self {
            api,
            session,
            page_size: clamp_page_size(page_size),
        }
    }

    /// Fetch every page of `endpoint`, concatenated in offset order.
    pub async fn fetch_all<T: DeserializeOwned>(
        &self,
        endpoint: Url,
    ) -> Result<Vec<T>, CompassError> {
        let renewal_budget = self.api.client().policy().max_attempts;
        let mut collected: Vec<T> = Vec::new();
        let mut renewals: u32 = 0;
        let mut renewed_at: Option<u64> = None;

        loop {
            let request = PageRequest {
                endpoint: endpoint.clone(),
                offset: collected.len() as u64,
                page_size: self.page_size,
            };
            let url = request.url();
            let cookie = self.session.cookie().await;

            let page: Page<T> = self
                .api
                .client()
                .send(
                    |http| http.get(url.clone()).header(COOKIE, cookie.header.as_str()),
                    decode_page,
                )
                .await?;

            let lost_session =
                !page.success || (page.items.is_empty() && request.offset < page.total_count);
            if lost_session {
                if renewed_at != Some(request.offset) && renewals < renewal_budget {
                    warn!(
                        term = self.session.term_code(),
                        url = url.as_str(),
                        offset = request.offset,
                        total = page.total_count,
                        success = page.success,
                        "Page looks like a lost session, renewing"
                    );
                    renewals += 1;
                    renewed_at = Some(request.offset);
                    self.api.renew_session(self.session, cookie.generation).await?;
                    continue;
                }
                if !page.success {
                    return Err(CompassError::InvalidSession(format!(
                        "search at offset {} still unsuccessful after renewal",
                        request.offset
                    )));
                }
            }

            if page.items.is_empty() {
                if (collected.len() as u64) < page.total_count {
                    warn!(
                        url = endpoint.as_str(),
                        collected = collected.len(),
                        total = page.total_count,
                        "Empty page before reported total, stopping"
                    );
                }
                break;
            }

            collected.extend(page.items);
            trace!(
                url = endpoint.as_str(),
                collected = collected.len(),
                total = page.total_count,
                "Fetched page"
            );

            if collected.len() as u64 >= page.total_count {
                break;
            }
        }

        debug!(url = endpoint.as_str(), count = collected.len(), "Pagination complete");
        Ok(collected)
    }
}
