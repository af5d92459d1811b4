// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Tunnistin - Base Info Extractor
 * Canonical root probe per target: protocol resolution, title, server
 * banner, favicon hash and technology catalog summary
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

pub mod favicon;
pub mod server;
pub mod title;

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::errors::ScannerError;
use crate::network::{HttpClient, RequestOptions};
use crate::techdetect::{TechCatalog, TechStack};
use crate::types::{HttpRequest, HttpResponse, ServerInfo};

/// Everything learned from the canonical root probe of one target.
#[derive(Debug, Clone)]
pub struct BaseInfoResponse {
    /// Target URL after protocol resolution and redirects.
    pub url: String,
    pub title: String,
    pub server: ServerInfo,
    pub status_code: i32,
    pub technologies: Option<TechStack>,
    /// Canonical request/response pair seeding the per-target variable
    /// bundle and the probe cache.
    pub request: HttpRequest,
    pub response: HttpResponse,
}

/// Probe the target root and assemble its base information.
pub async fn get_base_info(
    http: &Arc<HttpClient>,
    catalog: &TechCatalog,
    target: &str,
    proxy: &str,
    timeout: u64,
    retries: u32,
) -> Result<BaseInfoResponse, ScannerError> {
    // Resolve the scheme first; fall back to https:// when probing fails.
    let mut resolved = match http.check_protocol(target, proxy).await {
        Ok(u) => u,
        Err(e) => {
            debug!("protocol resolution failed for {}: {}", target, e);
            target.to_string()
        }
    };
    if !resolved.starts_with("http://") && !resolved.starts_with("https://") {
        resolved = format!("https://{}", resolved);
    }

    let timeout = if timeout == 0 { 5 } else { timeout };
    let options = RequestOptions {
        proxy: proxy.to_string(),
        timeout: Duration::from_secs(timeout),
        retries,
        follow_redirects: true,
        ..Default::default()
    };

    let (request, mut response) = http
        .send("GET", &resolved, "", &options)
        .await
        .map_err(ScannerError::Network)?;

    // The base URL follows redirects; rules probe relative to it.
    let final_url = response.url.to_url_string();

    let page_title = title::get_title(http, proxy, &final_url, &response).await;
    let server_info = server::server_info_from_response(&response);

    let hasher = favicon::FaviconHasher::new(Arc::clone(http), proxy);
    hasher.enrich(&request, &mut response).await;

    let technologies = Some(catalog.detect(&response.headers, &response.body));

    Ok(BaseInfoResponse {
        url: final_url,
        title: page_title,
        server: server_info,
        status_code: response.status,
        technologies,
        request,
        response,
    })
}
