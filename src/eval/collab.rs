// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Tunnistin - Out-of-band Collaborator
 * DNS / JNDI interaction checks behind the wait() and jndi() builtins
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use std::time::Duration;

use once_cell::sync::Lazy;
use tracing::debug;

use crate::str_utils::random_string;
use crate::types::{Reverse, UrlRecord};

/// Collaborator endpoints, taken from the environment once per process.
pub struct CollabConfig {
    pub ceye_api_key: String,
    pub ceye_domain: String,
    pub jndi_host: String,
    pub ldap_port: String,
    pub api_port: String,
}

static CONFIG: Lazy<CollabConfig> = Lazy::new(|| CollabConfig {
    ceye_api_key: std::env::var("REVERSE_CEYE_API_KEY").unwrap_or_default(),
    ceye_domain: std::env::var("REVERSE_CEYE_DOMAIN").unwrap_or_default(),
    jndi_host: std::env::var("REVERSE_JNDI_HOST").unwrap_or_default(),
    ldap_port: std::env::var("REVERSE_LDAP_PORT").unwrap_or_default(),
    api_port: std::env::var("REVERSE_API_PORT").unwrap_or_default(),
});

/// Fresh DNS-interaction handle for a `set: {reverse: newReverse()}`
/// variable. Useless (and harmless) when no platform is configured.
pub fn new_reverse() -> Reverse {
    let sub = random_string(12);
    let url_str = format!("http://{}.{}", sub, CONFIG.ceye_domain);
    let url = UrlRecord::from_str(&url_str).unwrap_or_default();
    Reverse {
        domain: url.domain.clone(),
        ip: url.host.clone(),
        url,
        is_domain_name_server: false,
    }
}

/// Fresh JNDI-interaction handle for `newJNDI()`.
pub fn new_jndi() -> Reverse {
    let token = random_string(22);
    let url_str = format!("http://{}:{}/{}", CONFIG.jndi_host, CONFIG.ldap_port, token);
    let url = UrlRecord::from_str(&url_str).unwrap_or_default();
    Reverse {
        domain: url.domain.clone(),
        ip: CONFIG.jndi_host.clone(),
        url,
        is_domain_name_server: false,
    }
}

/// `r.wait(t)`: sleep `t` seconds, then ask the DNS platform whether the
/// subdomain resolved. Unconfigured platform always reports false.
pub fn reverse_check(reverse: &Reverse, timeout: i64) -> bool {
    if CONFIG.ceye_api_key.is_empty() || reverse.domain.is_empty() {
        return false;
    }
    blocking_sleep(Duration::from_secs(timeout.max(0) as u64));

    let sub = reverse.domain.split('.').next().unwrap_or_default();
    let url = format!(
        "http://api.ceye.io/v1/records?token={}&type=dns&filter={}",
        CONFIG.ceye_api_key, sub
    );
    match blocking_get(&url) {
        Some(body) => {
            !body.contains(r#""data": []"#) && body.contains(r#"{"code": 200"#)
        }
        None => false,
    }
}

/// `r.jndi(t)`: sleep `t` seconds, then ask the JNDI listener whether the
/// token was requested.
pub fn jndi_check(reverse: &Reverse, timeout: i64) -> bool {
    if CONFIG.jndi_host.is_empty() && CONFIG.api_port.is_empty() {
        return false;
    }
    blocking_sleep(Duration::from_secs(timeout.max(0) as u64));

    let path = reverse.url.path.strip_prefix('/').unwrap_or(&reverse.url.path);
    let url = format!(
        "http://{}:{}/?api={}",
        reverse.url.domain, CONFIG.api_port, path
    );
    match blocking_get(&url) {
        Some(body) => body.contains("yes"),
        None => false,
    }
}

/// Sleep usable from inside expression evaluation, which runs on runtime
/// worker threads. Requires the multi-thread runtime the binary uses.
pub fn blocking_sleep(d: Duration) {
    if d.is_zero() {
        return;
    }
    match tokio::runtime::Handle::try_current() {
        Ok(_) => tokio::task::block_in_place(|| std::thread::sleep(d)),
        Err(_) => std::thread::sleep(d),
    }
}

fn blocking_get(url: &str) -> Option<String> {
    debug!("collaborator poll: {}", url);
    let fetch = async {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .danger_accept_invalid_certs(true)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .ok()?;
        let resp = client.get(url).send().await.ok()?;
        resp.text().await.ok()
    };
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => tokio::task::block_in_place(|| handle.block_on(fetch)),
        Err(_) => tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .ok()?
            .block_on(fetch),
    }
}
