// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

//! Raw-mode probes: a pre-formatted HTTP blob is written straight onto a
//! TCP (or TLS) connection and the answer is captured verbatim.

use std::collections::HashMap;
use std::time::Duration;

use tracing::debug;

use crate::errors::NetworkError;
use crate::network::http::MAX_BODY_SIZE;
use crate::network::socket::{parse_address, SocketClient, SocketConfig, Transport};
use crate::types::{HttpRequest, HttpResponse, UrlRecord};

/// Send a raw request blob to the target and build request/response
/// records from the wire bytes.
pub async fn send_raw_request(
    raw: &str,
    target: &str,
    proxy: &str,
    timeout: Duration,
) -> Result<(HttpRequest, HttpResponse), NetworkError> {
    let addr = parse_address(target)?;
    let conf = SocketConfig {
        transport: Transport::Tcp,
        read_timeout: timeout,
        write_timeout: timeout,
        dial_timeout: timeout,
        max_retries: 1,
        proxy: proxy.to_string(),
        use_tls: addr.use_tls,
        server_name: addr.host.clone(),
        read_size: 16 * 1024,
        ..Default::default()
    };

    let blob = normalize_blob(raw, &addr.host);
    debug!("raw probe to {} ({} bytes)", addr.address, blob.len());

    let mut client = SocketClient::connect(&addr.address, conf).await?;
    client.send(blob.as_bytes()).await?;

    // Servers answering raw probes close the connection when done; read
    // until silence or the body cap.
    let mut wire = Vec::new();
    while wire.len() < MAX_BODY_SIZE {
        match client.receive().await {
            Ok(chunk) if chunk.is_empty() => break,
            Ok(chunk) => wire.extend_from_slice(&chunk),
            Err(_) => break,
        }
    }

    let request = HttpRequest {
        method: blob
            .split_whitespace()
            .next()
            .unwrap_or("GET")
            .to_string(),
        url: UrlRecord::from_str(target).unwrap_or_default(),
        raw: blob.clone().into_bytes(),
        ..Default::default()
    };
    let response = parse_wire_response(&wire);
    Ok((request, response))
}

/// Minimal request/response records for tcp/udp probes:
/// `raw = address + CRLF + payload`.
pub fn probe_records(
    address: &str,
    sent: &[u8],
    received: &[u8],
) -> (HttpRequest, HttpResponse, String) {
    let mut raw = address.as_bytes().to_vec();
    raw.extend_from_slice(b"\r\n");
    raw.extend_from_slice(sent);
    let request = HttpRequest {
        raw,
        ..Default::default()
    };
    let response = HttpResponse {
        raw: received.to_vec(),
        body: received.to_vec(),
        ..Default::default()
    };
    (request, response, address.to_string())
}

fn normalize_blob(raw: &str, host: &str) -> String {
    let unified = raw.replace("\r\n", "\n");
    let mut sections = unified.splitn(2, "\n\n");
    let head = sections.next().unwrap_or_default();
    let body = sections.next().unwrap_or_default();

    let mut lines: Vec<String> = head.lines().map(|l| l.to_string()).collect();
    let has_host = lines
        .iter()
        .skip(1)
        .any(|l| l.to_lowercase().starts_with("host:"));
    if !has_host && !lines.is_empty() {
        lines.insert(1, format!("Host: {}", host));
    }

    let mut out = lines.join("\r\n");
    out.push_str("\r\n\r\n");
    out.push_str(body);
    out
}

fn parse_wire_response(wire: &[u8]) -> HttpResponse {
    let text = String::from_utf8_lossy(wire);
    let status = text
        .strip_prefix("HTTP/")
        .and_then(|rest| rest.split_whitespace().nth(1))
        .and_then(|code| code.parse::<i32>().ok())
        .unwrap_or(0);

    let (raw_header, body) = match find_header_end(wire) {
        Some(idx) => (wire[..idx].to_vec(), wire[idx..].to_vec()),
        None => (Vec::new(), wire.to_vec()),
    };

    let mut headers = HashMap::new();
    for line in String::from_utf8_lossy(&raw_header).lines().skip(1) {
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_lowercase(), value.trim().to_string());
        }
    }
    let content_type = headers.get("content-type").cloned().unwrap_or_default();

    HttpResponse {
        status,
        headers,
        content_type,
        body,
        raw: wire.to_vec(),
        raw_header,
        ..Default::default()
    }
}

fn find_header_end(wire: &[u8]) -> Option<usize> {
    wire.windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|i| i + 4)
        .or_else(|| wire.windows(2).position(|w| w == b"\n\n").map(|i| i + 2))
}
