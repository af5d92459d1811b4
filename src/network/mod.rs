// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

//! Outbound probe transports: HTTP(S), TCP/UDP and raw request blobs.

pub mod http;
pub mod raw;
pub mod socket;

pub use http::{HttpClient, RequestOptions, MAX_BODY_SIZE};
pub use socket::{parse_address, SocketClient, SocketConfig, Transport};
