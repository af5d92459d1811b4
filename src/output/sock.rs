// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Tunnistin - Socket Sink
 * Unix-domain socket broadcaster: every connected consumer receives
 * newline-delimited JSON result records
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::UnixListener;
use tokio::sync::Mutex;
use tracing::{debug, error};

use crate::errors::ScannerError;
use crate::output::file::ResultFields;

type Connections = Arc<Mutex<HashMap<u64, OwnedWriteHalf>>>;

/// Unix-socket result sink. Connections are tracked, read from for
/// keepalive, and closed on shutdown.
pub struct SockSink {
    path: PathBuf,
    connections: Connections,
    accept_task: tokio::task::JoinHandle<()>,
}

impl SockSink {
    pub fn bind(path: &Path) -> Result<Self, ScannerError> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)
                    .map_err(|e| ScannerError::Output(format!("{}: {}", dir.display(), e)))?;
            }
        }
        // A stale socket file from a previous run blocks the bind.
        let _ = std::fs::remove_file(path);

        let listener = UnixListener::bind(path)
            .map_err(|e| ScannerError::Output(format!("{}: {}", path.display(), e)))?;

        let connections: Connections = Arc::new(Mutex::new(HashMap::new()));
        let accept_conns = Arc::clone(&connections);
        let accept_task = tokio::spawn(async move {
            let mut next_id: u64 = 0;
            loop {
                match listener.accept().await {
                    Ok((stream, _)) => {
                        let id = next_id;
                        next_id += 1;
                        let (mut read_half, write_half) = stream.into_split();
                        accept_conns.lock().await.insert(id, write_half);
                        debug!("socket consumer {} connected", id);

                        // Keepalive reader; drops the connection when the
                        // consumer goes away.
                        let conns = Arc::clone(&accept_conns);
                        tokio::spawn(async move {
                            let mut buf = [0u8; 1024];
                            loop {
                                match read_half.read(&mut buf).await {
                                    Ok(0) | Err(_) => break,
                                    Ok(_) => {}
                                }
                            }
                            conns.lock().await.remove(&id);
                            debug!("socket consumer {} disconnected", id);
                        });
                    }
                    Err(e) => {
                        error!("socket accept failed: {}", e);
                        break;
                    }
                }
            }
        });

        Ok(Self {
            path: path.to_path_buf(),
            connections,
            accept_task,
        })
    }

    /// Broadcast one result as a newline-terminated JSON record to every
    /// connected consumer. Dead consumers are dropped on the way.
    pub async fn write(&self, fields: &ResultFields) -> Result<(), ScannerError> {
        let mut line = fields.to_json_line()?;
        line.push('\n');
        let payload = line.into_bytes();

        let mut conns = self.connections.lock().await;
        let mut dead = Vec::new();
        for (id, half) in conns.iter_mut() {
            if half.write_all(&payload).await.is_err() {
                dead.push(*id);
            }
        }
        for id in dead {
            conns.remove(&id);
        }
        Ok(())
    }

    pub async fn close(&self) {
        self.accept_task.abort();
        let mut conns = self.connections.lock().await;
        for (_, mut half) in conns.drain() {
            let _ = half.shutdown().await;
        }
        let _ = std::fs::remove_file(&self.path);
    }
}

impl Drop for SockSink {
    fn drop(&mut self) {
        self.accept_task.abort();
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncBufReadExt;
    use tokio::io::BufReader;
    use tokio::net::UnixStream;

    fn fields() -> ResultFields {
        ResultFields {
            url: "http://example.com".into(),
            status_code: 200,
            title: "t".into(),
            server: "nginx".into(),
            finger_ids: vec!["nginx".into()],
            finger_names: vec!["Nginx".into()],
            headers: String::new(),
            technologies: None,
            matched: true,
            remark: String::new(),
        }
    }

    #[tokio::test]
    async fn test_broadcasts_json_lines_to_consumers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.sock");
        let sink = SockSink::bind(&path).unwrap();

        let stream = UnixStream::connect(&path).await.unwrap();
        // Give the accept loop a beat to register the consumer.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        sink.write(&fields()).await.unwrap();
        sink.write(&fields()).await.unwrap();

        let mut reader = BufReader::new(stream);
        for _ in 0..2 {
            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            let v: serde_json::Value = serde_json::from_str(line.trim()).unwrap();
            assert_eq!(v["url"], "http://example.com");
            assert_eq!(v["match_result"], true);
        }

        sink.close().await;
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_write_without_consumers_is_fine() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.sock");
        let sink = SockSink::bind(&path).unwrap();
        sink.write(&fields()).await.unwrap();
        sink.close().await;
    }
}
