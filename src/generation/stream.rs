use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use super::types::{GenerateError, StreamEvent};

const EVENT_PREFIX: &str = "data:";
const DONE_SENTINEL: &str = "[DONE]";

/// The two admissible frame payloads: a content delta or a terminal error.
#[derive(Deserialize)]
#[serde(untagged)]
enum Frame {
    Content { content: String },
    Error { error: String },
}

enum LineOutcome {
    Continue,
    Stop,
}

/// Consume a newline-delimited frame stream, emitting content deltas and a
/// terminal outcome on `tx`. Reads may split a frame mid-line; the partial
/// line carries over to the next read. An unterminated trailing line at
/// stream end is discarded.
pub async fn consume_frames<S, E>(mut stream: S, tx: mpsc::Sender<StreamEvent>)
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: std::fmt::Display,
{
    let mut byte_buf: Vec<u8> = Vec::new();
    let mut buffer = String::new();

    while let Some(chunk_result) = stream.next().await {
        let bytes = match chunk_result {
            Ok(b) => b,
            Err(e) => {
                let _ = tx
                    .send(StreamEvent::Error(GenerateError::Network(format!(
                        "Stream error: {}",
                        e
                    ))))
                    .await;
                return;
            }
        };

        byte_buf.extend_from_slice(&bytes);

        // Decode as much valid UTF-8 as possible from the byte buffer
        let decoded = match std::str::from_utf8(&byte_buf) {
            Ok(s) => {
                let decoded = s.to_string();
                byte_buf.clear();
                decoded
            }
            Err(e) => {
                let valid_up_to = e.valid_up_to();
                if valid_up_to == 0 {
                    continue;
                }
                let decoded = std::str::from_utf8(&byte_buf[..valid_up_to])
                    .unwrap()
                    .to_string();
                byte_buf.drain(..valid_up_to);
                decoded
            }
        };

        // Normalize CRLF to LF
        let chunk = decoded.replace("\r\n", "\n");
        buffer.push_str(&chunk);

        // Process complete lines; the remainder waits for the next read
        while let Some(newline) = buffer.find('\n') {
            let line = buffer[..newline].to_string();
            buffer.drain(..newline + 1);

            match handle_line(&line, &tx).await {
                LineOutcome::Continue => {}
                LineOutcome::Stop => return,
            }
        }
    }

    if !buffer.trim().is_empty() {
        tracing::debug!("Discarding unterminated trailing line ({} bytes)", buffer.len());
    }

    let _ = tx.send(StreamEvent::Done).await;
}

async fn handle_line(line: &str, tx: &mpsc::Sender<StreamEvent>) -> LineOutcome {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return LineOutcome::Continue;
    }
    let payload = match trimmed.strip_prefix(EVENT_PREFIX) {
        Some(p) => p.trim(),
        None => return LineOutcome::Continue,
    };
    if payload == DONE_SENTINEL {
        return LineOutcome::Continue;
    }

    match serde_json::from_str::<Frame>(payload) {
        Ok(Frame::Content { content }) => {
            if tx.send(StreamEvent::Content(content)).await.is_err() {
                return LineOutcome::Stop; // receiver dropped
            }
            LineOutcome::Continue
        }
        Ok(Frame::Error { error }) => {
            let _ = tx
                .send(StreamEvent::Error(GenerateError::Pipeline(error)))
                .await;
            LineOutcome::Stop
        }
        Err(e) => {
            // Payloads that are not JSON at all are tolerated; valid JSON
            // that matches neither frame shape is a real anomaly.
            if e.classify() == serde_json::error::Category::Syntax {
                tracing::warn!("Skipping undecodable frame: {}", e);
                LineOutcome::Continue
            } else {
                let _ = tx
                    .send(StreamEvent::Error(GenerateError::MalformedStream(
                        e.to_string(),
                    )))
                    .await;
                LineOutcome::Stop
            }
        }
    }
}
