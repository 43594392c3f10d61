// Stream consumer and reconnection controller
//
// Owns the long-lived SSE connection to the feed, filters events, drives
// the flush buffer, and uploads completed batch objects. The read loop is
// the only steady-state suspension point; a 1s tick enforces the
// time-threshold flush when the feed goes quiet.
//
// Connection failures retry with capped exponential backoff. Backoff
// resets to the floor only after a sustained successful connection, not on
// every attempt. Operator shutdown exits immediately and drains any
// buffered events first.

use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use chrono::Utc;
use futures::StreamExt;
use reqwest::header::ACCEPT;
use serde::Deserialize;
use tokio::signal;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::batch::{CompletedBatch, FlushBuffer, FlushConfig};
use crate::config::StreamSection;
use crate::event::RecentChange;
use crate::sse::SseDecoder;
use crate::storage::BronzeStore;

const BACKOFF_FLOOR: Duration = Duration::from_secs(2);
const BACKOFF_CEILING: Duration = Duration::from_secs(60);
/// A connection that lived at least this long counts as a sustained
/// success and resets backoff to the floor.
const BACKOFF_SUSTAIN: Duration = Duration::from_secs(30);

const FLUSH_TICK: Duration = Duration::from_secs(1);
const PROGRESS_EVERY: u64 = 100;

/// Run the ingestion loop until shutdown. Reconnects forever on failure;
/// only operator cancellation (ctrl-c / SIGTERM) terminates the retry loop.
pub async fn run(stream: &StreamSection, flush: FlushConfig, store: &BronzeStore) -> Result<()> {
    let client = reqwest::Client::builder()
        .user_agent(&stream.user_agent)
        .connect_timeout(Duration::from_secs(10))
        .build()
        .context("failed to build http client")?;

    let mut buffer = FlushBuffer::new(flush);
    // Completed batches park here until the upload succeeds, so a
    // cancelled or failed upload is retried instead of dropped.
    let mut pending: Option<CompletedBatch> = None;
    let mut backoff = BACKOFF_FLOOR;

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        let connected_at = Instant::now();
        let outcome = tokio::select! {
            _ = &mut shutdown => {
                info!("shutdown requested, stopping stream");
                break;
            }
            outcome = stream_once(&client, stream, &mut buffer, store, &mut pending) => outcome,
        };

        match outcome {
            Ok(()) => warn!("event stream ended, reconnecting"),
            Err(err) => warn!("event stream failed: {err:#}"),
        }

        if connected_at.elapsed() >= BACKOFF_SUSTAIN {
            backoff = BACKOFF_FLOOR;
        }
        info!(delay_secs = backoff.as_secs(), "reconnecting after backoff");
        tokio::select! {
            _ = &mut shutdown => {
                info!("shutdown requested during backoff, stopping stream");
                break;
            }
            _ = tokio::time::sleep(backoff) => {}
        }
        backoff = (backoff * 2).min(BACKOFF_CEILING);
    }

    // Drain what is pending or buffered so a clean stop loses nothing.
    flush_pending(store, &mut pending).await?;
    if let Some(batch) = buffer.drain()? {
        pending = Some(batch);
        flush_pending(store, &mut pending).await?;
    }
    Ok(())
}

/// One connection lifetime: connect, then consume frames until the socket
/// errors or the server closes the stream.
async fn stream_once(
    client: &reqwest::Client,
    stream: &StreamSection,
    buffer: &mut FlushBuffer,
    store: &BronzeStore,
    pending: &mut Option<CompletedBatch>,
) -> Result<()> {
    info!(url = %stream.url, "connecting to event stream");
    let response = client
        .get(&stream.url)
        .header(ACCEPT, "text/event-stream")
        .send()
        .await
        .context("event stream request failed")?;
    if !response.status().is_success() {
        bail!("HTTP {} from event stream", response.status());
    }
    info!("connected, streaming events");

    // A batch left over from an interrupted upload goes out first.
    flush_pending(store, pending).await?;

    let mut body = response.bytes_stream();
    let mut decoder = SseDecoder::new();
    let mut tick = tokio::time::interval(FLUSH_TICK);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut accepted: u64 = 0;

    loop {
        tokio::select! {
            chunk = body.next() => {
                let chunk = match chunk {
                    Some(Ok(chunk)) => chunk,
                    Some(Err(err)) => return Err(err).context("event stream read failed"),
                    None => return Ok(()),
                };
                for frame in decoder.push(&chunk) {
                    if frame.event != "message" {
                        continue;
                    }
                    let Some((change, line)) = decode_frame(&frame.data) else {
                        continue;
                    };
                    if !change.is_edit() {
                        continue;
                    }
                    if let Some(filter) = &stream.wiki_filter {
                        if change.wiki() != filter {
                            continue;
                        }
                    }

                    accepted += 1;
                    if accepted % PROGRESS_EVERY == 0 {
                        debug!(accepted, "events accepted");
                    }

                    let occurred_at = change.occurred_at(Utc::now());
                    if let Some(batch) = buffer.push(&line, occurred_at)? {
                        *pending = Some(batch);
                        flush_pending(store, pending).await?;
                    }
                }
            }
            _ = tick.tick() => {
                if let Some(batch) = buffer.take_expired()? {
                    *pending = Some(batch);
                    flush_pending(store, pending).await?;
                }
            }
        }
    }
}

/// Decode one frame payload into the parsed change plus the compact
/// single-line form that goes into the batch. SSE permits multiline
/// `data` and JSON permits interior newlines, but the batch format is
/// strictly one line per event, so the stored line is re-serialized
/// rather than taken raw off the wire.
fn decode_frame(data: &str) -> Option<(RecentChange, String)> {
    let payload: serde_json::Value = match serde_json::from_str(data) {
        Ok(payload) => payload,
        Err(err) => {
            warn!(error = %err, "skipping undecodable event");
            return None;
        }
    };
    let change = match RecentChange::deserialize(&payload) {
        Ok(change) => change,
        Err(err) => {
            warn!(error = %err, "skipping unrecognized event shape");
            return None;
        }
    };
    Some((change, payload.to_string()))
}

/// Upload the pending batch, if any. On success the slot clears; on
/// failure (or if the caller is cancelled mid-upload) the batch stays in
/// the slot for the next attempt.
async fn flush_pending(store: &BronzeStore, pending: &mut Option<CompletedBatch>) -> Result<()> {
    let Some(batch) = pending.as_ref() else {
        return Ok(());
    };
    if let Err(err) = store.put_batch(&batch.key, batch.body.clone()).await {
        warn!(key = %batch.key, rows = batch.lines, "batch upload failed, keeping it pending");
        return Err(err);
    }
    info!(key = %batch.key, rows = batch.lines, "flushed batch");
    *pending = None;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("received SIGTERM, starting graceful shutdown");
        },
    }
}
