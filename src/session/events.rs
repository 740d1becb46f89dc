//! Per-session event task
//!
//! Watches transport and pipeline events for the lifetime of one connection:
//! spawns inbound track readers, reacts to connection failure, forwards
//! transcripts and logs pipeline statistics. Aborting the task cancels every
//! inbound track reader with it.

use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinSet;

use super::transcript::{self, TranscriptionSlot};
use super::SessionEvent;
use crate::audio::{on_device_thread, AudioPlayback, PipelineEvent, QueueCounters};
use crate::constants::STATS_INTERVAL;
use crate::error::TransportError;
use crate::transport::{ConnectionState, RemoteTrack, TransportEvent};

pub(super) struct EventContext {
    pub playback: Arc<AudioPlayback>,
    pub outbound: Arc<QueueCounters>,
    pub events: broadcast::Sender<SessionEvent>,
    pub transcription: TranscriptionSlot,
}

pub(super) async fn run_events(
    ctx: EventContext,
    mut transport_events: UnboundedReceiver<TransportEvent>,
    mut pipeline_events: UnboundedReceiver<PipelineEvent>,
) {
    let mut tracks = JoinSet::new();
    let mut monitor = tokio::time::interval(STATS_INTERVAL);
    monitor.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // the first tick completes immediately
    monitor.tick().await;

    let mut transport_open = true;
    let mut pipelines_open = true;
    let mut last_evicted = ctx.playback.stats().buffer.evicted;

    loop {
        tokio::select! {
            event = transport_events.recv(), if transport_open => match event {
                Some(event) => handle_transport_event(&ctx, &mut tracks, event).await,
                None => {
                    tracing::debug!("Transport event stream closed");
                    transport_open = false;
                }
            },
            event = pipeline_events.recv(), if pipelines_open => match event {
                Some(event) => handle_pipeline_event(&ctx, event).await,
                None => pipelines_open = false,
            },
            Some(_) = tracks.join_next(), if !tracks.is_empty() => {}
            _ = monitor.tick() => {
                last_evicted = log_stats(&ctx, last_evicted);
            }
        }
    }
}

async fn handle_transport_event(ctx: &EventContext, tracks: &mut JoinSet<()>, event: TransportEvent) {
    match event {
        TransportEvent::ConnectionStateChanged(state) => {
            tracing::info!("Connection state changed to: {}", state);
            if state == ConnectionState::Failed {
                tracing::error!("Connection failed; stopping playback");
                stop_playback(ctx).await;
            }
            let _ = ctx.events.send(SessionEvent::ConnectionState(state));
        }
        TransportEvent::RemoteTrack(track) => {
            tracing::info!("Received remote audio track {}", track.id());
            tracks.spawn(run_inbound_track(track, ctx.playback.clone()));
        }
        TransportEvent::DataMessage(text) => {
            if let Some(transcript) = transcript::parse_message(&text) {
                if transcript.is_final {
                    ctx.transcription.emit(&transcript.text);
                }
                let _ = ctx.events.send(SessionEvent::Transcript(transcript));
            }
        }
    }
}

async fn handle_pipeline_event(ctx: &EventContext, event: PipelineEvent) {
    match &event {
        PipelineEvent::CaptureFailed(err) => {
            tracing::error!("Capture device failed: {}", err);
        }
        PipelineEvent::PlaybackFailed(err) => {
            tracing::error!("Playback device failed: {}", err);
            stop_playback(ctx).await;
        }
    }
    let _ = ctx.events.send(SessionEvent::Pipeline(event));
}

async fn stop_playback(ctx: &EventContext) {
    let playback = ctx.playback.clone();
    if let Err(err) = on_device_thread(move || playback.stop()).await {
        tracing::warn!("Playback stop failed: {}", err);
    }
}

/// Read one remote track into the playback pipeline until it ends
async fn run_inbound_track(mut track: Box<dyn RemoteTrack>, playback: Arc<AudioPlayback>) {
    let id = track.id().to_string();
    loop {
        match track.recv().await {
            Ok(frame) => {
                playback.enqueue(frame).await;
            }
            Err(TransportError::StreamEnded) => {
                tracing::info!("Remote track {} ended", id);
                break;
            }
            Err(e) => {
                tracing::error!("Error processing remote audio frame on {}: {}", id, e);
                break;
            }
        }
    }
}

fn log_stats(ctx: &EventContext, last_evicted: u64) -> u64 {
    let dropped = ctx.outbound.take_unreported_drops();
    if dropped > 0 {
        tracing::warn!("Dropped {} outbound frames (queue full)", dropped);
    }

    let stats = ctx.playback.stats();
    let evicted = stats.buffer.evicted.saturating_sub(last_evicted);
    if evicted > 0 {
        tracing::warn!("Evicted {} late playback frames (buffer full)", evicted);
    }

    tracing::debug!(
        "Pipeline stats: sent={} played={} silent={} buffer={}/{}",
        ctx.outbound.sent(),
        stats.frames_played,
        stats.silent_blocks,
        stats.buffer.level,
        stats.buffer.capacity
    );
    stats.buffer.evicted
}
