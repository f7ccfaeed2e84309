//! In-process replay relay for resumable streams.
//!
//! Every authenticated generation registers its stream id here before the
//! response starts. Emitted frames are teed into a bounded replay buffer
//! plus a live broadcast channel, so a client that reconnects mid-generation
//! replays the prefix and then follows the remainder instead of restarting.
//! The relay is optional; when it is absent or full, callers fall back to a
//! direct stream.

use futures_util::Stream;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

/// One serialized SSE frame as held by the replay buffer.
#[derive(Debug, Clone)]
pub struct RelayFrame {
    pub event: String,
    pub data: String,
}

#[derive(Debug, Clone)]
enum RelayMessage {
    Frame(RelayFrame),
    Done,
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Frames retained per stream for replay.
    pub buffer_capacity: usize,
    /// Live broadcast channel depth.
    pub channel_capacity: usize,
    /// Streams tracked at once; the oldest registration is evicted first.
    pub max_streams: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 4096,
            channel_capacity: 256,
            max_streams: 1024,
        }
    }
}

struct ReplayChannel {
    buffer: Mutex<Vec<RelayFrame>>,
    live: broadcast::Sender<RelayMessage>,
    finished: AtomicBool,
    /// An overfull buffer would replay a truncated prefix; the channel is
    /// invalidated for resumption instead.
    overflowed: AtomicBool,
    buffer_capacity: usize,
}

impl ReplayChannel {
    fn publish(&self, frame: RelayFrame) {
        let mut buffer = self.buffer.lock();
        if buffer.len() < self.buffer_capacity {
            buffer.push(frame.clone());
        } else if !self.overflowed.swap(true, Ordering::SeqCst) {
            tracing::warn!("Replay buffer overflowed, stream is no longer resumable");
        }
        let _ = self.live.send(RelayMessage::Frame(frame));
    }

    fn finish(&self) {
        self.finished.store(true, Ordering::SeqCst);
        let _ = self.live.send(RelayMessage::Done);
    }
}

/// Tee handle held by the producing task for the lifetime of one stream.
#[derive(Clone)]
pub struct RelayHandle {
    channel: Arc<ReplayChannel>,
}

impl RelayHandle {
    pub fn publish(&self, event: &str, data: String) {
        self.channel.publish(RelayFrame {
            event: event.to_string(),
            data,
        });
    }

    pub fn finish(&self) {
        self.channel.finish();
    }
}

pub struct StreamRelay {
    config: RelayConfig,
    streams: Mutex<RelayRegistry>,
}

#[derive(Default)]
struct RelayRegistry {
    channels: HashMap<Uuid, Arc<ReplayChannel>>,
    order: VecDeque<Uuid>,
}

impl StreamRelay {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config,
            streams: Mutex::new(RelayRegistry::default()),
        }
    }

    /// Register a stream id and get the tee handle for its producer.
    pub fn register(&self, stream_id: Uuid) -> RelayHandle {
        let (live, _) = broadcast::channel(self.config.channel_capacity);
        let channel = Arc::new(ReplayChannel {
            buffer: Mutex::new(Vec::new()),
            live,
            finished: AtomicBool::new(false),
            overflowed: AtomicBool::new(false),
            buffer_capacity: self.config.buffer_capacity,
        });

        let mut registry = self.streams.lock();
        while registry.order.len() >= self.config.max_streams {
            if let Some(evicted) = registry.order.pop_front() {
                registry.channels.remove(&evicted);
            }
        }
        registry.channels.insert(stream_id, channel.clone());
        registry.order.push_back(stream_id);

        RelayHandle { channel }
    }

    /// Reattach to a registered stream: replay the buffered prefix, then
    /// follow live frames until the producer finishes. Returns None for
    /// unknown (or evicted) stream ids.
    pub fn resume(&self, stream_id: Uuid) -> Option<impl Stream<Item = RelayFrame>> {
        let channel = self.streams.lock().channels.get(&stream_id).cloned()?;
        if channel.overflowed.load(Ordering::SeqCst) {
            return None;
        }

        // Subscribe while holding the buffer lock so no frame can fall
        // between the snapshot and the live subscription.
        let (snapshot, receiver, finished) = {
            let buffer = channel.buffer.lock();
            let receiver = channel.live.subscribe();
            (
                buffer.clone(),
                receiver,
                channel.finished.load(Ordering::SeqCst),
            )
        };

        let stream = async_stream::stream! {
            for frame in snapshot {
                yield frame;
            }
            if finished {
                return;
            }

            let mut receiver = receiver;
            loop {
                match receiver.recv().await {
                    Ok(RelayMessage::Frame(frame)) => yield frame,
                    Ok(RelayMessage::Done) => break,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("Resumed stream lagged, {} frames dropped", skipped);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        };

        Some(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    fn frame(n: usize) -> (&'static str, String) {
        ("textDelta", format!("{{\"delta\":\"chunk {}\"}}", n))
    }

    #[tokio::test]
    async fn test_resume_replays_prefix_then_live() {
        let relay = StreamRelay::new(RelayConfig::default());
        let stream_id = Uuid::new_v4();
        let handle = relay.register(stream_id);

        let (event, data) = frame(1);
        handle.publish(event, data);

        let mut resumed = Box::pin(relay.resume(stream_id).unwrap());
        let first = resumed.next().await.unwrap();
        assert!(first.data.contains("chunk 1"));

        let (event, data) = frame(2);
        handle.publish(event, data);
        handle.finish();

        let second = resumed.next().await.unwrap();
        assert!(second.data.contains("chunk 2"));
        assert!(resumed.next().await.is_none());
    }

    #[tokio::test]
    async fn test_resume_after_finish_replays_everything() {
        let relay = StreamRelay::new(RelayConfig::default());
        let stream_id = Uuid::new_v4();
        let handle = relay.register(stream_id);

        for n in 0..3 {
            let (event, data) = frame(n);
            handle.publish(event, data);
        }
        handle.finish();

        let frames: Vec<_> = Box::pin(relay.resume(stream_id).unwrap()).collect().await;
        assert_eq!(frames.len(), 3);
    }

    #[tokio::test]
    async fn test_overflowed_buffer_is_not_resumable() {
        let relay = StreamRelay::new(RelayConfig {
            buffer_capacity: 2,
            ..RelayConfig::default()
        });
        let stream_id = Uuid::new_v4();
        let handle = relay.register(stream_id);

        for n in 0..3 {
            let (event, data) = frame(n);
            handle.publish(event, data);
        }

        assert!(relay.resume(stream_id).is_none());
    }

    #[tokio::test]
    async fn test_unknown_stream_id_yields_none() {
        let relay = StreamRelay::new(RelayConfig::default());
        assert!(relay.resume(Uuid::new_v4()).is_none());
    }

    #[tokio::test]
    async fn test_oldest_stream_evicted_at_capacity() {
        let relay = StreamRelay::new(RelayConfig {
            max_streams: 2,
            ..RelayConfig::default()
        });

        let first = Uuid::new_v4();
        let _h1 = relay.register(first);
        let _h2 = relay.register(Uuid::new_v4());
        let _h3 = relay.register(Uuid::new_v4());

        assert!(relay.resume(first).is_none());
    }
}
