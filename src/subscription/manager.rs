use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::SubscriptionSource;
use crate::error::SubscriptionError;

/// One consumer of a shared upstream stream.
#[derive(Debug)]
pub struct Trigger {
    fingerprint: u64,
    id: u64,
    results: mpsc::Receiver<Bytes>,
}

impl Trigger {
    /// Next upstream message. `None` once the stream has ended or the trigger was stopped.
    pub async fn next(&mut self) -> Option<Bytes> {
        self.results.recv().await
    }

    /// Identifies the upstream stream this trigger is attached to.
    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }
}

struct SharedStream {
    stream_id: u64,
    cancel: CancellationToken,
    triggers: Vec<(u64, mpsc::Sender<Bytes>)>,
}

type StreamTable = Arc<Mutex<HashMap<u64, SharedStream>>>;

/// Shares one upstream stream between every trigger started with identical input.
pub struct SubscriptionManager {
    source: Arc<dyn SubscriptionSource>,
    streams: StreamTable,
    next_id: AtomicU64,
}

impl SubscriptionManager {
    pub fn new(source: Arc<dyn SubscriptionSource>) -> Self {
        SubscriptionManager {
            source,
            streams: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
        }
    }

    /// Attaches a trigger to the stream for `input`, starting the stream if this is the
    /// first trigger for it.
    pub async fn start_trigger(&self, input: Bytes) -> Result<Trigger, SubscriptionError> {
        let fingerprint = fxhash::hash64(input.as_ref());
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (results_tx, results) = mpsc::channel(1);
        let trigger = Trigger {
            fingerprint,
            id,
            results,
        };

        let cancel = {
            let mut streams = self.streams.lock().await;
            if let Some(stream) = streams.get_mut(&fingerprint) {
                stream.triggers.push((id, results_tx));
                debug!(fingerprint, trigger = id, "joined running stream");
                return Ok(trigger);
            }
            let cancel = CancellationToken::new();
            streams.insert(
                fingerprint,
                SharedStream {
                    stream_id: id,
                    cancel: cancel.clone(),
                    triggers: vec![(id, results_tx)],
                },
            );
            cancel
        };

        let (next_tx, next_rx) = mpsc::channel(1);
        if let Err(err) = self.source.start(cancel.clone(), &input, next_tx).await {
            warn!(fingerprint, error = %err, "failed to start upstream stream");
            remove_stream(&self.streams, fingerprint, id).await;
            cancel.cancel();
            return Err(err);
        }
        debug!(fingerprint, trigger = id, "started upstream stream");

        tokio::spawn(fan_out(
            Arc::clone(&self.streams),
            fingerprint,
            id,
            cancel,
            next_rx,
        ));
        Ok(trigger)
    }

    /// Detaches a trigger. The upstream stream is cancelled once its last trigger is gone.
    pub async fn stop_trigger(&self, trigger: &Trigger) {
        let mut streams = self.streams.lock().await;
        let Some(stream) = streams.get_mut(&trigger.fingerprint) else {
            return;
        };
        stream.triggers.retain(|(id, _)| *id != trigger.id);
        if stream.triggers.is_empty() {
            if let Some(stream) = streams.remove(&trigger.fingerprint) {
                stream.cancel.cancel();
                debug!(fingerprint = trigger.fingerprint, "stopped upstream stream");
            }
        }
    }

    /// Number of running upstream streams.
    pub async fn active_streams(&self) -> usize {
        self.streams.lock().await.len()
    }
}

async fn fan_out(
    streams: StreamTable,
    fingerprint: u64,
    stream_id: u64,
    cancel: CancellationToken,
    mut next: mpsc::Receiver<Bytes>,
) {
    loop {
        let data = tokio::select! {
            _ = cancel.cancelled() => return,
            data = next.recv() => data,
        };
        let Some(data) = data else {
            // upstream finished, closing every trigger
            remove_stream(&streams, fingerprint, stream_id).await;
            return;
        };

        let table = streams.lock().await;
        let Some(stream) = table.get(&fingerprint).filter(|s| s.stream_id == stream_id) else {
            return;
        };
        for (trigger, results) in &stream.triggers {
            if results.try_send(data.clone()).is_err() {
                debug!(fingerprint, trigger, "trigger busy, dropping message");
            }
        }
    }
}

async fn remove_stream(streams: &Mutex<HashMap<u64, SharedStream>>, fingerprint: u64, stream_id: u64) {
    let mut streams = streams.lock().await;
    if streams
        .get(&fingerprint)
        .is_some_and(|stream| stream.stream_id == stream_id)
    {
        streams.remove(&fingerprint);
    }
}
