use std::{
    collections::{BTreeMap, HashMap, HashSet, VecDeque},
    sync::Arc,
    time::Duration,
};

use parking_lot::Mutex;
use tokio::{
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::outbound::{ChannelConfig, ChannelId, ChannelSink, OutboundMessage, SendError};

/// What one dispatcher pass did.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Messages confirmed by the sink.
    pub sent: usize,
    /// Messages that failed and were moved to the back of their queue.
    pub requeued: usize,
    /// Messages given up on after reaching their channel's attempt limit.
    pub dropped: usize,
}

#[derive(Debug)]
struct Queued {
    id: u64,
    body: String,
    correlation: Option<String>,
    attempts: u32,
}

#[derive(Debug, Default)]
struct ChannelQueue {
    pending: VecDeque<Queued>,
    last_sent: Option<Instant>,
}

#[derive(Debug, Default)]
struct State {
    queues: BTreeMap<ChannelId, ChannelQueue>,
    next_id: u64,
}

impl State {
    fn push(&mut self, channel: ChannelId, body: String, correlation: Option<String>) {
        let id = self.next_id;
        self.next_id += 1;
        self.queues.entry(channel).or_default().pending.push_back(Queued {
            id,
            body,
            correlation,
            attempts: 0,
        });
    }
}

#[derive(Debug)]
struct Shared {
    dispatch_interval: Duration,
    default_channel: ChannelConfig,
    channels: HashMap<ChannelId, ChannelConfig>,
    state: Mutex<State>,
}

struct Batch {
    ids: Vec<u64>,
    bodies: Vec<String>,
}

/// Per-channel FIFO queues of outbound messages.
///
/// Cheap to clone; every clone feeds the same queues. Producers call [`enqueue`](Self::enqueue)
/// from any task while a single dispatcher, started with
/// [`spawn_dispatcher`](Self::spawn_dispatcher), drains them.
///
/// Within a channel messages are delivered in enqueue order, except that a message whose send
/// failed is retried after every message enqueued behind it. Oversized messages are truncated to
/// the channel's `max_payload` characters according to its [`Truncation`](super::Truncation).
#[derive(Clone, Debug)]
pub struct OutboundQueue {
    shared: Arc<Shared>,
}

impl OutboundQueue {
    pub(crate) fn new(
        dispatch_interval: Duration,
        default_channel: ChannelConfig,
        channels: HashMap<ChannelId, ChannelConfig>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                dispatch_interval,
                default_channel,
                channels,
                state: Mutex::new(State::default()),
            }),
        }
    }

    #[must_use]
    pub fn dispatch_interval(&self) -> Duration {
        self.shared.dispatch_interval
    }

    /// Limits in effect for `channel`.
    #[must_use]
    pub fn config_for(&self, channel: &ChannelId) -> &ChannelConfig {
        self.shared.channels.get(channel).unwrap_or(&self.shared.default_channel)
    }

    /// Appends `message` to its channel's queue, and to the channel's mirror if one is configured.
    ///
    /// Empty messages are ignored.
    pub fn enqueue(&self, message: OutboundMessage) {
        let OutboundMessage { channel, body, correlation } = message;
        if body.is_empty() {
            debug!(channel = %channel, "Ignoring empty message");
            return;
        }

        let mirror = self.config_for(&channel).mirror_to.clone().filter(|mirror| *mirror != channel);

        trace!(channel = %channel, correlation = ?correlation, "Enqueued message");
        let mut state = self.shared.state.lock();
        if let Some(mirror) = mirror {
            state.push(mirror, body.clone(), correlation.clone());
        }
        state.push(channel, body, correlation);
    }

    /// Number of messages waiting for `channel`.
    #[must_use]
    pub fn pending(&self, channel: &ChannelId) -> usize {
        self.shared.state.lock().queues.get(channel).map_or(0, |queue| queue.pending.len())
    }

    /// Bodies waiting for `channel`, in delivery order.
    #[must_use]
    pub fn pending_bodies(&self, channel: &ChannelId) -> Vec<String> {
        self.shared
            .state
            .lock()
            .queues
            .get(channel)
            .map(|queue| queue.pending.iter().map(|queued| queued.body.clone()).collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shared.state.lock().queues.values().all(|queue| queue.pending.is_empty())
    }

    /// One pass over every channel with pending messages.
    ///
    /// For each channel, batches are sent until the queue is drained, the channel's `min_interval`
    /// has not elapsed, or only messages already tried during this pass remain. When a batch of
    /// several messages fails, each of them is retried on its own so that a single bad message
    /// does not hold back the others.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "trace", skip_all))]
    pub async fn dispatch_once<K: ChannelSink>(&self, sink: &K) -> DispatchReport {
        self.dispatch_pass(sink, None).await
    }

    /// One dispatch pass that stops before the next channel once `cancel` fires.
    async fn dispatch_pass<K: ChannelSink>(
        &self,
        sink: &K,
        cancel: Option<&CancellationToken>,
    ) -> DispatchReport {
        let mut report = DispatchReport::default();

        let channels: Vec<ChannelId> = {
            let state = self.shared.state.lock();
            state
                .queues
                .iter()
                .filter(|(_, queue)| !queue.pending.is_empty())
                .map(|(channel, _)| channel.clone())
                .collect()
        };

        for channel in channels {
            if cancel.is_some_and(CancellationToken::is_cancelled) {
                debug!("Dispatch pass cancelled");
                break;
            }
            let config = self.config_for(&channel);
            let mut attempted = HashSet::new();

            while let Some(batch) = self.next_batch(&channel, config, &attempted) {
                attempted.extend(batch.ids.iter().copied());
                let payload = batch.bodies.join("\n\n");

                match sink.send(&channel, &payload).await {
                    Ok(()) => {
                        debug!(channel = %channel, messages = batch.ids.len(), "Sent batch");
                        self.complete(&channel, &batch.ids);
                        report.sent += batch.ids.len();
                    }
                    Err(err) if batch.ids.len() == 1 => {
                        self.fail(&channel, config, batch.ids[0], &err, &mut report);
                    }
                    Err(err) => {
                        warn!(
                            channel = %channel,
                            messages = batch.ids.len(),
                            error = %err,
                            "Batch send failed, retrying messages one by one"
                        );
                        for (id, body) in batch.ids.iter().zip(&batch.bodies) {
                            match sink.send(&channel, body).await {
                                Ok(()) => {
                                    self.complete(&channel, &[*id]);
                                    report.sent += 1;
                                }
                                Err(err) => self.fail(&channel, config, *id, &err, &mut report),
                            }
                        }
                    }
                }
            }
        }

        report
    }

    /// Consecutive messages of `channel` not yet tried in this pass that fit in one payload.
    fn next_batch(
        &self,
        channel: &ChannelId,
        config: &ChannelConfig,
        attempted: &HashSet<u64>,
    ) -> Option<Batch> {
        let state = self.shared.state.lock();
        let queue = state.queues.get(channel)?;

        if queue.last_sent.is_some_and(|last_sent| last_sent.elapsed() < config.min_interval) {
            return None;
        }

        let mut batch = Batch { ids: Vec::new(), bodies: Vec::new() };
        let mut used = 0;
        for queued in queue.pending.iter().filter(|queued| !attempted.contains(&queued.id)) {
            let body = config.truncation.apply(&queued.body, config.max_payload);
            if body.len() < queued.body.len() {
                warn!(
                    channel = %channel,
                    limit = config.max_payload,
                    correlation = ?queued.correlation,
                    "Clipping message to channel limit"
                );
            }

            let len = body.chars().count();
            if batch.ids.is_empty() {
                used = len;
            } else if used + 2 + len <= config.max_payload {
                used += 2 + len;
            } else {
                break;
            }
            batch.ids.push(queued.id);
            batch.bodies.push(body.to_owned());
        }

        (!batch.ids.is_empty()).then_some(batch)
    }

    fn complete(&self, channel: &ChannelId, ids: &[u64]) {
        let mut state = self.shared.state.lock();
        if let Some(queue) = state.queues.get_mut(channel) {
            queue.pending.retain(|queued| !ids.contains(&queued.id));
            queue.last_sent = Some(Instant::now());
        }
    }

    fn fail(
        &self,
        channel: &ChannelId,
        config: &ChannelConfig,
        id: u64,
        err: &SendError,
        report: &mut DispatchReport,
    ) {
        let mut state = self.shared.state.lock();
        let Some(queue) = state.queues.get_mut(channel) else {
            return;
        };
        queue.last_sent = Some(Instant::now());
        let position = queue.pending.iter().position(|queued| queued.id == id);
        let Some(mut queued) = position.and_then(|position| queue.pending.remove(position)) else {
            return;
        };

        queued.attempts += 1;
        if let SendError::PayloadTooLarge { .. } = err {
            let sent = queued.body.chars().count().min(config.max_payload);
            queued.body = config.truncation.apply(&queued.body, sent / 2).to_owned();
        }

        if queued.body.is_empty() || config.max_attempts.is_some_and(|max| queued.attempts >= max) {
            error!(
                channel = %channel,
                attempts = queued.attempts,
                correlation = ?queued.correlation,
                error = %err,
                "Dropping message after failed send"
            );
            report.dropped += 1;
            return;
        }

        error!(
            channel = %channel,
            attempts = queued.attempts,
            correlation = ?queued.correlation,
            error = %err,
            "Failed to send message, will retry"
        );
        queue.pending.push_back(queued);
        report.requeued += 1;
    }

    /// Spawns the dispatcher loop, which calls [`dispatch_once`](Self::dispatch_once) every
    /// dispatch interval until `cancel` fires.
    pub fn spawn_dispatcher<K: ChannelSink>(
        &self,
        sink: K,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let queue = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(queue.dispatch_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let report = queue.dispatch_pass(&sink, Some(&cancel)).await;
                if report != DispatchReport::default() {
                    debug!(
                        sent = report.sent,
                        requeued = report.requeued,
                        dropped = report.dropped,
                        "Dispatch pass finished"
                    );
                }
            }

            info!("Outbound dispatcher stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        outbound::{DEFAULT_DISPATCH_INTERVAL, OutboundQueueBuilder, Truncation},
        test_utils::RecordingSink,
    };

    fn queue() -> OutboundQueue {
        OutboundQueueBuilder::new().build().unwrap()
    }

    #[tokio::test]
    async fn batches_consecutive_messages() {
        let queue = queue();
        let sink = RecordingSink::new();
        for body in ["sow", "harvest", "plant"] {
            queue.enqueue(OutboundMessage::new("field", body));
        }

        let report = queue.dispatch_once(&sink).await;

        assert_eq!(report.sent, 3);
        assert_eq!(sink.bodies(), vec!["sow\n\nharvest\n\nplant".to_string()]);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn batch_respects_payload_limit() {
        let queue = OutboundQueueBuilder::new()
            .default_channel(ChannelConfig::default().max_payload(10))
            .build()
            .unwrap();
        let sink = RecordingSink::new();
        for body in ["aaaa", "bbbb", "cccc"] {
            queue.enqueue(OutboundMessage::new("silo", body));
        }

        queue.dispatch_once(&sink).await;

        assert_eq!(sink.bodies(), vec!["aaaa\n\nbbbb".to_string(), "cccc".to_string()]);
    }

    #[tokio::test]
    async fn failed_message_moves_behind_later_ones() {
        let queue = queue();
        // the batch and A's individual retry
        let sink = RecordingSink::new().fail_matching("A", 2, SendError::Transient("503".into()));
        for body in ["A", "B", "C"] {
            queue.enqueue(OutboundMessage::new("market", body));
        }

        let first = queue.dispatch_once(&sink).await;
        assert_eq!(first, DispatchReport { sent: 2, requeued: 1, dropped: 0 });
        assert_eq!(queue.pending_bodies(&"market".into()), vec!["A".to_string()]);

        queue.dispatch_once(&sink).await;

        assert_eq!(sink.bodies(), vec!["B", "C", "A"]);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn oversized_message_is_truncated_not_rejected() {
        let queue = OutboundQueueBuilder::new()
            .channel("report", ChannelConfig::default().max_payload(5))
            .channel(
                "tail",
                ChannelConfig::default().max_payload(5).truncation(Truncation::KeepTail),
            )
            .build()
            .unwrap();
        let sink = RecordingSink::new();
        queue.enqueue(OutboundMessage::new("report", "0123456789"));
        queue.enqueue(OutboundMessage::new("tail", "0123456789"));

        queue.dispatch_once(&sink).await;

        assert_eq!(sink.sent_to(&"report".into()), vec!["01234".to_string()]);
        assert_eq!(sink.sent_to(&"tail".into()), vec!["56789".to_string()]);
    }

    #[tokio::test]
    async fn payload_too_large_halves_the_body() {
        let queue = OutboundQueueBuilder::new()
            .default_channel(ChannelConfig::default().max_payload(8))
            .build()
            .unwrap();
        let sink = RecordingSink::new().reject_longer_than(5);
        queue.enqueue(OutboundMessage::new("seasons", "abcdefghijkl"));

        let first = queue.dispatch_once(&sink).await;
        assert_eq!(first.requeued, 1);
        assert_eq!(queue.pending_bodies(&"seasons".into()), vec!["abcd".to_string()]);

        queue.dispatch_once(&sink).await;
        assert_eq!(sink.bodies(), vec!["abcd"]);
    }

    #[tokio::test]
    async fn oversized_single_character_is_dropped_from_either_end() {
        for truncation in [Truncation::KeepHead, Truncation::KeepTail] {
            let queue = OutboundQueueBuilder::new()
                .default_channel(ChannelConfig::default().truncation(truncation))
                .build()
                .unwrap();
            let sink = RecordingSink::new().reject_longer_than(0);
            queue.enqueue(OutboundMessage::new("seasons", "x"));

            let report = queue.dispatch_once(&sink).await;

            assert_eq!(report.dropped, 1, "{truncation:?}");
            assert!(queue.is_empty(), "{truncation:?}");
        }
    }

    #[tokio::test]
    async fn cancelled_pass_leaves_remaining_channels_queued() {
        let queue = queue();
        let sink = RecordingSink::new();
        let cancel = CancellationToken::new();
        queue.enqueue(OutboundMessage::new("field", "sow"));
        queue.enqueue(OutboundMessage::new("silo", "deposit"));
        cancel.cancel();

        let report = queue.dispatch_pass(&sink, Some(&cancel)).await;

        assert_eq!(report, DispatchReport::default());
        assert!(sink.bodies().is_empty());
        assert_eq!(queue.pending(&"field".into()), 1);
        assert_eq!(queue.pending(&"silo".into()), 1);
    }

    #[tokio::test]
    async fn message_is_dropped_after_max_attempts() {
        let queue = OutboundQueueBuilder::new()
            .default_channel(ChannelConfig::default().max_attempts(2))
            .build()
            .unwrap();
        let sink =
            RecordingSink::new().fail_matching("bad", usize::MAX, SendError::Transient("x".into()));
        queue.enqueue(OutboundMessage::new("exchange", "bad"));

        assert_eq!(queue.dispatch_once(&sink).await.requeued, 1);
        assert_eq!(queue.dispatch_once(&sink).await.dropped, 1);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn mirror_channel_receives_a_copy() {
        let queue = OutboundQueueBuilder::new()
            .channel("silo", ChannelConfig::default().mirror_to("everything"))
            .build()
            .unwrap();
        let sink = RecordingSink::new();
        queue.enqueue(OutboundMessage::new("silo", "deposit"));
        queue.enqueue(OutboundMessage::new("field", "sow"));

        queue.dispatch_once(&sink).await;

        assert_eq!(sink.sent_to(&"silo".into()), vec!["deposit".to_string()]);
        assert_eq!(sink.sent_to(&"everything".into()), vec!["deposit".to_string()]);
        assert_eq!(sink.sent_to(&"field".into()), vec!["sow".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn min_interval_spaces_sends() {
        let queue = OutboundQueueBuilder::new()
            .default_channel(
                ChannelConfig::default().max_payload(1).min_interval(Duration::from_secs(2)),
            )
            .build()
            .unwrap();
        let sink = RecordingSink::new();
        queue.enqueue(OutboundMessage::new("peg", "A"));
        queue.enqueue(OutboundMessage::new("peg", "B"));

        queue.dispatch_once(&sink).await;
        assert_eq!(sink.bodies(), vec!["A"]);

        tokio::time::advance(Duration::from_secs(1)).await;
        queue.dispatch_once(&sink).await;
        assert_eq!(sink.bodies(), vec!["A"]);

        tokio::time::advance(Duration::from_secs(1)).await;
        queue.dispatch_once(&sink).await;
        assert_eq!(sink.bodies(), vec!["A", "B"]);
    }

    #[tokio::test(start_paused = true)]
    async fn dispatcher_stops_on_cancellation() -> anyhow::Result<()> {
        let queue = queue();
        let sink = Arc::new(RecordingSink::new());
        let cancel = CancellationToken::new();
        let handle = queue.spawn_dispatcher(sink.clone(), cancel.clone());

        queue.enqueue(OutboundMessage::new("field", "sow"));
        tokio::time::sleep(DEFAULT_DISPATCH_INTERVAL * 2).await;
        cancel.cancel();
        handle.await?;

        assert_eq!(sink.bodies(), vec!["sow"]);
        Ok(())
    }
}
