//! Orchestrates one clip playback per trigger.
//!
//! A trigger claims its destination channel, acquires a voice session,
//! streams the whole frame store in order with pre/post-roll pacing, and
//! always releases the session. At most one invocation is ever active
//! per destination channel.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::audio::FrameStore;
use crate::common::types::{ChannelId, PlaybackTarget};
use crate::config::PlaybackConfig;
use crate::voice::{VoiceConnector, VoiceError, VoiceSession};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackOutcome {
    /// Another invocation already owns this channel; the trigger was a
    /// no-op.
    AlreadyActive,
    /// The invocation ran to release. `frames_sent` is short of the
    /// store length when a mid-stream transmit failure cut it off.
    Played { frames_sent: usize },
}

pub struct PlaybackEngine<C: VoiceConnector> {
    store: Arc<FrameStore>,
    connector: C,
    active: DashMap<ChannelId, ()>,
    preroll: Duration,
    connect_timeout: Duration,
    send_timeout: Duration,
}

/// Removes the channel claim on every exit path out of `trigger`.
struct ActiveGuard<'a> {
    registry: &'a DashMap<ChannelId, ()>,
    channel: ChannelId,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.registry.remove(&self.channel);
    }
}

impl<C: VoiceConnector> PlaybackEngine<C> {
    pub fn new(store: Arc<FrameStore>, connector: C, cfg: PlaybackConfig) -> Self {
        Self {
            store,
            connector,
            active: DashMap::new(),
            preroll: Duration::from_millis(cfg.preroll_ms),
            connect_timeout: Duration::from_millis(cfg.connect_timeout_ms),
            send_timeout: Duration::from_millis(cfg.send_timeout_ms),
        }
    }

    pub async fn trigger(&self, target: PlaybackTarget) -> Result<PlaybackOutcome, VoiceError> {
        // Claim the channel atomically before connecting, so two triggers
        // racing for the same destination cannot both pass the guard.
        match self.active.entry(target.channel) {
            Entry::Occupied(_) => {
                debug!(channel = %target.channel, "playback already active, ignoring trigger");
                return Ok(PlaybackOutcome::AlreadyActive);
            }
            Entry::Vacant(slot) => {
                slot.insert(());
            }
        }
        let _claim = ActiveGuard {
            registry: &self.active,
            channel: target.channel,
        };

        let session = match timeout(self.connect_timeout, self.connector.connect(&target)).await {
            Ok(Ok(session)) => session,
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(VoiceError::Timeout),
        };

        // Let the transport settle before the first frame.
        sleep(self.preroll).await;
        session.set_speaking(true).await;

        let frames_sent = self.transmit(&target, &session).await;

        session.set_speaking(false).await;
        // Let buffered audio drain before tearing down.
        sleep(self.preroll).await;
        session.disconnect().await;

        Ok(PlaybackOutcome::Played { frames_sent })
    }

    /// Streams the store in order. A failed or timed-out send stops the
    /// stream; the remaining frames are skipped and the caller proceeds
    /// to teardown.
    async fn transmit(&self, target: &PlaybackTarget, session: &C::Session) -> usize {
        let mut sent = 0;
        for frame in self.store.frames() {
            match timeout(self.send_timeout, session.send(frame.clone())).await {
                Ok(Ok(())) => sent += 1,
                Ok(Err(e)) => {
                    warn!(channel = %target.channel, error = %e, "frame transmit failed, stopping playback");
                    break;
                }
                Err(_) => {
                    warn!(channel = %target.channel, "frame transmit timed out, stopping playback");
                    break;
                }
            }
        }
        sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use bytes::Bytes;
    use tokio::sync::Semaphore;

    use crate::common::types::GuildId;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Connect(ChannelId),
        Speaking(ChannelId, bool),
        Frame(ChannelId, Bytes),
        Disconnect(ChannelId),
    }

    #[derive(Default)]
    struct FakeInner {
        calls: Mutex<Vec<Call>>,
        connects: AtomicUsize,
        refuse_connect: bool,
        /// Frame index at which `send` starts failing.
        fail_send_at: Option<usize>,
        sends: AtomicUsize,
        /// When set, every `send` consumes one permit before completing.
        gate: Option<Arc<Semaphore>>,
    }

    #[derive(Clone, Default)]
    struct FakeConnector {
        inner: Arc<FakeInner>,
    }

    impl FakeConnector {
        fn gated(gate: Arc<Semaphore>) -> Self {
            Self {
                inner: Arc::new(FakeInner {
                    gate: Some(gate),
                    ..Default::default()
                }),
            }
        }

        fn refusing() -> Self {
            Self {
                inner: Arc::new(FakeInner {
                    refuse_connect: true,
                    ..Default::default()
                }),
            }
        }

        fn failing_sends_at(index: usize) -> Self {
            Self {
                inner: Arc::new(FakeInner {
                    fail_send_at: Some(index),
                    ..Default::default()
                }),
            }
        }

        fn calls(&self) -> Vec<Call> {
            self.inner.calls.lock().unwrap().clone()
        }

        fn connects(&self) -> usize {
            self.inner.connects.load(Ordering::SeqCst)
        }
    }

    struct FakeSession {
        channel: ChannelId,
        inner: Arc<FakeInner>,
    }

    #[async_trait]
    impl VoiceConnector for FakeConnector {
        type Session = FakeSession;

        async fn connect(&self, target: &PlaybackTarget) -> Result<FakeSession, VoiceError> {
            self.inner.connects.fetch_add(1, Ordering::SeqCst);
            self.inner
                .calls
                .lock()
                .unwrap()
                .push(Call::Connect(target.channel));
            if self.inner.refuse_connect {
                return Err(VoiceError::Connect("refused".into()));
            }
            Ok(FakeSession {
                channel: target.channel,
                inner: self.inner.clone(),
            })
        }
    }

    #[async_trait]
    impl VoiceSession for FakeSession {
        async fn set_speaking(&self, speaking: bool) {
            self.inner
                .calls
                .lock()
                .unwrap()
                .push(Call::Speaking(self.channel, speaking));
        }

        async fn send(&self, frame: Bytes) -> Result<(), VoiceError> {
            if let Some(gate) = &self.inner.gate {
                gate.acquire().await.unwrap().forget();
            }
            let index = self.inner.sends.fetch_add(1, Ordering::SeqCst);
            if self.inner.fail_send_at == Some(index) {
                return Err(VoiceError::TransmitClosed);
            }
            self.inner
                .calls
                .lock()
                .unwrap()
                .push(Call::Frame(self.channel, frame));
            Ok(())
        }

        async fn disconnect(&self) {
            self.inner
                .calls
                .lock()
                .unwrap()
                .push(Call::Disconnect(self.channel));
        }
    }

    fn fixture_store() -> Arc<FrameStore> {
        Arc::new(FrameStore::from_frames(vec![
            Bytes::from_static(b"abc"),
            Bytes::from_static(b"xy"),
        ]))
    }

    fn fast_cfg() -> PlaybackConfig {
        PlaybackConfig {
            preroll_ms: 0,
            connect_timeout_ms: 60_000,
            send_timeout_ms: 60_000,
        }
    }

    fn target(guild: u64, channel: u64) -> PlaybackTarget {
        PlaybackTarget {
            guild: GuildId(guild),
            channel: ChannelId(channel),
        }
    }

    async fn wait_for<F: Fn() -> bool>(cond: F) {
        for _ in 0..500 {
            if cond() {
                return;
            }
            sleep(Duration::from_millis(2)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn streams_every_frame_in_order_then_releases() {
        let fake = FakeConnector::default();
        let engine = PlaybackEngine::new(fixture_store(), fake.clone(), fast_cfg());

        let outcome = engine.trigger(target(1, 10)).await.unwrap();
        assert_eq!(outcome, PlaybackOutcome::Played { frames_sent: 2 });

        let c = ChannelId(10);
        assert_eq!(
            fake.calls(),
            vec![
                Call::Connect(c),
                Call::Speaking(c, true),
                Call::Frame(c, Bytes::from_static(b"abc")),
                Call::Frame(c, Bytes::from_static(b"xy")),
                Call::Speaking(c, false),
                Call::Disconnect(c),
            ]
        );
    }

    #[tokio::test]
    async fn empty_store_still_marks_speaking_and_releases() {
        let fake = FakeConnector::default();
        let store = Arc::new(FrameStore::from_frames(Vec::new()));
        let engine = PlaybackEngine::new(store, fake.clone(), fast_cfg());

        let outcome = engine.trigger(target(1, 10)).await.unwrap();
        assert_eq!(outcome, PlaybackOutcome::Played { frames_sent: 0 });

        let c = ChannelId(10);
        assert_eq!(
            fake.calls(),
            vec![
                Call::Connect(c),
                Call::Speaking(c, true),
                Call::Speaking(c, false),
                Call::Disconnect(c),
            ]
        );
    }

    #[tokio::test]
    async fn same_channel_trigger_is_a_noop_while_active() {
        let gate = Arc::new(Semaphore::new(0));
        let fake = FakeConnector::gated(gate.clone());
        let engine = Arc::new(PlaybackEngine::new(fixture_store(), fake.clone(), fast_cfg()));

        let first = tokio::spawn({
            let engine = engine.clone();
            async move { engine.trigger(target(1, 10)).await }
        });

        // Wait until the first invocation is parked mid-transmit.
        let probe = fake.clone();
        wait_for(move || {
            probe
                .calls()
                .iter()
                .any(|c| matches!(c, Call::Speaking(_, true)))
        })
        .await;

        let second = engine.trigger(target(1, 10)).await.unwrap();
        assert_eq!(second, PlaybackOutcome::AlreadyActive);
        assert_eq!(fake.connects(), 1);

        gate.add_permits(2);
        let first = first.await.unwrap().unwrap();
        assert_eq!(first, PlaybackOutcome::Played { frames_sent: 2 });

        // The claim is gone once the first invocation released.
        gate.add_permits(2);
        engine.trigger(target(1, 10)).await.unwrap();
        assert_eq!(fake.connects(), 2);
    }

    #[tokio::test]
    async fn distinct_channels_play_concurrently() {
        let fake = FakeConnector::default();
        let engine = Arc::new(PlaybackEngine::new(fixture_store(), fake.clone(), fast_cfg()));

        let a = tokio::spawn({
            let engine = engine.clone();
            async move { engine.trigger(target(1, 10)).await }
        });
        let b = tokio::spawn({
            let engine = engine.clone();
            async move { engine.trigger(target(1, 11)).await }
        });
        assert_eq!(
            a.await.unwrap().unwrap(),
            PlaybackOutcome::Played { frames_sent: 2 }
        );
        assert_eq!(
            b.await.unwrap().unwrap(),
            PlaybackOutcome::Played { frames_sent: 2 }
        );

        // Each channel saw the full store in order.
        for channel in [ChannelId(10), ChannelId(11)] {
            let frames: Vec<Bytes> = fake
                .calls()
                .into_iter()
                .filter_map(|c| match c {
                    Call::Frame(ch, f) if ch == channel => Some(f),
                    _ => None,
                })
                .collect();
            assert_eq!(
                frames,
                vec![Bytes::from_static(b"abc"), Bytes::from_static(b"xy")]
            );
        }
    }

    #[tokio::test]
    async fn connect_failure_aborts_without_speaking_and_frees_the_claim() {
        let fake = FakeConnector::refusing();
        let engine = PlaybackEngine::new(fixture_store(), fake.clone(), fast_cfg());

        assert!(matches!(
            engine.trigger(target(1, 10)).await,
            Err(VoiceError::Connect(_))
        ));
        assert!(
            !fake
                .calls()
                .iter()
                .any(|c| matches!(c, Call::Speaking(..) | Call::Disconnect(_)))
        );

        // A later trigger is not shadowed by the failed one.
        assert!(engine.trigger(target(1, 10)).await.is_err());
        assert_eq!(fake.connects(), 2);
    }

    #[tokio::test]
    async fn send_failure_skips_remaining_frames_but_still_releases() {
        let fake = FakeConnector::failing_sends_at(1);
        let engine = PlaybackEngine::new(fixture_store(), fake.clone(), fast_cfg());

        let outcome = engine.trigger(target(1, 10)).await.unwrap();
        assert_eq!(outcome, PlaybackOutcome::Played { frames_sent: 1 });

        let c = ChannelId(10);
        assert_eq!(
            fake.calls(),
            vec![
                Call::Connect(c),
                Call::Speaking(c, true),
                Call::Frame(c, Bytes::from_static(b"abc")),
                Call::Speaking(c, false),
                Call::Disconnect(c),
            ]
        );
    }
}
