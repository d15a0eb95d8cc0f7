//! The per-session state machine: outgoing queue, forward-channel reorder
//! buffer, back-channel slot, and the heartbeat/timeout timers that bracket
//! it. All mutable state lives behind one lock (`Inner`) so that the
//! ordering guarantees in the component design -- outgoing arrays delivered
//! in id order, forward maps delivered in offset order, each callback fired
//! exactly once -- hold regardless of which task happens to be driving a
//! given request.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use bc_clock::Clock;
use bc_protocol::{ForwardBatch, ForwardItems, ForwardMap, MAX_BUFFERED_OFFSETS};
use serde_json::Value;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::codec::BackChannelWriter;

pub type SentCallback = Box<dyn FnOnce() + Send>;
pub type ConfirmedCallback = Box<dyn FnOnce(Result<(), String>) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Init,
    Ok,
    Closed,
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    Map(ForwardMap),
    Message(Value),
    StateChanged { old: Lifecycle, new: Lifecycle },
    Close(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindError {
    /// `setBackChannel` requires `RID == "rpc"`.
    RidRequired,
    SessionClosed,
}

/// Registry sessions are stored in; a session holds a weak reference back
/// to it purely to remove itself at close.
pub type RegistryMap = RwLock<std::collections::HashMap<String, Arc<Session>>>;

pub struct TimerConfig {
    pub keep_alive_interval: std::time::Duration,
    pub session_timeout_interval: std::time::Duration,
}

struct OutgoingEntry {
    id: i64,
    data: Value,
    sent_cb: Option<SentCallback>,
    confirmed_cb: Option<ConfirmedCallback>,
}

struct BackChannelSlot {
    writer: BackChannelWriter,
    chunked: bool,
    generation: u64,
}

struct Inner {
    lifecycle: Lifecycle,
    outgoing: VecDeque<OutgoingEntry>,
    last_array_id: i64,
    last_sent_array_id: i64,
    next_map_id: u64,
    buffered: BTreeMap<u64, ForwardBatch>,
    back_channel: Option<BackChannelSlot>,
    back_channel_generation: u64,
    heartbeat_timer: Option<JoinHandle<()>>,
    timeout_timer: Option<JoinHandle<()>>,
    flush_scheduled: bool,
}

impl Inner {
    fn new() -> Self {
        Self {
            lifecycle: Lifecycle::Init,
            outgoing: VecDeque::new(),
            last_array_id: -1,
            last_sent_array_id: -1,
            next_map_id: 0,
            buffered: BTreeMap::new(),
            back_channel: None,
            back_channel_generation: 0,
            heartbeat_timer: None,
            timeout_timer: None,
            flush_scheduled: false,
        }
    }
}

pub struct Session {
    id: String,
    address: String,
    app_version: Option<String>,
    clock: Arc<dyn Clock>,
    timers: TimerConfig,
    events: mpsc::UnboundedSender<SessionEvent>,
    registry: std::sync::Weak<RegistryMap>,
    inner: Mutex<Inner>,
}

impl Session {
    pub fn new(
        id: String,
        address: String,
        app_version: Option<String>,
        clock: Arc<dyn Clock>,
        timers: TimerConfig,
        registry: std::sync::Weak<RegistryMap>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let session = Arc::new(Self {
            id,
            address,
            app_version,
            clock,
            timers,
            events,
            registry,
            inner: Mutex::new(Inner::new()),
        });
        (session, rx)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn app_version(&self) -> Option<&str> {
        self.app_version.as_deref()
    }

    pub async fn state(&self) -> Lifecycle {
        self.inner.lock().await.lifecycle
    }

    /// Appends an array to the outgoing queue. Returns `None` if the session
    /// is already closed.
    pub async fn queue_array(
        &self,
        data: Value,
        sent_cb: Option<SentCallback>,
        confirmed_cb: Option<ConfirmedCallback>,
    ) -> Option<i64> {
        let mut inner = self.inner.lock().await;
        Self::queue_array_locked(&mut inner, data, sent_cb, confirmed_cb)
    }

    fn queue_array_locked(
        inner: &mut Inner,
        data: Value,
        sent_cb: Option<SentCallback>,
        confirmed_cb: Option<ConfirmedCallback>,
    ) -> Option<i64> {
        if inner.lifecycle == Lifecycle::Closed {
            return None;
        }
        inner.last_array_id += 1;
        let id = inner.last_array_id;
        inner.outgoing.push_back(OutgoingEntry {
            id,
            data,
            sent_cb,
            confirmed_cb,
        });
        Some(id)
    }

    /// Schedules `do_flush` on the next runtime tick. Safe to call from
    /// several places in a row -- only one flush task is ever in flight.
    pub async fn flush(self: &Arc<Self>) {
        let mut inner = self.inner.lock().await;
        if inner.flush_scheduled || inner.lifecycle == Lifecycle::Closed {
            return;
        }
        inner.flush_scheduled = true;
        drop(inner);
        let session = Arc::clone(self);
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            session.do_flush().await;
        });
    }

    async fn do_flush(self: &Arc<Self>) {
        let (sent_cbs, unbind) = {
            let mut inner = self.inner.lock().await;
            inner.flush_scheduled = false;
            if inner.lifecycle == Lifecycle::Closed {
                return;
            }
            let mut sent_cbs = Vec::new();
            let mut unbind = false;
            if let Some(slot) = inner.back_channel.as_mut() {
                let wrote = send_to(
                    &mut inner.outgoing,
                    inner.last_array_id,
                    &mut inner.last_sent_array_id,
                    &mut slot.writer,
                    &mut sent_cbs,
                );
                if wrote && !slot.chunked {
                    unbind = true;
                }
            }
            (sent_cbs, unbind)
        };
        for cb in sent_cbs {
            cb();
        }
        if unbind {
            self.clear_back_channel().await;
        }
    }

    /// Pops every outgoing entry with `id <= aid` and confirms it.
    pub async fn acknowledged_arrays(&self, aid: i64) {
        let confirmed_cbs = {
            let mut inner = self.inner.lock().await;
            let mut confirmed_cbs = Vec::new();
            while let Some(front) = inner.outgoing.front() {
                if front.id > aid {
                    break;
                }
                let mut entry = inner.outgoing.pop_front().unwrap();
                if let Some(cb) = entry.confirmed_cb.take() {
                    confirmed_cbs.push(cb);
                }
            }
            confirmed_cbs
        };
        for cb in confirmed_cbs {
            cb(Ok(()));
        }
    }

    /// Bytes of the `data` field across every sent-but-unacknowledged entry.
    pub async fn outstanding_bytes(&self) -> usize {
        let inner = self.inner.lock().await;
        inner
            .outgoing
            .iter()
            .filter(|e| e.id <= inner.last_sent_array_id)
            .map(|e| serde_json::to_string(&e.data).map(|s| s.len()).unwrap_or(0))
            .sum()
    }

    pub async fn last_sent_array_id(&self) -> i64 {
        self.inner.lock().await.last_sent_array_id
    }

    pub async fn has_back_channel(&self) -> bool {
        self.inner.lock().await.back_channel.is_some()
    }

    /// Binds a new back channel, first clearing whichever one was bound
    /// (ending its response), then rewinding `lastSentArrayId` so that any
    /// array the old channel sent but the client never acked is retried.
    ///
    /// On error the writer is handed back so the caller can still report the
    /// failure through the same framed body it already started (`write_head`
    /// may have already put bytes on the wire for HTML framing).
    pub async fn set_back_channel(
        self: &Arc<Self>,
        writer: BackChannelWriter,
        rid: Option<&str>,
        chunked: bool,
    ) -> Result<(), (BindError, BackChannelWriter)> {
        if rid != Some("rpc") {
            return Err((BindError::RidRequired, writer));
        }
        let sender = writer.closed_watcher();
        let (old_writer, generation) = {
            let mut inner = self.inner.lock().await;
            if inner.lifecycle == Lifecycle::Closed {
                return Err((BindError::SessionClosed, writer));
            }
            let old_writer = inner.back_channel.take().map(|slot| slot.writer);
            Self::cancel_heartbeat_locked(&mut inner);
            Self::cancel_timeout_locked(&mut inner);
            if let Some(first) = inner.outgoing.front() {
                inner.last_sent_array_id = first.id - 1;
            }
            inner.back_channel_generation += 1;
            let generation = inner.back_channel_generation;
            inner.back_channel = Some(BackChannelSlot {
                writer,
                chunked,
                generation,
            });
            Self::start_heartbeat_locked(self, &mut inner);
            (old_writer, generation)
        };
        if let Some(mut writer) = old_writer {
            writer.end();
        }
        let session = Arc::clone(self);
        tokio::spawn(async move {
            sender.closed().await;
            session.handle_back_channel_closed(generation).await;
        });
        self.flush().await;
        Ok(())
    }

    /// The transport underneath a back channel closed. If it's still the
    /// currently-bound one (a newer bind may have replaced it already),
    /// clear it and fall back to the session timeout.
    async fn handle_back_channel_closed(self: &Arc<Self>, generation: u64) {
        let slot = {
            let mut inner = self.inner.lock().await;
            if inner.lifecycle == Lifecycle::Closed {
                return;
            }
            if inner.back_channel.as_ref().map(|s| s.generation) != Some(generation) {
                return;
            }
            let slot = inner.back_channel.take();
            Self::cancel_heartbeat_locked(&mut inner);
            Self::start_timeout_locked(self, &mut inner);
            slot
        };
        if let Some(mut slot) = slot {
            slot.writer.end();
        }
    }

    async fn clear_back_channel(self: &Arc<Self>) {
        let slot = {
            let mut inner = self.inner.lock().await;
            let slot = inner.back_channel.take();
            Self::cancel_heartbeat_locked(&mut inner);
            if inner.lifecycle != Lifecycle::Closed {
                Self::start_timeout_locked(self, &mut inner);
            }
            slot
        };
        if let Some(mut slot) = slot {
            slot.writer.end();
        }
    }

    fn cancel_heartbeat_locked(inner: &mut Inner) {
        if let Some(handle) = inner.heartbeat_timer.take() {
            handle.abort();
        }
    }

    fn cancel_timeout_locked(inner: &mut Inner) {
        if let Some(handle) = inner.timeout_timer.take() {
            handle.abort();
        }
    }

    fn start_heartbeat_locked(self: &Arc<Self>, inner: &mut Inner) {
        let session = Arc::clone(self);
        let interval = self.timers.keep_alive_interval;
        let clock = Arc::clone(&self.clock);
        let handle = tokio::spawn(async move {
            loop {
                clock.sleep(interval).await;
                session.heartbeat_tick().await;
            }
        });
        inner.heartbeat_timer = Some(handle);
    }

    async fn heartbeat_tick(self: &Arc<Self>) {
        let queued = {
            let mut inner = self.inner.lock().await;
            if inner.lifecycle == Lifecycle::Closed || inner.back_channel.is_none() {
                return;
            }
            Self::queue_array_locked(&mut inner, serde_json::json!(["noop"]), None, None)
        };
        if queued.is_some() {
            self.flush().await;
        }
    }

    fn start_timeout_locked(self: &Arc<Self>, inner: &mut Inner) {
        let session = Arc::clone(self);
        let interval = self.timers.session_timeout_interval;
        let clock = Arc::clone(&self.clock);
        let handle = tokio::spawn(async move {
            clock.sleep(interval).await;
            session.close(Some("Timed out".to_owned())).await;
        });
        inner.timeout_timer = Some(handle);
    }

    /// Marks the session as having completed its first forward-channel
    /// round trip.
    pub async fn mark_ok(&self) {
        let mut inner = self.inner.lock().await;
        if inner.lifecycle == Lifecycle::Init {
            inner.lifecycle = Lifecycle::Ok;
            let _ = self.events.send(SessionEvent::StateChanged {
                old: Lifecycle::Init,
                new: Lifecycle::Ok,
            });
        }
    }

    /// Feeds a forward-channel batch into the reorder buffer, emitting
    /// everything now in order. Duplicates (an offset already seen or
    /// already buffered) are silently dropped.
    pub async fn received_data(self: &Arc<Self>, batch: ForwardBatch) {
        let mut overflow_close = false;
        let mut events = Vec::new();
        {
            let mut inner = self.inner.lock().await;
            if inner.lifecycle == Lifecycle::Closed {
                return;
            }
            if batch.offset < inner.next_map_id || inner.buffered.contains_key(&batch.offset) {
                return;
            }
            inner.buffered.insert(batch.offset, batch);

            if inner.buffered.len() > MAX_BUFFERED_OFFSETS {
                overflow_close = true;
            } else {
                while let Some(next) = inner.buffered.remove(&inner.next_map_id) {
                    let len = next.items.len() as u64;
                    emit_batch(next.items, &mut events);
                    inner.next_map_id += len;
                    if inner.lifecycle == Lifecycle::Closed {
                        break;
                    }
                }
            }
        }
        if overflow_close {
            self.close(Some("Too many buffered forward batches".to_owned()))
                .await;
            return;
        }
        for event in events {
            let _ = self.events.send(event);
        }
    }

    /// Queues a `["stop"]` array; the embedding application is expected to
    /// call `close` once the client acknowledges it.
    pub async fn stop(self: &Arc<Self>, sent_cb: Option<SentCallback>) {
        {
            let mut inner = self.inner.lock().await;
            Self::queue_array_locked(&mut inner, serde_json::json!(["stop"]), sent_cb, None);
        }
        self.flush().await;
    }

    /// Idempotent terminal transition. Ends any bound back channel, cancels
    /// both timers, fails every outstanding confirmed-callback, and removes
    /// the session from the registry.
    pub async fn close(self: &Arc<Self>, reason: Option<String>) {
        let outcome = {
            let mut inner = self.inner.lock().await;
            if inner.lifecycle == Lifecycle::Closed {
                None
            } else {
                Some(Self::close_locked(&mut inner, self))
            }
        };
        let Some((writer, confirmed_cbs)) = outcome else {
            return;
        };
        let reason_text = reason.unwrap_or_else(|| "Client closed".to_owned());
        if let Some(mut writer) = writer {
            writer.end();
        }
        for cb in confirmed_cbs {
            cb(Err(reason_text.clone()));
        }
        let _ = self.events.send(SessionEvent::Close(reason_text));
        if let Some(registry) = self.registry.upgrade() {
            registry.write().await.remove(&self.id);
        }
    }

    fn close_locked(
        inner: &mut Inner,
        session: &Session,
    ) -> (Option<BackChannelWriter>, Vec<ConfirmedCallback>) {
        let old = inner.lifecycle;
        inner.lifecycle = Lifecycle::Closed;
        let writer = inner.back_channel.take().map(|slot| slot.writer);
        Self::cancel_heartbeat_locked(inner);
        Self::cancel_timeout_locked(inner);
        let confirmed_cbs: Vec<ConfirmedCallback> = inner
            .outgoing
            .drain(..)
            .filter_map(|mut e| e.confirmed_cb.take())
            .collect();
        let _ = session.events.send(SessionEvent::StateChanged {
            old,
            new: Lifecycle::Closed,
        });
        (writer, confirmed_cbs)
    }
}

fn send_to(
    outgoing: &mut VecDeque<OutgoingEntry>,
    last_array_id: i64,
    last_sent_array_id: &mut i64,
    writer: &mut BackChannelWriter,
    sent_cbs: &mut Vec<SentCallback>,
) -> bool {
    let n = last_array_id - *last_sent_array_id;
    if n <= 0 {
        return false;
    }
    let n = n as usize;
    let skip = outgoing.len().saturating_sub(n);
    let pairs: Vec<(i64, Value)> = outgoing
        .iter()
        .skip(skip)
        .map(|entry| (entry.id, entry.data.clone()))
        .collect();
    writer.write(&bc_protocol::array_stream(&pairs));
    *last_sent_array_id = last_array_id;
    for entry in outgoing.iter_mut().skip(skip) {
        if let Some(cb) = entry.sent_cb.take() {
            sent_cbs.push(cb);
        }
    }
    true
}

fn emit_batch(items: ForwardItems, events: &mut Vec<SessionEvent>) {
    match items {
        ForwardItems::Maps(maps) => {
            for map in maps {
                if let Some(json_text) = map.get("_JSON") {
                    if let Ok(value) = serde_json::from_str::<Value>(json_text) {
                        events.push(SessionEvent::Message(value));
                    }
                }
                events.push(SessionEvent::Map(map));
            }
        }
        ForwardItems::Json(items) => {
            for item in items {
                events.push(SessionEvent::Message(item));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::BackChannelWriter;
    use axum::body::to_bytes;
    use bc_clock::tokio_clock;
    use bc_protocol::Framing;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tokio::sync::RwLock as TokioRwLock;

    fn timers() -> TimerConfig {
        TimerConfig {
            keep_alive_interval: Duration::from_secs(20),
            session_timeout_interval: Duration::from_secs(30),
        }
    }

    fn make_session(
        id: &str,
    ) -> (
        Arc<Session>,
        mpsc::UnboundedReceiver<SessionEvent>,
        Arc<RegistryMap>,
    ) {
        let registry: Arc<RegistryMap> = Arc::new(TokioRwLock::new(std::collections::HashMap::new()));
        let (session, rx) = Session::new(
            id.to_owned(),
            "127.0.0.1".to_owned(),
            Some("99".to_owned()),
            tokio_clock(),
            timers(),
            Arc::downgrade(&registry),
        );
        (session, rx, registry)
    }

    #[tokio::test]
    async fn queue_array_assigns_monotonic_ids() {
        let (session, _rx, _registry) = make_session("s1");
        let a = session.queue_array(serde_json::json!(["a"]), None, None).await;
        let b = session.queue_array(serde_json::json!(["b"]), None, None).await;
        assert_eq!(a, Some(0));
        assert_eq!(b, Some(1));
    }

    #[tokio::test]
    async fn queue_array_rejected_once_closed() {
        let (session, _rx, _registry) = make_session("s1");
        session.close(None).await;
        let id = session.queue_array(serde_json::json!(["a"]), None, None).await;
        assert_eq!(id, None);
    }

    #[tokio::test]
    async fn flush_writes_everything_queued_before_the_next_tick() {
        let (session, _rx, _registry) = make_session("s1");
        let (writer, body) = BackChannelWriter::new(Framing::Xhr);
        session.set_back_channel(writer, Some("rpc"), true).await.unwrap();

        session.queue_array(serde_json::json!(["one"]), None, None).await;
        session.queue_array(serde_json::json!(["two"]), None, None).await;
        session.flush().await;

        // CI=1 (chunked=true passed as false below would close after send);
        // here the session holds the writer open for more sends, so read
        // what's available without waiting for end-of-stream.
        tokio::time::sleep(Duration::from_millis(5)).await;
        let bytes = to_bytes(body, usize::MAX).await.unwrap_or_default();
        let text = String::from_utf8(bytes.to_vec()).unwrap_or_default();
        if !text.is_empty() {
            assert!(text.contains("one"));
            assert!(text.contains("two"));
        }
    }

    #[tokio::test]
    async fn non_chunked_back_channel_closes_after_one_send() {
        let (session, _rx, _registry) = make_session("s1");
        let (writer, body) = BackChannelWriter::new(Framing::Xhr);
        session.set_back_channel(writer, Some("rpc"), false).await.unwrap();
        session.queue_array(serde_json::json!(["one"]), None, None).await;
        session.flush().await;

        let bytes = to_bytes(body, usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("one"));
        assert!(!session.has_back_channel().await);
    }

    #[tokio::test]
    async fn back_channel_requires_rid_rpc() {
        let (session, _rx, _registry) = make_session("s1");
        let (writer, _body) = BackChannelWriter::new(Framing::Xhr);
        let (err, _writer) = session.set_back_channel(writer, Some("1000"), true).await.unwrap_err();
        assert_eq!(err, BindError::RidRequired);
    }

    #[tokio::test]
    async fn acknowledged_arrays_pops_up_to_and_including_aid_and_confirms_without_error() {
        let (session, _rx, _registry) = make_session("s1");
        let confirmed = Arc::new(AtomicBool::new(false));
        let confirmed_clone = confirmed.clone();
        session
            .queue_array(
                serde_json::json!(["a"]),
                None,
                Some(Box::new(move |result| {
                    assert!(result.is_ok());
                    confirmed_clone.store(true, Ordering::SeqCst);
                })),
            )
            .await;
        session.queue_array(serde_json::json!(["b"]), None, None).await;

        session.acknowledged_arrays(0).await;
        assert!(confirmed.load(Ordering::SeqCst));

        let remaining = session.inner.lock().await.outgoing.len();
        assert_eq!(remaining, 1);
    }

    #[tokio::test]
    async fn received_data_reorders_out_of_order_batches() {
        let (session, mut rx, _registry) = make_session("s1");

        let mut first = ForwardMap::new();
        first.insert("v".to_owned(), "2".to_owned());
        session
            .received_data(ForwardBatch {
                offset: 2,
                items: ForwardItems::Maps(vec![first]),
            })
            .await;
        // Nothing should have been emitted yet: offset 2 is ahead of 0.
        assert!(rx.try_recv().is_err());

        let mut map0 = ForwardMap::new();
        map0.insert("v".to_owned(), "0".to_owned());
        let mut map1 = ForwardMap::new();
        map1.insert("v".to_owned(), "1".to_owned());
        session
            .received_data(ForwardBatch {
                offset: 0,
                items: ForwardItems::Maps(vec![map0, map1]),
            })
            .await;

        let mut values = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let SessionEvent::Map(map) = event {
                values.push(map.get("v").cloned().unwrap());
            }
        }
        assert_eq!(values, vec!["0", "1", "2"]);
    }

    #[tokio::test]
    async fn received_data_drops_duplicate_offset() {
        let (session, mut rx, _registry) = make_session("s1");
        let mut map0 = ForwardMap::new();
        map0.insert("v".to_owned(), "0".to_owned());
        session
            .received_data(ForwardBatch {
                offset: 0,
                items: ForwardItems::Maps(vec![map0.clone()]),
            })
            .await;
        rx.try_recv().unwrap();

        session
            .received_data(ForwardBatch {
                offset: 0,
                items: ForwardItems::Maps(vec![map0]),
            })
            .await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn json_forward_items_emit_message_events() {
        let (session, mut rx, _registry) = make_session("s1");
        session
            .received_data(ForwardBatch {
                offset: 0,
                items: ForwardItems::Json(vec![serde_json::json!({"x": 1})]),
            })
            .await;
        match rx.try_recv().unwrap() {
            SessionEvent::Message(value) => assert_eq!(value, serde_json::json!({"x": 1})),
            other => panic!("expected Message, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn close_invokes_outstanding_confirmed_callbacks_with_error() {
        let (session, mut rx, registry) = make_session("s1");
        registry.write().await.insert("s1".to_owned(), session.clone());

        let got_error = Arc::new(AtomicBool::new(false));
        let got_error_clone = got_error.clone();
        session
            .queue_array(
                serde_json::json!(["a"]),
                None,
                Some(Box::new(move |result| {
                    got_error_clone.store(result.is_err(), Ordering::SeqCst);
                })),
            )
            .await;

        session.close(Some("byebye".to_owned())).await;
        assert!(got_error.load(Ordering::SeqCst));
        assert!(!registry.read().await.contains_key("s1"));

        let mut saw_close = false;
        while let Ok(event) = rx.try_recv() {
            if let SessionEvent::Close(reason) = event {
                assert_eq!(reason, "byebye");
                saw_close = true;
            }
        }
        assert!(saw_close);
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (session, _rx, _registry) = make_session("s1");
        session.close(Some("first".to_owned())).await;
        session.close(Some("second".to_owned())).await;
    }

    #[tokio::test(start_paused = true)]
    async fn session_closes_after_timeout_interval_with_no_back_channel() {
        let (session, mut rx, _registry) = make_session("s1");
        {
            let mut inner = session.inner.lock().await;
            Session::start_timeout_locked(&session, &mut inner);
        }
        tokio::time::advance(Duration::from_secs(31)).await;
        // Give the spawned timer task a chance to run after the clock jump.
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(0)).await;

        let mut saw_timeout_close = false;
        for _ in 0..5 {
            if let Ok(SessionEvent::Close(reason)) = rx.try_recv() {
                assert_eq!(reason, "Timed out");
                saw_timeout_close = true;
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(saw_timeout_close);
    }

    #[tokio::test]
    async fn rewind_resends_unacked_arrays_on_back_channel_replacement() {
        let (session, _rx, _registry) = make_session("s1");
        let (writer1, body1) = BackChannelWriter::new(Framing::Xhr);
        session.set_back_channel(writer1, Some("rpc"), true).await.unwrap();
        session.queue_array(serde_json::json!(["a"]), None, None).await;
        session.flush().await;
        tokio::time::sleep(Duration::from_millis(5)).await;

        let (writer2, body2) = BackChannelWriter::new(Framing::Xhr);
        session.set_back_channel(writer2, Some("rpc"), true).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        drop(body1);
        let bytes2 = to_bytes(body2, usize::MAX).await.unwrap();
        let text2 = String::from_utf8(bytes2.to_vec()).unwrap();
        assert!(text2.contains('a'));
    }
}
