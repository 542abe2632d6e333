//! Streamed replies.
//!
//! A [`ReplyStream`] hands the provider's raw bytes to the caller unchanged
//! while decoding the same bytes into content deltas. Deltas are appended
//! to the pending assistant message in place. When the stream terminates the
//! turn is finalized exactly once: the reply is counted and stamped, the
//! record is stored, and the completion callback runs.
//!
//! Termination can be observed several ways (the `[DONE]` sentinel, end of
//! the byte stream, a transport error, or the consumer dropping the stream)
//! and more than one can fire for the same turn. Only the first finalizes.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use bytes::Bytes;
use chrono::Utc;
use futures::future::BoxFuture;
use futures::{FutureExt, Stream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use chatgate_core::{ConversationRecord, Error, Result};
use chatgate_providers::{ByteStream, SseLineParser, StreamEvent, Tokenizer};

use crate::store::ConversationStore;

/// Called once with the stored record after a streamed turn is persisted.
pub type CompletionCallback = Box<dyn FnOnce(ConversationRecord) + Send + 'static>;

/// How a stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// `data: [DONE]` was seen
    Sentinel,
    /// The byte stream ended without a sentinel
    EndOfStream,
    /// The transport failed mid-stream
    TransportError,
    /// The consumer dropped the stream
    Closed,
}

impl Termination {
    fn is_clean(self) -> bool {
        matches!(self, Termination::Sentinel | Termination::EndOfStream)
    }
}

/// Outcome of a streamed turn.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    /// Still streaming
    Pending,
    /// The record was stored
    Persisted(ConversationRecord),
    /// Ended before any content; nothing stored
    Abandoned,
    /// Finalization failed
    Failed(String),
}

/// A turn whose assistant reply is still arriving.
#[derive(Debug, Clone)]
pub struct PendingTurn {
    pub session_id: String,
    pub model: String,
    /// Record with the user message and an empty assistant placeholder appended
    pub record: ConversationRecord,
    /// Whether this is the session's first turn
    pub first_turn: bool,
}

/// Wraps provider byte streams into [`ReplyStream`]s.
pub struct StreamReconstructor {
    store: Arc<dyn ConversationStore>,
    tokenizer: Arc<dyn Tokenizer>,
    on_complete: Option<CompletionCallback>,
}

impl StreamReconstructor {
    pub fn new(store: Arc<dyn ConversationStore>, tokenizer: Arc<dyn Tokenizer>) -> Self {
        Self {
            store,
            tokenizer,
            on_complete: None,
        }
    }

    /// Run `callback` once the turn is stored.
    pub fn on_complete(mut self, callback: Option<CompletionCallback>) -> Self {
        self.on_complete = callback;
        self
    }

    /// Start tracking `turn` as `source` delivers it.
    pub fn wrap(self, turn: PendingTurn, source: ByteStream) -> Result<ReplyStream> {
        let reply_index = turn
            .record
            .messages
            .len()
            .checked_sub(1)
            .ok_or_else(|| Error::Store("pending turn has no assistant placeholder".to_string()))?;

        let (outcome, completion) = watch::channel(TurnOutcome::Pending);

        let state = Arc::new(TurnState {
            session_id: turn.session_id,
            model: turn.model,
            record: Mutex::new(turn.record),
            reply_index,
            first_turn: turn.first_turn,
            received_content: AtomicBool::new(false),
            finalized: AtomicBool::new(false),
            store: self.store,
            tokenizer: self.tokenizer,
            on_complete: Mutex::new(self.on_complete),
            outcome,
        });

        Ok(ReplyStream {
            inner: Some(source),
            parser: SseLineParser::new(),
            state,
            finalizing: None,
            completion,
        })
    }
}

/// Shared between the stream and its finalization task.
struct TurnState {
    session_id: String,
    model: String,
    record: Mutex<ConversationRecord>,
    reply_index: usize,
    first_turn: bool,
    received_content: AtomicBool,
    finalized: AtomicBool,
    store: Arc<dyn ConversationStore>,
    tokenizer: Arc<dyn Tokenizer>,
    on_complete: Mutex<Option<CompletionCallback>>,
    outcome: watch::Sender<TurnOutcome>,
}

impl TurnState {
    /// Apply decoded events. Returns true if the sentinel was among them.
    fn apply(&self, events: Vec<StreamEvent>) -> bool {
        if events.is_empty() {
            return false;
        }

        let mut sentinel = false;
        let mut record = self.record.lock();
        for event in events {
            match event {
                // Role-only and keep-alive deltas carry no text
                StreamEvent::Delta(text) if text.is_empty() => {}
                StreamEvent::Delta(text) => {
                    if let Some(reply) = record.messages.get_mut(self.reply_index) {
                        reply.content.push_str(&text);
                    }
                    self.received_content.store(true, Ordering::SeqCst);
                }
                StreamEvent::Done => sentinel = true,
            }
        }
        sentinel
    }

    /// Claim finalization. Returns `None` if another termination already did.
    fn begin_finalize(self: Arc<Self>, termination: Termination) -> Option<BoxFuture<'static, Result<()>>> {
        if self.finalized.swap(true, Ordering::SeqCst) {
            debug!(session_id = %self.session_id, ?termination, "Turn already finalized");
            return None;
        }
        Some(async move { self.finalize(termination).await }.boxed())
    }

    async fn finalize(&self, termination: Termination) -> Result<()> {
        if !termination.is_clean() && !self.received_content.load(Ordering::SeqCst) {
            info!(
                session_id = %self.session_id,
                ?termination,
                "Stream ended before any content; nothing stored"
            );
            // Drop the user message and the placeholder
            self.record.lock().messages.truncate(self.reply_index.saturating_sub(1));
            self.outcome.send_replace(TurnOutcome::Abandoned);
            return Ok(());
        }

        match self.persist().await {
            Ok(record) => {
                let callback = self.on_complete.lock().take();
                if let Some(callback) = callback {
                    callback(record.clone());
                }
                debug!(session_id = %self.session_id, ?termination, "Streamed turn stored");
                self.outcome.send_replace(TurnOutcome::Persisted(record));
                Ok(())
            }
            Err(e) => {
                error!(session_id = %self.session_id, error = %e, "Failed to store streamed turn");
                self.outcome.send_replace(TurnOutcome::Failed(e.to_string()));
                Err(e)
            }
        }
    }

    async fn persist(&self) -> Result<ConversationRecord> {
        let snapshot = {
            let mut record = self.record.lock();
            let now = Utc::now();

            let reply = record
                .messages
                .get_mut(self.reply_index)
                .ok_or_else(|| Error::Store("assistant placeholder missing".to_string()))?;
            let tokens = self.tokenizer.count_message(&self.model, &reply.outbound())?;
            reply.finalize(tokens, now);

            record.total_tokens += u64::from(tokens);
            record.touch(now, self.first_turn);
            record.clone()
        };

        self.store.put(&self.session_id, &snapshot).await?;
        Ok(snapshot)
    }
}

/// A streamed assistant reply.
///
/// Yields the provider's bytes exactly as received. A transport error is
/// yielded once after any partial content has been handed to finalization;
/// the stream ends (`None`) only after the turn has been finalized.
///
/// Inside a tokio runtime finalization runs as its own task and survives the
/// stream being dropped; outside one it is driven by `poll_next`. Dropping the
/// stream early finalizes the turn in the background on the current runtime.
pub struct ReplyStream {
    inner: Option<ByteStream>,
    parser: SseLineParser,
    state: Arc<TurnState>,
    finalizing: Option<Finalizing>,
    completion: watch::Receiver<TurnOutcome>,
}

/// Finalization claimed by a termination seen while polling.
enum Finalizing {
    Spawned(JoinHandle<Result<()>>),
    Inline(BoxFuture<'static, Result<()>>),
}

impl ReplyStream {
    /// Session this reply belongs to.
    pub fn session_id(&self) -> &str {
        &self.state.session_id
    }

    /// Snapshot of the record, including the reply received so far.
    pub fn record(&self) -> ConversationRecord {
        self.state.record.lock().clone()
    }

    /// Reply text received so far.
    pub fn content(&self) -> String {
        self.state
            .record
            .lock()
            .messages
            .get(self.state.reply_index)
            .map(|m| m.content.clone())
            .unwrap_or_default()
    }

    /// Whether some termination has claimed finalization.
    pub fn is_finalizing(&self) -> bool {
        self.state.finalized.load(Ordering::SeqCst)
    }

    /// Handle that resolves once the turn has been finalized.
    pub fn completion(&self) -> TurnCompletion {
        TurnCompletion {
            outcome: self.completion.clone(),
        }
    }

    fn trigger(&mut self, termination: Termination) {
        let Some(finalize) = self.state.clone().begin_finalize(termination) else {
            return;
        };
        self.finalizing = Some(match tokio::runtime::Handle::try_current() {
            Ok(handle) => Finalizing::Spawned(handle.spawn(finalize)),
            Err(_) => Finalizing::Inline(finalize),
        });
    }
}

impl Stream for ReplyStream {
    type Item = Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if let Some(inner) = this.inner.as_mut() {
            match ready!(inner.poll_next_unpin(cx)) {
                Some(Ok(bytes)) => {
                    let events = this.parser.feed(&bytes);
                    if this.state.apply(events) {
                        this.trigger(Termination::Sentinel);
                    }
                    return Poll::Ready(Some(Ok(bytes)));
                }
                Some(Err(e)) => {
                    warn!(session_id = %this.state.session_id, error = %e, "Reply stream failed");
                    this.inner = None;
                    this.trigger(Termination::TransportError);
                    return Poll::Ready(Some(Err(e.into())));
                }
                None => {
                    this.inner = None;
                    let events = this.parser.finish();
                    this.state.apply(events);
                    this.trigger(Termination::EndOfStream);
                }
            }
        }

        let outcome = match this.finalizing.as_mut() {
            None => return Poll::Ready(None),
            Some(Finalizing::Spawned(handle)) => match ready!(Pin::new(handle).poll(cx)) {
                Ok(outcome) => outcome,
                Err(e) => Err(Error::Store(format!("turn finalization task failed: {e}"))),
            },
            Some(Finalizing::Inline(finalize)) => ready!(finalize.as_mut().poll(cx)),
        };
        this.finalizing = None;

        match outcome {
            Ok(()) => Poll::Ready(None),
            Err(e) => Poll::Ready(Some(Err(e))),
        }
    }
}

impl Drop for ReplyStream {
    fn drop(&mut self) {
        // A spawned finalization task carries on by itself
        let finalize = match self.finalizing.take() {
            Some(Finalizing::Inline(finalize)) => finalize,
            Some(Finalizing::Spawned(_)) => return,
            None => match self.state.clone().begin_finalize(Termination::Closed) {
                Some(finalize) => finalize,
                None => return,
            },
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = finalize.await {
                        error!(error = %e, "Failed to finalize closed reply stream");
                    }
                });
            }
            Err(_) => {
                warn!(
                    session_id = %self.state.session_id,
                    "Reply stream dropped outside a runtime; turn not stored"
                );
                self.state.outcome.send_replace(TurnOutcome::Failed(
                    "dropped outside a tokio runtime".to_string(),
                ));
            }
        }
    }
}

impl fmt::Debug for ReplyStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplyStream")
            .field("session_id", &self.state.session_id)
            .field("model", &self.state.model)
            .field("streaming", &self.inner.is_some())
            .field("finalizing", &self.is_finalizing())
            .finish()
    }
}

/// Waits for a streamed turn to be finalized.
#[derive(Debug, Clone)]
pub struct TurnCompletion {
    outcome: watch::Receiver<TurnOutcome>,
}

impl TurnCompletion {
    /// Current outcome without waiting.
    pub fn outcome(&self) -> TurnOutcome {
        self.outcome.borrow().clone()
    }

    /// Resolve once the turn is no longer pending.
    pub async fn wait(mut self) -> TurnOutcome {
        let settled = self
            .outcome
            .wait_for(|outcome| !matches!(outcome, TurnOutcome::Pending))
            .await
            .map(|outcome| outcome.clone());

        match settled {
            Ok(outcome) => outcome,
            Err(_) => TurnOutcome::Failed("turn dropped before finalization".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryConversationStore;
    use chatgate_core::{ChatMessage, ProviderError};
    use chatgate_providers::EstimatingTokenizer;
    use futures::stream;
    use std::sync::atomic::AtomicUsize;

    const PARIS: &str = "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n\
                         data: {\"choices\":[{\"delta\":{\"content\":\"The capital \"}}]}\n\n\
                         data: {\"choices\":[{\"delta\":{\"content\":\"of France is \"}}]}\n\n\
                         data: {\"choices\":[{\"delta\":{\"content\":\"Paris.\"}}]}\n\n\
                         data: [DONE]\n\n";

    fn pending(session_id: &str) -> PendingTurn {
        let mut record = ConversationRecord::new(session_id);
        record.push_turn(
            ChatMessage::user("What is the capital of France?"),
            ChatMessage::assistant(""),
        );
        PendingTurn {
            session_id: session_id.to_string(),
            model: "gpt-3.5-turbo".to_string(),
            record,
            first_turn: true,
        }
    }

    /// Split `body` into chunks of `size` bytes.
    fn chunked(body: &str, size: usize) -> ByteStream {
        let chunks: Vec<std::result::Result<Bytes, ProviderError>> = body
            .as_bytes()
            .chunks(size)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        Box::pin(stream::iter(chunks))
    }

    fn reconstructor(store: &Arc<MemoryConversationStore>) -> StreamReconstructor {
        StreamReconstructor::new(store.clone(), Arc::new(EstimatingTokenizer::default()))
    }

    async fn drain(stream: &mut ReplyStream) -> (Vec<u8>, Vec<Error>) {
        let mut bytes = Vec::new();
        let mut errors = Vec::new();
        while let Some(item) = stream.next().await {
            match item {
                Ok(chunk) => bytes.extend_from_slice(&chunk),
                Err(e) => errors.push(e),
            }
        }
        (bytes, errors)
    }

    #[tokio::test]
    async fn test_bytes_pass_through_and_reply_is_stored() {
        for size in [1, 3, 7, 64, PARIS.len()] {
            let store = Arc::new(MemoryConversationStore::new());
            let mut reply = reconstructor(&store)
                .wrap(pending("s1"), chunked(PARIS, size))
                .unwrap();

            let (bytes, errors) = drain(&mut reply).await;
            assert_eq!(bytes, PARIS.as_bytes());
            assert!(errors.is_empty());

            let stored = store.get("s1").await.unwrap().unwrap();
            let answer = &stored.messages[1];
            assert_eq!(answer.content, "The capital of France is Paris.");
            assert!(answer.token.is_some());
            assert!(answer.created.is_some());
            assert_eq!(stored.total_tokens, u64::from(answer.token.unwrap()));
            assert_eq!(store.put_count(), 1, "chunk size {size}");
        }
    }

    #[tokio::test]
    async fn test_finalizes_once_when_dropped_after_sentinel() {
        let store = Arc::new(MemoryConversationStore::new());
        let mut reply = reconstructor(&store).wrap(pending("s1"), chunked(PARIS, 16)).unwrap();
        let completion = reply.completion();

        // Read until the sentinel chunk has gone through, then close
        while !reply.is_finalizing() {
            reply.next().await.unwrap().unwrap();
        }
        drop(reply);

        assert!(matches!(completion.wait().await, TurnOutcome::Persisted(_)));
        assert_eq!(store.put_count(), 1);
    }

    #[tokio::test]
    async fn test_end_without_sentinel_flushes_trailing_line() {
        let body = "data: {\"choices\":[{\"delta\":{\"content\":\"Par\"}}]}\n\n\
                    data: {\"choices\":[{\"delta\":{\"content\":\"is\"}}]}";
        let store = Arc::new(MemoryConversationStore::new());
        let mut reply = reconstructor(&store).wrap(pending("s1"), chunked(body, 5)).unwrap();
        let completion = reply.completion();

        drain(&mut reply).await;
        drop(reply);

        assert_eq!(store.get("s1").await.unwrap().unwrap().messages[1].content, "Paris");
        assert!(matches!(completion.wait().await, TurnOutcome::Persisted(_)));
        assert_eq!(store.put_count(), 1);
    }

    #[tokio::test]
    async fn test_error_before_content_stores_nothing() {
        let store = Arc::new(MemoryConversationStore::new());
        let source: ByteStream = Box::pin(stream::iter(vec![Err::<Bytes, _>(ProviderError::StreamError {
            provider: "openai".to_string(),
            message: "connection reset".to_string(),
        })]));

        let mut reply = reconstructor(&store).wrap(pending("s1"), source).unwrap();
        let completion = reply.completion();

        let (bytes, errors) = drain(&mut reply).await;
        assert!(bytes.is_empty());
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], Error::Provider(ProviderError::StreamError { .. })));

        assert_eq!(completion.wait().await, TurnOutcome::Abandoned);
        assert!(reply.record().messages.is_empty());
        assert_eq!(store.put_count(), 0);
    }

    #[tokio::test]
    async fn test_error_after_content_keeps_partial_reply() {
        let store = Arc::new(MemoryConversationStore::new());
        let source: ByteStream = Box::pin(stream::iter(vec![
            Ok(Bytes::from_static(
                b"data: {\"choices\":[{\"delta\":{\"content\":\"The capital\"}}]}\n\n",
            )),
            Err(ProviderError::StreamError {
                provider: "openai".to_string(),
                message: "connection reset".to_string(),
            }),
        ]));

        let mut reply = reconstructor(&store).wrap(pending("s1"), source).unwrap();
        let (_, errors) = drain(&mut reply).await;
        assert_eq!(errors.len(), 1);

        let stored = store.get("s1").await.unwrap().unwrap();
        assert_eq!(stored.messages[1].content, "The capital");
        assert_eq!(store.put_count(), 1);
    }

    #[tokio::test]
    async fn test_close_mid_stream_stores_partial_reply() {
        let store = Arc::new(MemoryConversationStore::new());
        let mut reply = reconstructor(&store).wrap(pending("s1"), chunked(PARIS, 60)).unwrap();
        let completion = reply.completion();

        while reply.content().is_empty() {
            reply.next().await.unwrap().unwrap();
        }
        drop(reply);

        match completion.wait().await {
            TurnOutcome::Persisted(record) => {
                assert!(record.messages[1].content.starts_with("The capital"));
                assert!(record.messages[1].token.is_some());
            }
            other => panic!("expected Persisted, got {other:?}"),
        }
        assert_eq!(store.put_count(), 1);
    }

    #[tokio::test]
    async fn test_close_before_content_stores_nothing() {
        let store = Arc::new(MemoryConversationStore::new());
        let reply = reconstructor(&store).wrap(pending("s1"), chunked(PARIS, 8)).unwrap();
        let completion = reply.completion();

        drop(reply);

        assert_eq!(completion.wait().await, TurnOutcome::Abandoned);
        assert_eq!(store.put_count(), 0);
    }

    fn stream_error() -> ProviderError {
        ProviderError::StreamError {
            provider: "openai".to_string(),
            message: "connection reset".to_string(),
        }
    }

    #[tokio::test]
    async fn test_error_after_empty_delta_stores_nothing() {
        let store = Arc::new(MemoryConversationStore::new());
        let source: ByteStream = Box::pin(stream::iter(vec![
            Ok(Bytes::from_static(
                b"data: {\"choices\":[{\"delta\":{\"role\":\"assistant\",\"content\":\"\"}}]}\n\n",
            )),
            Err(stream_error()),
        ]));

        let mut reply = reconstructor(&store).wrap(pending("s1"), source).unwrap();
        let completion = reply.completion();

        let (bytes, errors) = drain(&mut reply).await;
        assert!(!bytes.is_empty());
        assert_eq!(errors.len(), 1);

        assert_eq!(completion.wait().await, TurnOutcome::Abandoned);
        assert!(store.get("s1").await.unwrap().is_none());
        assert_eq!(store.put_count(), 0);
    }

    #[tokio::test]
    async fn test_error_after_keep_alive_and_role_stores_nothing() {
        let store = Arc::new(MemoryConversationStore::new());
        let source: ByteStream = Box::pin(stream::iter(vec![
            Ok(Bytes::from_static(b": keep-alive\n\n")),
            Ok(Bytes::from_static(
                b"data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
            )),
            Err(stream_error()),
        ]));

        let mut reply = reconstructor(&store).wrap(pending("s1"), source).unwrap();
        let completion = reply.completion();
        drain(&mut reply).await;

        assert_eq!(completion.wait().await, TurnOutcome::Abandoned);
        assert_eq!(store.put_count(), 0);
    }

    #[tokio::test]
    async fn test_close_after_empty_delta_stores_nothing() {
        let store = Arc::new(MemoryConversationStore::new());
        let source: ByteStream = Box::pin(stream::iter(vec![
            Ok::<_, ProviderError>(Bytes::from_static(b": keep-alive\n\n")),
            Ok(Bytes::from_static(
                b"data: {\"choices\":[{\"delta\":{\"role\":\"assistant\",\"content\":\"\"}}]}\n\n",
            )),
            Ok(Bytes::from_static(
                b"data: {\"choices\":[{\"delta\":{\"content\":\"Paris.\"}}]}\n\n",
            )),
        ]));

        let mut reply = reconstructor(&store).wrap(pending("s1"), source).unwrap();
        let completion = reply.completion();

        reply.next().await.unwrap().unwrap();
        reply.next().await.unwrap().unwrap();
        assert!(reply.content().is_empty());
        assert!(!reply.is_finalizing());
        drop(reply);

        assert_eq!(completion.wait().await, TurnOutcome::Abandoned);
        assert_eq!(store.put_count(), 0);
    }

    #[test]
    fn test_finalizes_inline_without_runtime() {
        let store = Arc::new(MemoryConversationStore::new());
        let mut reply = reconstructor(&store).wrap(pending("s1"), chunked(PARIS, 16)).unwrap();
        let completion = reply.completion();

        let (bytes, errors) = futures::executor::block_on(drain(&mut reply));
        assert_eq!(bytes, PARIS.as_bytes());
        assert!(errors.is_empty());
        drop(reply);

        assert!(matches!(completion.outcome(), TurnOutcome::Persisted(_)));
        assert_eq!(store.put_count(), 1);
    }

    #[tokio::test]
    async fn test_callback_runs_once_with_stored_record() {
        let store = Arc::new(MemoryConversationStore::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(None));

        let callback: CompletionCallback = {
            let calls = calls.clone();
            let seen = seen.clone();
            Box::new(move |record| {
                calls.fetch_add(1, Ordering::SeqCst);
                *seen.lock() = Some(record);
            })
        };

        let mut reply = reconstructor(&store)
            .on_complete(Some(callback))
            .wrap(pending("s1"), chunked(PARIS, 10))
            .unwrap();
        drain(&mut reply).await;
        drop(reply);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let seen = seen.lock().clone().unwrap();
        assert_eq!(Some(seen), store.get("s1").await.unwrap());
    }

    #[tokio::test]
    async fn test_follow_up_turn_sets_last_update() {
        let store = Arc::new(MemoryConversationStore::new());
        let mut turn = pending("s1");
        turn.first_turn = false;
        turn.record.total_tokens = 40;

        let mut reply = reconstructor(&store).wrap(turn, chunked(PARIS, 32)).unwrap();
        drain(&mut reply).await;

        let stored = store.get("s1").await.unwrap().unwrap();
        assert!(stored.last_update.is_some());
        assert_eq!(stored.total_tokens, 40 + u64::from(stored.messages[1].token.unwrap()));
    }

    #[test]
    fn test_wrap_requires_placeholder() {
        let store = Arc::new(MemoryConversationStore::new());
        let turn = PendingTurn {
            session_id: "s1".to_string(),
            model: "gpt-3.5-turbo".to_string(),
            record: ConversationRecord::new("s1"),
            first_turn: true,
        };
        let source: ByteStream =
            Box::pin(stream::empty::<std::result::Result<Bytes, ProviderError>>());
        assert!(reconstructor(&store).wrap(turn, source).is_err());
    }
}
