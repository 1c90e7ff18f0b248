//!
//! Per-record handling shared by direct partition consumers and group claims.
//!
use crate::config::NO_SLEEP;
use crate::context::MessageContext;
use crate::delivery::Handoff;
use crate::error::{ClientError, Result};
use crate::marshal::Unmarshaler;
use crate::message::{AckState, Message};
use crate::transport::{ConsumerRecord, GroupSession};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Clone)]
pub(crate) struct MessageHandler {
    pub(crate) output: Handoff,
    pub(crate) unmarshaler: Arc<dyn Unmarshaler>,
    pub(crate) nack_resend_sleep: Duration,
    pub(crate) closing: CancellationToken,
}

/// Resolves when the group session ends; never for direct partition consumers.
async fn session_ended(session: Option<&dyn GroupSession>) {
    match session {
        Some(session) => session.cancellation().cancelled().await,
        None => std::future::pending().await,
    }
}

impl MessageHandler {
    /// Hands one record to the consumer until it is acked.
    ///
    /// Returns `Ok` when the record was acked or discarded because of shutdown. Returns `Err` when
    /// the record cannot be decoded or the consumer dropped its subscription; the caller must stop
    /// consuming its partition in both cases.
    pub(crate) async fn process_record(
        &self,
        ctx: &CancellationToken,
        record: &ConsumerRecord,
        session: Option<&dyn GroupSession>,
    ) -> Result<()> {
        debug!(
            partition = record.partition,
            offset = record.offset,
            "Received message"
        );

        let template = self
            .unmarshaler
            .unmarshal(record)
            .map_err(|e| match e {
                ClientError::Unmarshal(_) => e,
                other => ClientError::Unmarshal(Box::new(other)),
            })?;

        let message_ctx = ctx.child_token();
        let _cancel_on_exit = message_ctx.clone().drop_guard();
        let context = MessageContext::new(
            record.partition,
            record.offset,
            record.timestamp,
            template.uuid.clone(),
            message_ctx.clone(),
        );
        let uuid = template.uuid.as_str();

        loop {
            let mut message = template.copy();
            message.set_context(context.clone());
            let mut ack = message.watch_ack();

            tokio::select! {
                // Shutdown wins over a consumer that is waiting at the same time.
                biased;
                _ = self.closing.cancelled() => {
                    warn!(message_uuid = uuid, "Closing, message discarded");
                    return Ok(());
                }
                _ = message_ctx.cancelled() => {
                    warn!(message_uuid = uuid, "Ctx cancelled before sent to consumer");
                    return Ok(());
                }
                _ = session_ended(session) => {
                    warn!(message_uuid = uuid, "Session ended before sent to consumer");
                    return Ok(());
                }
                sent = self.output.send(message) => {
                    if sent.is_err() {
                        warn!(message_uuid = uuid, "Subscription dropped, message discarded");
                        return Err(ClientError::OutputDropped);
                    }
                    debug!(message_uuid = uuid, "Message sent to consumer");
                }
            }

            let state = tokio::select! {
                // A message dropped without a verdict can never be acked; resend it.
                state = ack.wait_for(|state| *state != AckState::Pending) => {
                    state.map(|state| *state).unwrap_or(AckState::Nacked)
                }
                _ = self.closing.cancelled() => {
                    warn!(message_uuid = uuid, "Closing, message discarded before ack");
                    return Ok(());
                }
                _ = message_ctx.cancelled() => {
                    warn!(message_uuid = uuid, "Ctx cancelled before ack");
                    return Ok(());
                }
                _ = session_ended(session) => {
                    warn!(message_uuid = uuid, "Session ended before ack");
                    return Ok(());
                }
            };

            if state == AckState::Acked {
                if let Some(session) = session {
                    session.mark_record(record, "");
                }
                debug!(message_uuid = uuid, "Message acked");
                return Ok(());
            }

            debug!(message_uuid = uuid, "Message nacked");
            if self.nack_resend_sleep != NO_SLEEP {
                tokio::time::sleep(self.nack_resend_sleep).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery;
    use crate::marshal::{DefaultMarshaler, Marshaler};
    use bytes::Bytes;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::{timeout, Instant};

    struct CountingSession {
        marked: AtomicUsize,
        cancellation: CancellationToken,
    }

    impl GroupSession for CountingSession {
        fn mark_record(&self, _record: &ConsumerRecord, _metadata: &str) {
            self.marked.fetch_add(1, Ordering::SeqCst);
        }

        fn member_id(&self) -> &str {
            "member-1"
        }

        fn generation_id(&self) -> i32 {
            1
        }

        fn cancellation(&self) -> &CancellationToken {
            &self.cancellation
        }
    }

    fn record(uuid: &str, offset: i64) -> ConsumerRecord {
        let message = Message::new(uuid, "payload").with_metadata("k", "v");
        let produced = DefaultMarshaler.marshal("orders", &message).unwrap();
        ConsumerRecord {
            topic: produced.topic,
            partition: 3,
            offset,
            timestamp: Utc::now(),
            key: None,
            headers: produced.headers,
            value: produced.value,
        }
    }

    fn handler(output: Handoff, closing: CancellationToken) -> MessageHandler {
        MessageHandler {
            output,
            unmarshaler: Arc::new(DefaultMarshaler),
            nack_resend_sleep: NO_SLEEP,
            closing,
        }
    }

    #[tokio::test]
    async fn test_nack_resends_copy_and_ack_marks_once() {
        let (tx, mut rx) = delivery::channel();
        let handler = handler(tx, CancellationToken::new());
        let session = Arc::new(CountingSession {
            marked: AtomicUsize::new(0),
            cancellation: CancellationToken::new(),
        });
        let ctx = CancellationToken::new();

        let worker = {
            let session = Arc::clone(&session);
            let ctx = ctx.clone();
            tokio::spawn(async move {
                let record = record("m1", 41);
                handler
                    .process_record(&ctx, &record, Some(session.as_ref() as &dyn GroupSession))
                    .await
            })
        };

        let first = timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        let context = first.context().unwrap();
        assert_eq!(context.partition(), 3);
        assert_eq!(context.offset(), 41);
        assert_eq!(context.message_uuid(), "m1");
        assert!(first.nack());
        assert_eq!(session.marked.load(Ordering::SeqCst), 0);

        let second = timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        assert_eq!(second.uuid, "m1");
        assert_eq!(second.payload, Bytes::from_static(b"payload"));
        assert_eq!(second.metadata.get("k"), "v");
        assert_eq!(second.ack_state(), AckState::Pending);
        assert!(second.ack());

        timeout(Duration::from_secs(1), worker).await.unwrap().unwrap().unwrap();
        assert_eq!(session.marked.load(Ordering::SeqCst), 1);
        assert!(second.context().unwrap().is_cancelled());
    }

    #[tokio::test]
    async fn test_dropped_message_is_redelivered() {
        let (tx, mut rx) = delivery::channel();
        let handler = handler(tx, CancellationToken::new());
        let ctx = CancellationToken::new();
        let worker = tokio::spawn(async move {
            handler.process_record(&ctx, &record("m1", 0), None).await
        });

        let first = timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        drop(first);
        let second = timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        assert_eq!(second.uuid, "m1");
        second.ack();
        timeout(Duration::from_secs(1), worker).await.unwrap().unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_closing_discards_pending_message() {
        let (tx, mut rx) = delivery::channel();
        let closing = CancellationToken::new();
        let handler = handler(tx, closing.clone());
        let ctx = CancellationToken::new();
        let worker = tokio::spawn(async move {
            handler.process_record(&ctx, &record("m1", 0), None).await
        });

        let delivered = timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        closing.cancel();
        timeout(Duration::from_secs(1), worker).await.unwrap().unwrap().unwrap();
        assert!(delivered.context().unwrap().is_cancelled());
        assert_eq!(delivered.ack_state(), AckState::Pending);
    }

    #[tokio::test]
    async fn test_session_end_discards_unacked_message() {
        let (tx, mut rx) = delivery::channel();
        let handler = handler(tx, CancellationToken::new());
        let session = Arc::new(CountingSession {
            marked: AtomicUsize::new(0),
            cancellation: CancellationToken::new(),
        });
        let ctx = CancellationToken::new();
        let worker = {
            let session = Arc::clone(&session);
            tokio::spawn(async move {
                handler
                    .process_record(&ctx, &record("m1", 0), Some(session.as_ref() as &dyn GroupSession))
                    .await
            })
        };

        let delivered = timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        session.cancellation.cancel();
        timeout(Duration::from_secs(1), worker).await.unwrap().unwrap().unwrap();
        delivered.ack();
        assert_eq!(session.marked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unmarshal_failure_is_returned() {
        struct Failing;
        impl Unmarshaler for Failing {
            fn unmarshal(&self, _record: &ConsumerRecord) -> Result<Message> {
                Err(ClientError::Unmarshal("corrupt".into()))
            }
        }

        let (tx, _rx) = delivery::channel();
        let handler = MessageHandler {
            output: tx,
            unmarshaler: Arc::new(Failing),
            nack_resend_sleep: NO_SLEEP,
            closing: CancellationToken::new(),
        };
        let result = handler
            .process_record(&CancellationToken::new(), &record("m1", 0), None)
            .await;
        let err = result.unwrap_err();
        assert!(matches!(err, ClientError::Unmarshal(_)));
        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("corrupt"));
    }

    #[tokio::test]
    async fn test_foreign_unmarshal_error_is_wrapped() {
        struct Reserved;
        impl Unmarshaler for Reserved {
            fn unmarshal(&self, _record: &ConsumerRecord) -> Result<Message> {
                Err(ClientError::ReservedMetadata("_message_uuid".to_owned()))
            }
        }

        let (tx, _rx) = delivery::channel();
        let handler = MessageHandler {
            output: tx,
            unmarshaler: Arc::new(Reserved),
            nack_resend_sleep: NO_SLEEP,
            closing: CancellationToken::new(),
        };
        let err = handler
            .process_record(&CancellationToken::new(), &record("m1", 0), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Unmarshal(_)));
        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(
            source.as_deref(),
            Some("metadata `_message_uuid` is reserved for message UUID")
        );
    }

    #[tokio::test]
    async fn test_nack_resend_waits_configured_interval() {
        let (tx, mut rx) = delivery::channel();
        let mut handler = handler(tx, CancellationToken::new());
        handler.nack_resend_sleep = Duration::from_millis(150);
        let ctx = CancellationToken::new();
        let worker = tokio::spawn(async move {
            handler.process_record(&ctx, &record("m1", 0), None).await
        });

        let first = timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        let nacked_at = Instant::now();
        first.nack();
        let second = timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        assert!(nacked_at.elapsed() >= Duration::from_millis(150));
        assert_eq!(second.uuid, "m1");
        second.ack();
        timeout(Duration::from_secs(1), worker).await.unwrap().unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_message_not_taken_is_withdrawn_on_cancel() {
        let (tx, mut rx) = delivery::channel();
        let handler = handler(tx, CancellationToken::new());
        let ctx = CancellationToken::new();
        let worker = {
            let ctx = ctx.clone();
            tokio::spawn(async move { handler.process_record(&ctx, &record("m1", 0), None).await })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        ctx.cancel();
        timeout(Duration::from_secs(1), worker).await.unwrap().unwrap().unwrap();
        // The only worker is gone, so nothing was left behind for the consumer.
        let next = timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        assert!(next.is_none());
    }

    #[tokio::test]
    async fn test_dropped_output_stops_processing() {
        let (tx, rx) = delivery::channel();
        drop(rx);
        let handler = handler(tx, CancellationToken::new());
        let result = handler
            .process_record(&CancellationToken::new(), &record("m1", 0), None)
            .await;
        assert!(matches!(result, Err(ClientError::OutputDropped)));
    }
}
