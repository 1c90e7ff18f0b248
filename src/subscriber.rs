//!
//! Subscriber turning topic partitions into a stream of ackable messages.
//!
//! Each `subscribe` call owns one [`Subscription`]. Consumption runs either directly over every
//! partition of the topic or through a consumer group, and is restarted after the transport drops
//! until the subscriber is closed or the caller cancels the subscription.
//!
use crate::config::{SubscriberConfig, TransportTuning, NO_SLEEP};
use crate::delivery::{self, Handoff, Subscription};
use crate::error::{ClientError, Result};
use crate::handler::MessageHandler;
use crate::marshal::Unmarshaler;
use crate::transport::{
    Claim, ClaimHandler, Client, Connector, ConsumerGroup, GroupSession, PartitionConsumer,
    TransportError,
};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Newest offset of every partition of a topic.
pub type PartitionOffset = BTreeMap<i32, i64>;

pub struct Subscriber {
    inner: Arc<Inner>,
}

struct Inner {
    config: SubscriberConfig,
    unmarshaler: Arc<dyn Unmarshaler>,
    tuning: TransportTuning,
    nack_resend_sleep: Duration,
    reconnect_retry_sleep: Duration,
    connector: Arc<dyn Connector>,
    closing: CancellationToken,
    subscriptions: TaskTracker,
    closed: AtomicBool,
    subscriber_uuid: String,
}

impl Subscriber {
    /// Validates `config`. No connection is opened until the first operation needs one.
    ///
    /// # Errors
    /// Raise ClientError::MissingEndpoints or ClientError::MissingUnmarshaler on invalid config.
    pub fn new(mut config: SubscriberConfig, connector: Arc<dyn Connector>) -> Result<Self> {
        config.set_defaults();
        config.validate()?;

        let unmarshaler = config
            .unmarshaler
            .clone()
            .ok_or(ClientError::MissingUnmarshaler)?;
        let tuning = config
            .tuning
            .clone()
            .unwrap_or_else(TransportTuning::subscriber_default);
        let nack_resend_sleep = config.nack_resend_sleep.unwrap_or(NO_SLEEP);
        let reconnect_retry_sleep = config.reconnect_retry_sleep.unwrap_or(NO_SLEEP);

        Ok(Subscriber {
            inner: Arc::new(Inner {
                config,
                unmarshaler,
                tuning,
                nack_resend_sleep,
                reconnect_retry_sleep,
                connector,
                closing: CancellationToken::new(),
                subscriptions: TaskTracker::new(),
                closed: AtomicBool::new(false),
                subscriber_uuid: uuid::Uuid::new_v4().to_string(),
            }),
        })
    }

    /// Starts consuming `topic` and returns the subscription messages are delivered on.
    ///
    /// Every message must be acked or nacked; a nacked message is delivered again and the next
    /// message of its partition waits until it is acked. A message is only handed over while
    /// [`Subscription::recv`] is waiting for it. The subscription ends once `ctx` is cancelled or
    /// the subscriber is closed, and nothing is delivered after that.
    ///
    /// # Errors
    /// Raise ClientError::SubscriberClosed after [`Subscriber::close`], and the transport error of
    /// the first consumption attempt. Later failures are retried in the background.
    pub async fn subscribe(
        &self,
        ctx: CancellationToken,
        topic: &str,
    ) -> Result<Subscription> {
        // Registered before the closed check so that close() cannot miss this subscription.
        let registration = self.inner.subscriptions.token();
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(ClientError::SubscriberClosed);
        }

        let span = info_span!(
            "subscription",
            topic,
            consumer_group = %self.inner.config.consumer_group,
            consumer_uuid = %uuid::Uuid::new_v4(),
            subscriber_uuid = %self.inner.subscriber_uuid,
        );
        info!(parent: &span, "Subscribing to topic");

        let (output, messages) = delivery::channel();
        let consumed = self
            .inner
            .consume_messages(&ctx, topic, &output)
            .instrument(span.clone())
            .await?;

        let inner = Arc::clone(&self.inner);
        let topic = topic.to_owned();
        tokio::spawn(
            async move {
                inner.handle_reconnects(ctx, topic, output, consumed).await;
                drop(registration);
            }
            .instrument(span),
        );

        Ok(messages)
    }

    /// Creates `topic` with the configured topic details.
    ///
    /// # Errors
    /// Raise ClientError::MissingTopicDetails if no details are configured.
    pub async fn subscribe_initialize(&self, topic: &str) -> Result<()> {
        self.ensure_open()?;
        let detail = self
            .inner
            .config
            .initialize_topic_details
            .as_ref()
            .ok_or(ClientError::MissingTopicDetails)?;

        let admin = self
            .inner
            .connector
            .admin(&self.inner.config.endpoints, &self.inner.tuning)
            .await
            .map_err(|e| ClientError::transport("cannot create cluster admin", e))?;

        let created = admin
            .create_topic(topic, detail, false)
            .await
            .map_err(|e| ClientError::transport("cannot create topic", e));
        let closed = admin.close().await;
        ClientError::combine_close(created, closed, "cannot close cluster admin")?;

        info!(topic, "Created topic");
        Ok(())
    }

    /// Reads the newest offset of every partition of `topic`.
    pub async fn partition_offset(&self, topic: &str) -> Result<PartitionOffset> {
        self.ensure_open()?;
        let client = self
            .inner
            .connector
            .client(&self.inner.config.endpoints, &self.inner.tuning)
            .await
            .map_err(|e| ClientError::transport("cannot create client", e))?;

        let offsets = newest_offsets(client.as_ref(), topic).await;
        let closed = client.close().await;
        ClientError::combine_close(offsets, closed, "cannot close client")
    }

    /// Stops every subscription and waits until all of them have ended.
    ///
    /// Messages delivered but not yet acked are abandoned. Calling it again only waits.
    pub async fn close(&self) -> Result<()> {
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            self.inner.closing.cancel();
            self.inner.subscriptions.close();
        }
        self.inner.subscriptions.wait().await;
        debug!(subscriber_uuid = %self.inner.subscriber_uuid, "Subscriber closed");
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(ClientError::SubscriberClosed);
        }
        Ok(())
    }
}

async fn newest_offsets(client: &dyn Client, topic: &str) -> Result<PartitionOffset> {
    let partitions = client
        .partitions(topic)
        .await
        .map_err(|e| ClientError::transport("cannot get topic partitions", e))?;

    let mut offsets = PartitionOffset::new();
    for partition in partitions {
        let offset = client
            .newest_offset(topic, partition)
            .await
            .map_err(|e| ClientError::transport("cannot get partition offset", e))?;
        offsets.insert(partition, offset);
    }
    Ok(offsets)
}

impl Inner {
    fn message_handler(&self, output: &Handoff) -> MessageHandler {
        MessageHandler {
            output: output.clone(),
            unmarshaler: Arc::clone(&self.unmarshaler),
            nack_resend_sleep: self.nack_resend_sleep,
            closing: self.closing.clone(),
        }
    }

    /// Starts one consumption cycle. The returned task ends when every partition consumer of the
    /// cycle has stopped and the client is closed.
    async fn consume_messages(
        &self,
        ctx: &CancellationToken,
        topic: &str,
        output: &Handoff,
    ) -> Result<JoinHandle<()>> {
        info!("Starting consuming");

        let client: Arc<dyn Client> = Arc::from(
            self.connector
                .client(&self.config.endpoints, &self.tuning)
                .await
                .map_err(|e| ClientError::transport("cannot create client", e))?,
        );

        let consume_ctx = ctx.child_token();
        {
            let closing = self.closing.clone();
            let consume_ctx = consume_ctx.clone();
            tokio::spawn(
                async move {
                    tokio::select! {
                        _ = closing.cancelled() => {
                            debug!("Closing subscriber, cancelling consume");
                            consume_ctx.cancel();
                        }
                        _ = consume_ctx.cancelled() => {}
                    }
                }
                .in_current_span(),
            );
        }

        let started = if self.config.consumer_group.is_empty() {
            self.consume_partitions(&consume_ctx, client.as_ref(), topic, output)
                .await
        } else {
            self.consume_group(&consume_ctx, client.as_ref(), topic, output)
                .await
        };

        let consumed = match started {
            Ok(consumed) => consumed,
            Err(e) => {
                consume_ctx.cancel();
                if let Err(close) = client.close().await {
                    warn!(error = %close, "Cannot close client");
                }
                return Err(e);
            }
        };

        Ok(tokio::spawn(
            async move {
                if let Err(e) = consumed.await {
                    error!(error = %e, "Consumer task failed");
                }
                consume_ctx.cancel();
                match client.close().await {
                    Ok(()) => debug!("Client closed"),
                    Err(e) => warn!(error = %e, "Cannot close client"),
                }
            }
            .in_current_span(),
        ))
    }

    async fn consume_partitions(
        &self,
        ctx: &CancellationToken,
        client: &dyn Client,
        topic: &str,
        output: &Handoff,
    ) -> Result<JoinHandle<()>> {
        let partitions = client
            .partitions(topic)
            .await
            .map_err(|e| ClientError::transport("cannot get partitions", e))?;

        // Dropping the set on error aborts the consumers started so far.
        let mut consumers = JoinSet::new();
        for partition in partitions {
            let consumer = client
                .consume_partition(topic, partition, self.tuning.initial_offset)
                .await
                .map_err(|e| ClientError::transport("failed to start consumer for partition", e))?;

            let span = tracing::debug_span!("partition", partition);
            consumers.spawn(
                consume_partition(
                    ctx.clone(),
                    self.closing.clone(),
                    consumer,
                    self.message_handler(output),
                )
                .instrument(span),
            );
        }

        Ok(tokio::spawn(
            async move { while consumers.join_next().await.is_some() {} }.in_current_span(),
        ))
    }

    async fn consume_group(
        &self,
        ctx: &CancellationToken,
        client: &dyn Client,
        topic: &str,
        output: &Handoff,
    ) -> Result<JoinHandle<()>> {
        let group: Arc<dyn ConsumerGroup> = Arc::from(
            client
                .consumer_group(&self.config.consumer_group)
                .await
                .map_err(|e| ClientError::transport("cannot create consumer group client", e))?,
        );

        let errors_done = CancellationToken::new();
        let drain = group.take_errors().map(|errors| {
            tokio::spawn(log_group_errors(errors, errors_done.clone()).in_current_span())
        });

        let handler: Arc<dyn ClaimHandler> = Arc::new(GroupClaimHandler {
            ctx: ctx.clone(),
            closing: self.closing.clone(),
            messages: self.message_handler(output),
        });
        let ctx = ctx.clone();
        let topics = vec![topic.to_owned()];

        Ok(tokio::spawn(
            async move {
                match group.consume(&topics, handler, ctx).await {
                    Ok(()) => debug!("Group consume stopped"),
                    Err(e) => error!(error = %e, "Group consume error"),
                }
                errors_done.cancel();
                if let Some(drain) = drain {
                    let _ = drain.await;
                }
                if let Err(e) = group.close().await {
                    warn!(error = %e, "Cannot close consumer group");
                }
                info!("Consuming done");
            }
            .in_current_span(),
        ))
    }

    /// Waits for the running consumption cycle and starts the next one until the subscription
    /// ends. Dropping `output` here ends the caller's subscription.
    async fn handle_reconnects(
        &self,
        ctx: CancellationToken,
        topic: String,
        output: Handoff,
        consumed: JoinHandle<()>,
    ) {
        let mut consumed = Some(consumed);
        loop {
            if let Some(running) = consumed.take() {
                if let Err(e) = running.await {
                    error!(error = %e, "Consumption task failed");
                }
                debug!("Consumption stopped");
            }

            if self.closing.is_cancelled() {
                debug!("Closing subscriber, no reconnect needed");
                return;
            }
            if ctx.is_cancelled() {
                debug!("Ctx cancelled, no reconnect needed");
                return;
            }
            if output.is_closed() {
                debug!("Subscription dropped, no reconnect needed");
                return;
            }

            if !self.reconnect_backoff(&ctx).await {
                debug!("Cancelled while waiting to reconnect");
                return;
            }

            info!("Reconnecting consumer");
            match self.consume_messages(&ctx, &topic, &output).await {
                Ok(running) => consumed = Some(running),
                Err(e) => error!(error = %e, "Cannot reconnect messages consumer"),
            }
        }
    }

    /// Returns `false` if the subscription ended during the sleep.
    async fn reconnect_backoff(&self, ctx: &CancellationToken) -> bool {
        if self.reconnect_retry_sleep == NO_SLEEP {
            return true;
        }
        tokio::select! {
            _ = tokio::time::sleep(self.reconnect_retry_sleep) => true,
            _ = self.closing.cancelled() => false,
            _ = ctx.cancelled() => false,
        }
    }
}

async fn consume_partition(
    ctx: CancellationToken,
    closing: CancellationToken,
    mut consumer: PartitionConsumer,
    messages: MessageHandler,
) {
    loop {
        tokio::select! {
            record = consumer.records.recv() => match record {
                Some(record) => {
                    if let Err(e) = messages.process_record(&ctx, &record, None).await {
                        error!(error = %e, "Cannot process message, stopping partition consumer");
                        break;
                    }
                }
                None => {
                    debug!("Partition stream closed");
                    break;
                }
            },
            _ = closing.cancelled() => {
                debug!("Subscriber is closing, stopping partition consumer");
                break;
            }
            _ = ctx.cancelled() => {
                debug!("Ctx cancelled, stopping partition consumer");
                break;
            }
        }
    }
    consumer.close();
    debug!("Partition consumer stopped");
}

async fn log_group_errors(mut errors: mpsc::Receiver<TransportError>, done: CancellationToken) {
    loop {
        tokio::select! {
            received = errors.recv() => match received {
                Some(e) => error!(error = %e, "Consumer group error"),
                None => return,
            },
            _ = done.cancelled() => return,
        }
    }
}

struct GroupClaimHandler {
    ctx: CancellationToken,
    closing: CancellationToken,
    messages: MessageHandler,
}

impl GroupClaimHandler {
    async fn run(&self, session: &dyn GroupSession, claim: &mut Claim) -> Result<()> {
        debug!("Consuming claim");
        loop {
            tokio::select! {
                record = claim.records.recv() => match record {
                    Some(record) => {
                        self.messages
                            .process_record(&self.ctx, &record, Some(session))
                            .await?;
                    }
                    None => {
                        debug!("Claim records closed");
                        return Ok(());
                    }
                },
                _ = self.closing.cancelled() => {
                    debug!("Subscriber is closing, stopping claim");
                    return Ok(());
                }
                _ = self.ctx.cancelled() => {
                    debug!("Ctx cancelled, stopping claim");
                    return Ok(());
                }
                _ = session.cancellation().cancelled() => {
                    debug!("Session ended, stopping claim");
                    return Ok(());
                }
            }
        }
    }
}

#[async_trait]
impl ClaimHandler for GroupClaimHandler {
    async fn consume_claim(&self, session: Arc<dyn GroupSession>, mut claim: Claim) -> Result<()> {
        let span = tracing::debug_span!(
            "claim",
            partition = claim.partition,
            initial_offset = claim.initial_offset,
            member_id = session.member_id(),
            generation = session.generation_id(),
        );
        let result = self
            .run(session.as_ref(), &mut claim)
            .instrument(span)
            .await;
        if let Err(e) = &result {
            error!(error = %e, "Cannot process message, stopping claim");
        }
        result
    }
}
