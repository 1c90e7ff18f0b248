//!
//! In-process transport implementing every trait of [`crate::transport`].
//!
//! Topics are vectors of append-only partition logs. Consumer groups assign partitions to members
//! by position (`partition % members == index`) and every membership change ends the running
//! sessions, the way a real rebalance revokes claims. Connectivity can be switched off and live
//! connections dropped to exercise reconnect paths.
//!
use crate::config::{InitialOffset, TopicDetail, TransportTuning};
use crate::transport::{
    Claim, ClaimHandler, Client, ClusterAdmin, Connector, ConsumerGroup, ConsumerRecord,
    GroupSession, PartitionConsumer, ProducerRecord, SyncProducer, TransportError,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

const RECORD_BUFFER: usize = 1;
const GROUP_ERROR_BUFFER: usize = 64;

struct Topic {
    partitions: Vec<Vec<ConsumerRecord>>,
    config_entries: BTreeMap<String, String>,
    replication_factor: i16,
    next_partition: usize,
}

impl Topic {
    fn new(num_partitions: usize) -> Self {
        Self {
            partitions: vec![Vec::new(); num_partitions.max(1)],
            config_entries: BTreeMap::new(),
            replication_factor: 1,
            next_partition: 0,
        }
    }
}

#[derive(Default)]
struct Group {
    members: Vec<String>,
    generation: i32,
    rebalance: CancellationToken,
    committed: HashMap<(String, i32), i64>,
    commits: usize,
}

impl Group {
    fn rebalance(&mut self) {
        self.generation += 1;
        self.rebalance.cancel();
        self.rebalance = CancellationToken::new();
    }
}

struct State {
    topics: Mutex<HashMap<String, Topic>>,
    groups: Mutex<HashMap<String, Group>>,
    auto_create_partitions: Option<usize>,
    available: AtomicBool,
    epoch: Mutex<CancellationToken>,
    appended: watch::Sender<u64>,
    failing_sends: AtomicUsize,
    connection_attempts: AtomicUsize,
    live_connections: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl State {
    fn connect(&self) -> Result<CancellationToken, TransportError> {
        self.connection_attempts.fetch_add(1, Ordering::SeqCst);
        if !self.available.load(Ordering::SeqCst) {
            return Err(TransportError::Unavailable(
                "broker refused connection".to_owned(),
            ));
        }
        self.live_connections.fetch_add(1, Ordering::SeqCst);
        Ok(lock(&self.epoch).child_token())
    }

    fn release(&self) {
        self.live_connections.fetch_sub(1, Ordering::SeqCst);
    }

    fn partitions(&self, topic: &str) -> Result<Vec<i32>, TransportError> {
        let topics = lock(&self.topics);
        let topic_data = topics
            .get(topic)
            .ok_or_else(|| TransportError::UnknownTopic(topic.to_owned()))?;
        Ok((0..topic_data.partitions.len() as i32).collect())
    }

    fn log_end(&self, topic: &str, partition: i32) -> Result<i64, TransportError> {
        let topics = lock(&self.topics);
        topics
            .get(topic)
            .ok_or_else(|| TransportError::UnknownTopic(topic.to_owned()))?
            .partitions
            .get(partition as usize)
            .map(|log| log.len() as i64)
            .ok_or_else(|| TransportError::UnknownPartition {
                topic: topic.to_owned(),
                partition,
            })
    }

    fn read_from(&self, topic: &str, partition: i32, offset: i64) -> Vec<ConsumerRecord> {
        let topics = lock(&self.topics);
        topics
            .get(topic)
            .and_then(|t| t.partitions.get(partition as usize))
            .map(|log| log.iter().skip(offset.max(0) as usize).cloned().collect())
            .unwrap_or_default()
    }

    fn append(&self, record: ProducerRecord) -> Result<(i32, i64), TransportError> {
        let appended = {
            let mut topics = lock(&self.topics);
            if !topics.contains_key(&record.topic) {
                match self.auto_create_partitions {
                    Some(partitions) => {
                        topics.insert(record.topic.clone(), Topic::new(partitions));
                    }
                    None => return Err(TransportError::UnknownTopic(record.topic)),
                }
            }
            let topic = topics
                .get_mut(&record.topic)
                .ok_or_else(|| TransportError::UnknownTopic(record.topic.clone()))?;

            let count = topic.partitions.len();
            let partition = match &record.key {
                Some(key) => {
                    let mut hasher = DefaultHasher::new();
                    key.hash(&mut hasher);
                    (hasher.finish() % count as u64) as usize
                }
                None => {
                    let partition = topic.next_partition % count;
                    topic.next_partition = topic.next_partition.wrapping_add(1);
                    partition
                }
            };

            let log = &mut topic.partitions[partition];
            let offset = log.len() as i64;
            log.push(ConsumerRecord {
                topic: record.topic,
                partition: partition as i32,
                offset,
                timestamp: Utc::now(),
                key: record.key,
                headers: record.headers,
                value: record.value,
            });
            (partition as i32, offset)
        };
        self.appended.send_modify(|sequence| *sequence += 1);
        Ok(appended)
    }

    fn initial_offset(
        &self,
        topic: &str,
        partition: i32,
        initial: InitialOffset,
    ) -> Result<i64, TransportError> {
        match initial {
            InitialOffset::Oldest => {
                self.log_end(topic, partition)?;
                Ok(0)
            }
            InitialOffset::Newest => self.log_end(topic, partition),
        }
    }

    /// Streams records of one partition from `offset` into `tx` until `stop` fires.
    fn spawn_feeder(
        self: &Arc<Self>,
        topic: String,
        partition: i32,
        mut offset: i64,
        tx: mpsc::Sender<ConsumerRecord>,
        stop: CancellationToken,
    ) {
        let state = Arc::clone(self);
        tokio::spawn(async move {
            let mut appended = state.appended.subscribe();
            loop {
                appended.borrow_and_update();
                for record in state.read_from(&topic, partition, offset) {
                    tokio::select! {
                        biased;
                        _ = stop.cancelled() => return,
                        sent = tx.send(record) => {
                            if sent.is_err() {
                                return;
                            }
                        }
                    }
                    offset += 1;
                }
                tokio::select! {
                    biased;
                    _ = stop.cancelled() => return,
                    changed = appended.changed() => {
                        if changed.is_err() {
                            return;
                        }
                    }
                }
            }
        });
    }
}

/// Shared handle to an in-process broker. Clones refer to the same broker.
#[derive(Clone)]
pub struct MemoryBroker {
    state: Arc<State>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    /// Creates a broker that auto-creates unknown topics with a single partition on produce.
    pub fn new() -> Self {
        Self::with_auto_create(Some(1))
    }

    /// `None` disables topic auto-creation.
    pub fn with_auto_create(partitions: Option<usize>) -> Self {
        let (appended, _) = watch::channel(0);
        Self {
            state: Arc::new(State {
                topics: Mutex::new(HashMap::new()),
                groups: Mutex::new(HashMap::new()),
                auto_create_partitions: partitions,
                available: AtomicBool::new(true),
                epoch: Mutex::new(CancellationToken::new()),
                appended,
                failing_sends: AtomicUsize::new(0),
                connection_attempts: AtomicUsize::new(0),
                live_connections: AtomicUsize::new(0),
            }),
        }
    }

    pub fn create_topic(&self, topic: &str, partitions: usize) -> Result<(), TransportError> {
        let mut topics = lock(&self.state.topics);
        if topics.contains_key(topic) {
            return Err(TransportError::TopicExists(topic.to_owned()));
        }
        topics.insert(topic.to_owned(), Topic::new(partitions));
        Ok(())
    }

    /// Appends a record as if a remote producer had written it.
    pub fn append(&self, record: ProducerRecord) -> Result<(i32, i64), TransportError> {
        self.state.append(record)
    }

    pub fn records(&self, topic: &str, partition: i32) -> Vec<ConsumerRecord> {
        self.state.read_from(topic, partition, 0)
    }

    pub fn partition_count(&self, topic: &str) -> Option<usize> {
        lock(&self.state.topics)
            .get(topic)
            .map(|t| t.partitions.len())
    }

    pub fn topic_config(&self, topic: &str) -> Option<(i16, BTreeMap<String, String>)> {
        lock(&self.state.topics)
            .get(topic)
            .map(|t| (t.replication_factor, t.config_entries.clone()))
    }

    /// Refuses (`false`) or accepts (`true`) new connections.
    pub fn set_available(&self, available: bool) {
        self.state.available.store(available, Ordering::SeqCst);
    }

    /// Drops every live connection: partition streams end and group sessions fail.
    pub fn disconnect_all(&self) {
        let mut epoch = lock(&self.state.epoch);
        epoch.cancel();
        *epoch = CancellationToken::new();
    }

    /// Makes the next `count` produce calls fail.
    pub fn fail_next_sends(&self, count: usize) {
        self.state.failing_sends.store(count, Ordering::SeqCst);
    }

    /// Ends the running sessions of `group`, forcing members to rejoin.
    pub fn rebalance(&self, group: &str) {
        if let Some(group) = lock(&self.state.groups).get_mut(group) {
            group.rebalance();
        }
    }

    pub fn committed_offset(&self, group: &str, topic: &str, partition: i32) -> Option<i64> {
        lock(&self.state.groups)
            .get(group)
            .and_then(|g| g.committed.get(&(topic.to_owned(), partition)).copied())
    }

    /// Number of `mark_record` calls the group has received.
    pub fn commit_count(&self, group: &str) -> usize {
        lock(&self.state.groups)
            .get(group)
            .map(|g| g.commits)
            .unwrap_or_default()
    }

    pub fn group_members(&self, group: &str) -> usize {
        lock(&self.state.groups)
            .get(group)
            .map(|g| g.members.len())
            .unwrap_or_default()
    }

    pub fn connection_attempts(&self) -> usize {
        self.state.connection_attempts.load(Ordering::SeqCst)
    }

    /// Producers, clients and admins that were opened and not yet closed.
    pub fn live_connections(&self) -> usize {
        self.state.live_connections.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MemoryBroker {
    async fn producer(
        &self,
        _endpoints: &[String],
        _tuning: &TransportTuning,
    ) -> Result<Box<dyn SyncProducer>, TransportError> {
        let connection = self.state.connect()?;
        Ok(Box::new(MemoryProducer {
            state: Arc::clone(&self.state),
            connection,
            closed: false,
        }))
    }

    async fn client(
        &self,
        _endpoints: &[String],
        tuning: &TransportTuning,
    ) -> Result<Box<dyn Client>, TransportError> {
        let connection = self.state.connect()?;
        Ok(Box::new(MemoryClient {
            state: Arc::clone(&self.state),
            connection,
            tuning: tuning.clone(),
            closed: AtomicBool::new(false),
        }))
    }

    async fn admin(
        &self,
        _endpoints: &[String],
        _tuning: &TransportTuning,
    ) -> Result<Box<dyn ClusterAdmin>, TransportError> {
        self.state.connect()?;
        Ok(Box::new(MemoryAdmin {
            state: Arc::clone(&self.state),
            closed: AtomicBool::new(false),
        }))
    }
}

struct MemoryProducer {
    state: Arc<State>,
    connection: CancellationToken,
    closed: bool,
}

#[async_trait]
impl SyncProducer for MemoryProducer {
    async fn send(&mut self, record: ProducerRecord) -> Result<(i32, i64), TransportError> {
        if self.closed || self.connection.is_cancelled() {
            return Err(TransportError::Closed);
        }
        let failing = self
            .state
            .failing_sends
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(TransportError::Other("produce request rejected".to_owned()));
        }
        self.state.append(record)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.closed = true;
        self.state.release();
        Ok(())
    }
}

struct MemoryClient {
    state: Arc<State>,
    connection: CancellationToken,
    tuning: TransportTuning,
    closed: AtomicBool,
}

impl MemoryClient {
    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) || self.connection.is_cancelled() {
            return Err(TransportError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl Client for MemoryClient {
    async fn partitions(&self, topic: &str) -> Result<Vec<i32>, TransportError> {
        self.ensure_open()?;
        self.state.partitions(topic)
    }

    async fn consume_partition(
        &self,
        topic: &str,
        partition: i32,
        initial: InitialOffset,
    ) -> Result<PartitionConsumer, TransportError> {
        self.ensure_open()?;
        let offset = self.state.initial_offset(topic, partition, initial)?;
        let (tx, rx) = mpsc::channel(RECORD_BUFFER);
        let close = self.connection.child_token();
        self.state
            .spawn_feeder(topic.to_owned(), partition, offset, tx, close.clone());
        Ok(PartitionConsumer::new(topic.to_owned(), partition, rx, close))
    }

    async fn consumer_group(&self, group: &str) -> Result<Box<dyn ConsumerGroup>, TransportError> {
        self.ensure_open()?;
        let (errors_tx, errors_rx) = mpsc::channel(GROUP_ERROR_BUFFER);
        Ok(Box::new(MemoryConsumerGroup {
            state: Arc::clone(&self.state),
            group: group.to_owned(),
            member_id: format!("{}-{}", self.tuning.client_id, uuid::Uuid::new_v4()),
            connection: self.connection.clone(),
            initial_offset: self.tuning.initial_offset,
            errors_tx,
            errors_rx: Mutex::new(Some(errors_rx)),
        }))
    }

    async fn newest_offset(&self, topic: &str, partition: i32) -> Result<i64, TransportError> {
        self.ensure_open()?;
        self.state.log_end(topic, partition)
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.connection.cancel();
        self.state.release();
        Ok(())
    }
}

struct MemoryConsumerGroup {
    state: Arc<State>,
    group: String,
    member_id: String,
    connection: CancellationToken,
    initial_offset: InitialOffset,
    errors_tx: mpsc::Sender<TransportError>,
    errors_rx: Mutex<Option<mpsc::Receiver<TransportError>>>,
}

impl MemoryConsumerGroup {
    /// Joins the group and returns this member's claims for the new generation.
    fn join(
        &self,
        topics: &[String],
    ) -> Result<(i32, CancellationToken, Vec<(String, i32, i64)>), TransportError> {
        let mut partitions = Vec::new();
        for topic in topics {
            for partition in self.state.partitions(topic)? {
                partitions.push((topic.clone(), partition));
            }
        }

        let mut groups = lock(&self.state.groups);
        let group = groups.entry(self.group.clone()).or_default();
        if !group.members.contains(&self.member_id) {
            group.members.push(self.member_id.clone());
            group.rebalance();
        }
        let members = group.members.len();
        let index = group
            .members
            .iter()
            .position(|m| m == &self.member_id)
            .unwrap_or_default();

        let mut claims = Vec::new();
        for (topic, partition) in partitions {
            if partition as usize % members != index {
                continue;
            }
            let offset = match group.committed.get(&(topic.clone(), partition)) {
                Some(offset) => *offset,
                None => self
                    .state
                    .initial_offset(&topic, partition, self.initial_offset)?,
            };
            claims.push((topic, partition, offset));
        }
        Ok((group.generation, group.rebalance.clone(), claims))
    }

    fn leave(&self) {
        let mut groups = lock(&self.state.groups);
        if let Some(group) = groups.get_mut(&self.group) {
            if let Some(position) = group.members.iter().position(|m| m == &self.member_id) {
                group.members.remove(position);
                group.rebalance();
            }
        }
    }
}

#[async_trait]
impl ConsumerGroup for MemoryConsumerGroup {
    async fn consume(
        &self,
        topics: &[String],
        handler: Arc<dyn ClaimHandler>,
        cancel: CancellationToken,
    ) -> Result<(), TransportError> {
        if self.connection.is_cancelled() {
            return Err(TransportError::Closed);
        }
        let (generation, rebalance, claims) = self.join(topics)?;

        let session_token = self.connection.child_token();
        {
            let session_token = session_token.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = rebalance.cancelled() => {}
                    _ = session_token.cancelled() => {}
                }
                session_token.cancel();
            });
        }

        let session: Arc<dyn GroupSession> = Arc::new(MemorySession {
            state: Arc::clone(&self.state),
            group: self.group.clone(),
            member_id: self.member_id.clone(),
            generation,
            cancellation: session_token.clone(),
        });

        let mut claim_handlers = JoinSet::new();
        for (topic, partition, offset) in claims {
            let (tx, rx) = mpsc::channel(RECORD_BUFFER);
            self.state
                .spawn_feeder(topic.clone(), partition, offset, tx, session_token.child_token());
            let claim = Claim {
                topic,
                partition,
                initial_offset: offset,
                records: rx,
            };
            let handler = Arc::clone(&handler);
            let session = Arc::clone(&session);
            claim_handlers.spawn(async move { handler.consume_claim(session, claim).await });
        }

        // The session lasts until the first claim handler returns.
        if claim_handlers.is_empty() {
            session_token.cancelled().await;
        }
        while let Some(joined) = claim_handlers.join_next().await {
            session_token.cancel();
            let error = match joined {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => TransportError::Other(e.to_string()),
                Err(e) => TransportError::Other(format!("claim handler panicked: {}", e)),
            };
            let _ = self.errors_tx.try_send(error);
        }

        session_token.cancel();
        if self.connection.is_cancelled() {
            return Err(TransportError::Closed);
        }
        Ok(())
    }

    fn take_errors(&self) -> Option<mpsc::Receiver<TransportError>> {
        lock(&self.errors_rx).take()
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.leave();
        Ok(())
    }
}

struct MemorySession {
    state: Arc<State>,
    group: String,
    member_id: String,
    generation: i32,
    cancellation: CancellationToken,
}

impl GroupSession for MemorySession {
    fn mark_record(&self, record: &ConsumerRecord, _metadata: &str) {
        let mut groups = lock(&self.state.groups);
        let group = groups.entry(self.group.clone()).or_default();
        let next = record.offset + 1;
        let committed = group
            .committed
            .entry((record.topic.clone(), record.partition))
            .or_insert(next);
        if *committed < next {
            *committed = next;
        }
        group.commits += 1;
    }

    fn member_id(&self) -> &str {
        &self.member_id
    }

    fn generation_id(&self) -> i32 {
        self.generation
    }

    fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }
}

struct MemoryAdmin {
    state: Arc<State>,
    closed: AtomicBool,
}

#[async_trait]
impl ClusterAdmin for MemoryAdmin {
    async fn create_topic(
        &self,
        topic: &str,
        detail: &TopicDetail,
        validate_only: bool,
    ) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        if detail.num_partitions <= 0 {
            return Err(TransportError::Other(format!(
                "invalid partition count {}",
                detail.num_partitions
            )));
        }
        let mut topics = lock(&self.state.topics);
        if topics.contains_key(topic) {
            return Err(TransportError::TopicExists(topic.to_owned()));
        }
        if validate_only {
            return Ok(());
        }
        let mut created = Topic::new(detail.num_partitions as usize);
        created.replication_factor = detail.replication_factor;
        created.config_entries = detail.config_entries.clone();
        topics.insert(topic.to_owned(), created);
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.state.release();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::time::Duration;
    use tokio::time::timeout;

    fn record(topic: &str, value: &'static str) -> ProducerRecord {
        ProducerRecord {
            topic: topic.to_owned(),
            key: None,
            headers: Vec::new(),
            value: Bytes::from_static(value.as_bytes()),
        }
    }

    #[tokio::test]
    async fn test_append_round_robins_partitions() -> Result<(), TransportError> {
        let broker = MemoryBroker::new();
        broker.create_topic("orders", 2)?;
        assert_eq!(broker.append(record("orders", "a"))?, (0, 0));
        assert_eq!(broker.append(record("orders", "b"))?, (1, 0));
        assert_eq!(broker.append(record("orders", "c"))?, (0, 1));
        assert_eq!(broker.records("orders", 0).len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_keyed_records_stick_to_partition() -> Result<(), TransportError> {
        let broker = MemoryBroker::new();
        broker.create_topic("orders", 4)?;
        let mut keyed = record("orders", "a");
        keyed.key = Some(Bytes::from_static(b"customer-1"));
        let (first, _) = broker.append(keyed.clone())?;
        let (second, _) = broker.append(keyed)?;
        assert_eq!(first, second);
        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_topic_without_auto_create() {
        let broker = MemoryBroker::with_auto_create(None);
        assert_eq!(
            broker.append(record("missing", "a")),
            Err(TransportError::UnknownTopic("missing".to_owned()))
        );
    }

    #[tokio::test]
    async fn test_partition_consumer_streams_new_records() -> Result<(), Box<dyn std::error::Error>>
    {
        let broker = MemoryBroker::new();
        broker.create_topic("orders", 1)?;
        broker.append(record("orders", "old"))?;

        let tuning = TransportTuning::subscriber_default();
        let client = broker.client(&[], &tuning).await?;
        let mut consumer = client
            .consume_partition("orders", 0, InitialOffset::Newest)
            .await?;
        broker.append(record("orders", "new"))?;

        let received = timeout(Duration::from_secs(1), consumer.records.recv()).await?;
        let received = received.ok_or("stream ended")?;
        assert_eq!(received.value, Bytes::from_static(b"new"));
        assert_eq!(received.offset, 1);

        consumer.close();
        client.close().await?;
        assert_eq!(broker.live_connections(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_disconnect_ends_partition_stream() -> Result<(), Box<dyn std::error::Error>> {
        let broker = MemoryBroker::new();
        broker.create_topic("orders", 1)?;
        let tuning = TransportTuning::subscriber_default();
        let client = broker.client(&[], &tuning).await?;
        let mut consumer = client
            .consume_partition("orders", 0, InitialOffset::Oldest)
            .await?;

        broker.disconnect_all();
        let ended = timeout(Duration::from_secs(1), consumer.records.recv()).await?;
        assert!(ended.is_none());
        assert_eq!(client.partitions("orders").await, Err(TransportError::Closed));
        Ok(())
    }

    #[tokio::test]
    async fn test_unavailable_broker_refuses_connections() {
        let broker = MemoryBroker::new();
        broker.set_available(false);
        let tuning = TransportTuning::subscriber_default();
        assert!(matches!(
            broker.client(&[], &tuning).await,
            Err(TransportError::Unavailable(_))
        ));
        assert_eq!(broker.connection_attempts(), 1);
        assert_eq!(broker.live_connections(), 0);
    }

    #[tokio::test]
    async fn test_admin_creates_topic() -> Result<(), TransportError> {
        let broker = MemoryBroker::new();
        let admin = broker.admin(&[], &TransportTuning::subscriber_default()).await?;
        let detail = TopicDetail {
            num_partitions: 3,
            replication_factor: 2,
            config_entries: BTreeMap::from([("retention.ms".to_owned(), "1000".to_owned())]),
        };
        admin.create_topic("orders", &detail, false).await?;
        assert_eq!(
            admin.create_topic("orders", &detail, false).await,
            Err(TransportError::TopicExists("orders".to_owned()))
        );
        admin.close().await?;

        assert_eq!(broker.partition_count("orders"), Some(3));
        let (replication, entries) = broker.topic_config("orders").unwrap_or_default();
        assert_eq!(replication, 2);
        assert_eq!(entries.get("retention.ms").map(String::as_str), Some("1000"));
        Ok(())
    }
}
