// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! An in-process cluster implementing the group-coordination contract. Every
//! coordinator is the sole member of its group and is assigned all partitions
//! of the subscribed topics.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};
use uuid::Uuid;

use crate::message::{Header, Message, TopicPartition};
use crate::{AppError, AppResult, ConsumerConfig};

use super::{
    Connector, ConsumerGroupClaim, ConsumerGroupHandler, ConsumerGroupSession, GroupCoordinator,
};

#[derive(Debug)]
struct PartitionLog {
    messages: RwLock<Vec<Message>>,
    high_water: watch::Sender<i64>,
}

impl PartitionLog {
    fn new() -> Self {
        let (high_water, _) = watch::channel(0);
        Self {
            messages: RwLock::new(Vec::new()),
            high_water,
        }
    }

    fn append(&self, mut message: Message) -> i64 {
        let mut messages = self.messages.write();
        let offset = messages.len() as i64;
        message.offset = offset;
        messages.push(message);
        self.high_water.send_replace(offset + 1);
        offset
    }

    fn get(&self, offset: i64) -> Option<Message> {
        usize::try_from(offset)
            .ok()
            .and_then(|index| self.messages.read().get(index).cloned())
    }

    fn high_water_mark(&self) -> i64 {
        *self.high_water.borrow()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedOffset {
    /// next offset to consume
    pub offset: i64,
    pub metadata: String,
}

#[derive(Debug)]
struct ClusterInner {
    listeners: HashSet<String>,
    topics: DashMap<String, Vec<Arc<PartitionLog>>>,
    offsets: DashMap<(String, TopicPartition), CommittedOffset>,
    mark_counts: DashMap<(String, TopicPartition), usize>,
    rebalance: watch::Sender<u64>,
    faults: Mutex<VecDeque<String>>,
    closed: Mutex<Vec<(String, Instant)>>,
}

/// Handle to an in-process cluster; clones share state.
#[derive(Debug, Clone)]
pub struct MemoryCluster {
    inner: Arc<ClusterInner>,
}

impl MemoryCluster {
    /// A cluster reachable at the given broker addresses.
    pub fn new<I, S>(listeners: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let (rebalance, _) = watch::channel(0);
        Self {
            inner: Arc::new(ClusterInner {
                listeners: listeners.into_iter().map(Into::into).collect(),
                topics: DashMap::new(),
                offsets: DashMap::new(),
                mark_counts: DashMap::new(),
                rebalance,
                faults: Mutex::new(VecDeque::new()),
                closed: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn connector(&self) -> MemoryConnector {
        MemoryConnector {
            cluster: self.clone(),
        }
    }

    /// Creates the topic if it does not exist yet.
    pub fn create_topic(&self, topic: &str, partitions: i32) {
        self.inner.topics.entry(topic.to_string()).or_insert_with(|| {
            (0..partitions.max(1))
                .map(|_| Arc::new(PartitionLog::new()))
                .collect()
        });
    }

    /// Appends a record and returns its offset.
    pub fn produce(
        &self,
        topic: &str,
        partition: i32,
        key: impl Into<Bytes>,
        value: impl Into<Bytes>,
    ) -> AppResult<i64> {
        self.produce_with_headers(topic, partition, key, value, Vec::new())
    }

    pub fn produce_with_headers(
        &self,
        topic: &str,
        partition: i32,
        key: impl Into<Bytes>,
        value: impl Into<Bytes>,
        headers: Vec<Header>,
    ) -> AppResult<i64> {
        let log = self.partition_log(topic, partition)?;
        let offset = log.append(Message::new(topic, partition, 0, key, value).with_headers(headers));
        trace!(topic, partition, offset, "produced");
        Ok(offset)
    }

    /// Next offset the group will consume from, if it has committed one.
    pub fn committed_offset(&self, group: &str, topic: &str, partition: i32) -> Option<CommittedOffset> {
        self.inner
            .offsets
            .get(&(group.to_string(), TopicPartition::new(topic, partition)))
            .map(|o| o.value().clone())
    }

    /// How many times the group marked a message of the partition.
    pub fn mark_count(&self, group: &str, topic: &str, partition: i32) -> usize {
        self.inner
            .mark_counts
            .get(&(group.to_string(), TopicPartition::new(topic, partition)))
            .map(|c| *c.value())
            .unwrap_or(0)
    }

    /// Ends the running generation of every group; members rejoin.
    pub fn rebalance(&self) {
        self.inner.rebalance.send_modify(|epoch| *epoch += 1);
        info!("rebalance requested");
    }

    /// The next `consume` call of any coordinator fails with this message.
    pub fn inject_consume_error(&self, message: impl Into<String>) {
        self.inner.faults.lock().push_back(message.into());
    }

    /// Groups whose coordinator was closed, with the closing time.
    pub fn closed_coordinators(&self) -> Vec<(String, Instant)> {
        self.inner.closed.lock().clone()
    }

    fn partition_log(&self, topic: &str, partition: i32) -> AppResult<Arc<PartitionLog>> {
        let partitions = self
            .inner
            .topics
            .get(topic)
            .ok_or_else(|| AppError::Coordinator(format!("unknown topic {}", topic)))?;
        usize::try_from(partition)
            .ok()
            .and_then(|index| partitions.get(index).cloned())
            .ok_or_else(|| {
                AppError::Coordinator(format!("unknown partition {}-{}", topic, partition))
            })
    }

    fn commit(&self, group: &str, message: &Message, metadata: &str) {
        let key = (group.to_string(), message.topic_partition());
        let next = message.offset + 1;
        self.inner
            .offsets
            .entry(key.clone())
            .and_modify(|committed| {
                if next > committed.offset {
                    committed.offset = next;
                    committed.metadata = metadata.to_string();
                }
            })
            .or_insert_with(|| CommittedOffset {
                offset: next,
                metadata: metadata.to_string(),
            });
        *self.inner.mark_counts.entry(key).or_insert(0) += 1;
    }
}

/// Connects to a [`MemoryCluster`]; every configured broker must be one of
/// the cluster's listeners.
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    cluster: MemoryCluster,
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, config: &ConsumerConfig) -> AppResult<Arc<dyn GroupCoordinator>> {
        if let Some(broker) = config
            .brokers
            .iter()
            .find(|broker| !self.cluster.inner.listeners.contains(broker.as_str()))
        {
            return Err(AppError::Connection(format!("broker {} is unreachable", broker)));
        }
        let client_id = config.client_id.as_deref().unwrap_or("stonemq-consumer");
        let coordinator = MemoryCoordinator {
            cluster: self.cluster.clone(),
            group: config.group.clone(),
            member_id: format!("{}-{}", client_id, Uuid::new_v4()),
            session_timeout_ms: config.session_timeout_ms,
            generation: AtomicI32::new(0),
            closed: AtomicBool::new(false),
        };
        debug!(
            group = %coordinator.group,
            member_id = %coordinator.member_id,
            session_timeout_ms = coordinator.session_timeout_ms,
            "connected to memory cluster"
        );
        Ok(Arc::new(coordinator))
    }
}

#[derive(Debug)]
pub struct MemoryCoordinator {
    cluster: MemoryCluster,
    group: String,
    member_id: String,
    session_timeout_ms: u64,
    generation: AtomicI32,
    closed: AtomicBool,
}

impl MemoryCoordinator {
    fn assign(&self, topics: &[String]) -> AppResult<Vec<(String, i32, Arc<PartitionLog>)>> {
        let mut assignment = Vec::new();
        for topic in topics {
            let partitions = self
                .cluster
                .inner
                .topics
                .get(topic)
                .ok_or_else(|| AppError::Coordinator(format!("unknown topic {}", topic)))?;
            for (partition, log) in partitions.iter().enumerate() {
                assignment.push((topic.clone(), partition as i32, log.clone()));
            }
        }
        Ok(assignment)
    }
}

#[async_trait]
impl GroupCoordinator for MemoryCoordinator {
    async fn consume(
        &self,
        cancel: CancellationToken,
        topics: &[String],
        handler: Arc<dyn ConsumerGroupHandler>,
    ) -> AppResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(AppError::IllegalState("coordinator is closed".into()));
        }
        let fault = self.cluster.inner.faults.lock().pop_front();
        if let Some(fault) = fault {
            return Err(AppError::Coordinator(fault));
        }

        let assignment = self.assign(topics)?;
        let mut rebalance = self.cluster.inner.rebalance.subscribe();
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let token = cancel.child_token();

        let mut claims: HashMap<String, Vec<i32>> = HashMap::new();
        for (topic, partition, _) in &assignment {
            claims.entry(topic.clone()).or_default().push(*partition);
        }
        let session = Arc::new(MemorySession {
            cluster: self.cluster.clone(),
            group: self.group.clone(),
            member_id: self.member_id.clone(),
            generation,
            claims,
            cancel: token.clone(),
            ended: AtomicBool::new(false),
        });

        handler.setup(session.as_ref()).await?;

        let mut workers = JoinSet::new();
        for (topic, partition, log) in assignment {
            let initial_offset = self
                .cluster
                .committed_offset(&self.group, &topic, partition)
                .map(|c| c.offset)
                .unwrap_or(0);
            let claim = MemoryClaim {
                high_water: log.high_water.subscribe(),
                topic,
                partition,
                initial_offset,
                cursor: initial_offset,
                log,
                cancel: token.clone(),
            };
            let handler = handler.clone();
            let session: Arc<dyn ConsumerGroupSession> = session.clone();
            workers.spawn(async move { handler.consume_claim(session, Box::new(claim)).await });
        }

        let mut errors = Vec::new();
        let mut record = |joined: Result<AppResult<()>, tokio::task::JoinError>| match joined {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                token.cancel();
                errors.push(err);
            }
            Err(join_err) => {
                error!(generation, error = %join_err, "claim task failed");
                token.cancel();
                errors.push(AppError::IllegalState(format!("claim task failed: {}", join_err)));
            }
        };

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                changed = rebalance.changed() => {
                    if changed.is_ok() {
                        debug!(group = %self.group, generation, "rebalancing");
                    }
                    token.cancel();
                    break;
                }
                Some(joined) = workers.join_next(), if !workers.is_empty() => record(joined),
            }
        }
        // claims stop yielding; in-flight handlers finish
        while let Some(joined) = workers.join_next().await {
            record(joined);
        }

        let cleanup = handler.cleanup(session.as_ref()).await;
        session.ended.store(true, Ordering::Release);
        cleanup?;

        match AppError::aggregate(errors) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn close(&self) -> AppResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(AppError::IllegalState("coordinator already closed".into()));
        }
        self.cluster
            .inner
            .closed
            .lock()
            .push((self.group.clone(), Instant::now()));
        debug!(group = %self.group, member_id = %self.member_id, "coordinator closed");
        Ok(())
    }
}

#[derive(Debug)]
pub struct MemorySession {
    cluster: MemoryCluster,
    group: String,
    member_id: String,
    generation: i32,
    claims: HashMap<String, Vec<i32>>,
    cancel: CancellationToken,
    ended: AtomicBool,
}

impl ConsumerGroupSession for MemorySession {
    fn member_id(&self) -> &str {
        &self.member_id
    }

    fn generation_id(&self) -> i32 {
        self.generation
    }

    fn claims(&self) -> HashMap<String, Vec<i32>> {
        self.claims.clone()
    }

    fn mark_message(&self, message: &Message, metadata: &str) {
        // marks after the generation ended are dropped
        if self.ended.load(Ordering::Acquire) {
            return;
        }
        self.cluster.commit(&self.group, message, metadata);
    }

    fn cancel(&self) {
        self.cancel.cancel();
    }

    fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

#[derive(Debug)]
pub struct MemoryClaim {
    topic: String,
    partition: i32,
    initial_offset: i64,
    cursor: i64,
    log: Arc<PartitionLog>,
    high_water: watch::Receiver<i64>,
    cancel: CancellationToken,
}

#[async_trait]
impl ConsumerGroupClaim for MemoryClaim {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn partition(&self) -> i32 {
        self.partition
    }

    fn initial_offset(&self) -> i64 {
        self.initial_offset
    }

    fn high_water_mark(&self) -> i64 {
        self.log.high_water_mark()
    }

    async fn next_message(&mut self) -> Option<Message> {
        loop {
            if self.cancel.is_cancelled() {
                return None;
            }
            if let Some(message) = self.log.get(self.cursor) {
                self.cursor += 1;
                return Some(message);
            }
            tokio::select! {
                _ = self.cancel.cancelled() => return None,
                changed = self.high_water.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
            }
        }
    }
}
