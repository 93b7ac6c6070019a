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

//! Consumer-group consumption.
//!
//! The group-coordination protocol itself sits behind [`GroupCoordinator`]:
//! `consume` joins the group for one generation, calls
//! [`ConsumerGroupHandler::setup`], runs one
//! [`ConsumerGroupHandler::consume_claim`] per assigned partition
//! concurrently, then calls [`ConsumerGroupHandler::cleanup`].
//! [`GroupConsumer`] drives that loop and hands every claim to a
//! partition worker running the user's [`HandlerFunc`].
//!
//! [`HandlerFunc`]: crate::handler::HandlerFunc

mod claim_worker;
mod consumer;
mod memory;
mod metrics;
mod module;

pub use consumer::GroupConsumer;
pub use memory::{
    CommittedOffset, MemoryClaim, MemoryCluster, MemoryConnector, MemoryCoordinator, MemorySession,
};
pub use metrics::{ConsumerMetrics, MetricsRegistry, MetricsSnapshot, PrefixRegistry};
pub use module::ConsumerModule;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::message::Message;
use crate::{AppResult, ConsumerConfig};

/// One generation of group membership.
pub trait ConsumerGroupSession: Send + Sync {
    fn member_id(&self) -> &str;
    fn generation_id(&self) -> i32;
    /// Partitions assigned to this member, by topic.
    fn claims(&self) -> HashMap<String, Vec<i32>>;
    /// Records `message.offset + 1` as the next offset to commit for its
    /// partition.
    fn mark_message(&self, message: &Message, metadata: &str);
    /// Ends the generation early; every claim stops yielding messages.
    fn cancel(&self);
    fn cancellation(&self) -> CancellationToken;
}

/// The messages of one partition for one generation. Owned by exactly one
/// worker.
#[async_trait]
pub trait ConsumerGroupClaim: Send {
    fn topic(&self) -> &str;
    fn partition(&self) -> i32;
    fn initial_offset(&self) -> i64;
    fn high_water_mark(&self) -> i64;
    /// Waits for the next message; `None` once the claim is closed.
    async fn next_message(&mut self) -> Option<Message>;
}

/// Callbacks the coordinator drives for each generation.
#[async_trait]
pub trait ConsumerGroupHandler: Send + Sync {
    async fn setup(&self, session: &dyn ConsumerGroupSession) -> AppResult<()>;
    async fn cleanup(&self, session: &dyn ConsumerGroupSession) -> AppResult<()>;
    async fn consume_claim(
        &self,
        session: Arc<dyn ConsumerGroupSession>,
        claim: Box<dyn ConsumerGroupClaim>,
    ) -> AppResult<()>;
}

/// Optional user hooks around each generation. Failures are logged and do
/// not abort the session.
#[async_trait]
pub trait GroupHooks: Send + Sync {
    async fn setup(&self, _session: &dyn ConsumerGroupSession) -> AppResult<()> {
        Ok(())
    }
    async fn cleanup(&self, _session: &dyn ConsumerGroupSession) -> AppResult<()> {
        Ok(())
    }
}

/// Client handle for one consumer group.
#[async_trait]
pub trait GroupCoordinator: Send + Sync {
    /// Runs one generation and returns at its end. Returns `Ok` when `cancel`
    /// fires or the group rebalances.
    async fn consume(
        &self,
        cancel: CancellationToken,
        topics: &[String],
        handler: Arc<dyn ConsumerGroupHandler>,
    ) -> AppResult<()>;

    async fn close(&self) -> AppResult<()>;
}

/// Builds a [`GroupCoordinator`] for a config. Fails with
/// [`AppError::Connection`](crate::AppError::Connection) when the brokers
/// cannot be reached.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, config: &ConsumerConfig) -> AppResult<Arc<dyn GroupCoordinator>>;
}
