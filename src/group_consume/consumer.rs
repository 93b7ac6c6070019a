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

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::handler::HandlerFunc;
use crate::utils::catch_panic;
use crate::{AppError, AppResult, ConsumerConfig};

use super::claim_worker::ClaimWorker;
use super::{
    Connector, ConsumerGroupClaim, ConsumerGroupHandler, ConsumerGroupSession, ConsumerMetrics,
    GroupCoordinator, GroupHooks, MetricsRegistry,
};

enum LoopState {
    Idle,
    /// the receiver is taken by the one `run` call waiting on the loop
    Running(Option<oneshot::Receiver<AppResult<()>>>),
    Closed,
}

/// A member of one consumer group. Every partition claimed in a generation is
/// consumed by its own task; a handler error on any partition ends the whole
/// generation and is returned from [`GroupConsumer::run`].
pub struct GroupConsumer {
    config: ConsumerConfig,
    prefix: String,
    coordinator: Arc<dyn GroupCoordinator>,
    registry: Arc<dyn MetricsRegistry>,
    session_handler: Arc<SessionHandler>,
    cancel: CancellationToken,
    /// opened by `run`; claims wait on it before delivering
    gate: watch::Sender<bool>,
    loop_done: CancellationToken,
    run_loop: tokio::sync::Mutex<LoopState>,
}

impl GroupConsumer {
    /// Validates the config, registers instrumentation under the config's
    /// metrics prefix and connects to the coordinator. With
    /// `pre_claim_partitions` the group is joined right away.
    pub async fn init(
        config: ConsumerConfig,
        connector: &dyn Connector,
        registry: Arc<dyn MetricsRegistry>,
    ) -> AppResult<Self> {
        config.validate()?;
        let prefix = config.metrics_prefix();
        let metrics = registry.register(&prefix)?;

        let coordinator = match connector.connect(&config).await {
            Ok(coordinator) => coordinator,
            Err(err) => {
                if let Err(unregister_err) = registry.unregister(&prefix) {
                    warn!(prefix, error = %unregister_err, "failed to unregister metrics");
                }
                return Err(err);
            }
        };

        let (gate, gate_rx) = watch::channel(false);
        let consumer = Self {
            prefix,
            coordinator,
            registry,
            session_handler: Arc::new(SessionHandler {
                handler: RwLock::new(None),
                hooks: RwLock::new(None),
                gate: gate_rx,
                failure: Mutex::new(None),
                metrics,
            }),
            cancel: CancellationToken::new(),
            gate,
            loop_done: CancellationToken::new(),
            run_loop: tokio::sync::Mutex::new(LoopState::Idle),
            config,
        };

        if consumer.config.pre_claim_partitions {
            let mut state = consumer.run_loop.lock().await;
            *state = consumer.spawn_loop();
        }

        info!(
            group = %consumer.config.group,
            topics = ?consumer.config.topics,
            prefix = %consumer.prefix,
            pre_claim = consumer.config.pre_claim_partitions,
            "consumer initialized"
        );
        Ok(consumer)
    }

    /// Consumes with `handler` until [`close`](Self::close) is called or a
    /// handler error stops the group. Returns `Ok` after a close.
    pub async fn run(&self, handler: HandlerFunc) -> AppResult<()> {
        let result_rx = {
            let mut state = self.run_loop.lock().await;
            match &*state {
                LoopState::Closed => {
                    warn!(group = %self.config.group, "consumer closed before run");
                    return Ok(());
                }
                LoopState::Running(None) => {
                    return Err(AppError::IllegalState("consumer is already running".into()))
                }
                _ => {}
            }

            *self.session_handler.handler.write() = Some(handler);
            self.gate.send_replace(true);
            if matches!(*state, LoopState::Idle) {
                *state = self.spawn_loop();
            }
            match &mut *state {
                LoopState::Running(result_rx) => result_rx.take(),
                _ => None,
            }
        };

        let Some(result_rx) = result_rx else {
            return Err(AppError::IllegalState("consumer is already running".into()));
        };
        info!(group = %self.config.group, "consumer running");
        result_rx.await.unwrap_or_else(|_| {
            Err(AppError::IllegalState(
                "consume loop exited without a result".into(),
            ))
        })
    }

    /// Stops consuming and waits until every partition worker has returned,
    /// then unregisters instrumentation and closes the coordinator. Errors of
    /// the last two steps are aggregated.
    pub async fn close(&self) -> AppResult<()> {
        let mut state = self.run_loop.lock().await;
        if matches!(*state, LoopState::Closed) {
            warn!(group = %self.config.group, "consumer already closed");
            return Ok(());
        }
        let was_running = matches!(*state, LoopState::Running(_));
        *state = LoopState::Closed;

        info!(group = %self.config.group, "closing consumer");
        self.cancel.cancel();
        if was_running {
            self.loop_done.cancelled().await;
        }
        drop(state);

        let mut errors = Vec::new();
        if let Err(err) = self.registry.unregister(&self.prefix) {
            errors.push(err);
        }
        if let Err(err) = self.coordinator.close().await {
            errors.push(err);
        }
        info!(group = %self.config.group, "consumer closed");
        match AppError::aggregate(errors) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Installs hooks called at the start and end of every generation. Safe to
    /// call while sessions are live; the next hook invocation sees the new one.
    pub fn set_consumer_group_handler(&self, hooks: Arc<dyn GroupHooks>) {
        *self.session_handler.hooks.write() = Some(hooks);
    }

    pub fn metrics(&self) -> Arc<ConsumerMetrics> {
        self.session_handler.metrics.clone()
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    fn spawn_loop(&self) -> LoopState {
        let (result_tx, result_rx) = oneshot::channel();
        let consume_loop = ConsumeLoop {
            coordinator: self.coordinator.clone(),
            topics: self.config.topics.clone(),
            session_handler: self.session_handler.clone(),
            cancel: self.cancel.clone(),
            retry_on_disconnect: self.config.retry_on_disconnect,
            retry_wait: self.config.retry_wait(),
        };
        let loop_done = self.loop_done.clone();
        tokio::spawn(async move {
            let result = catch_panic(consume_loop.run()).await.and_then(|r| r);
            loop_done.cancel();
            let _ = result_tx.send(result);
        });
        LoopState::Running(Some(result_rx))
    }
}

struct ConsumeLoop {
    coordinator: Arc<dyn GroupCoordinator>,
    topics: Vec<String>,
    session_handler: Arc<SessionHandler>,
    cancel: CancellationToken,
    retry_on_disconnect: bool,
    retry_wait: Duration,
}

impl ConsumeLoop {
    /// Joins the group over and over: after each rebalance and, when enabled,
    /// after coordinator errors.
    async fn run(self) -> AppResult<()> {
        let handler: Arc<dyn ConsumerGroupHandler> = self.session_handler.clone();
        loop {
            if self.cancel.is_cancelled() {
                return Ok(());
            }
            let result = self
                .coordinator
                .consume(self.cancel.clone(), &self.topics, handler.clone())
                .await;

            if let Some(failure) = self.session_handler.take_failure() {
                return Err(failure);
            }
            if self.cancel.is_cancelled() {
                debug!("consume loop cancelled");
                return Ok(());
            }

            match result {
                Ok(()) => debug!("generation ended, rejoining group"),
                Err(err) if self.retry_on_disconnect => {
                    self.session_handler.metrics.record_coordinator_retry();
                    warn!(
                        error = %err,
                        wait_secs = self.retry_wait.as_secs(),
                        "consume failed, rejoining group"
                    );
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Ok(()),
                        _ = tokio::time::sleep(self.retry_wait) => {}
                    }
                }
                Err(err) => {
                    error!(error = %err, "consume failed");
                    return Err(err);
                }
            }
        }
    }
}

/// The coordinator-facing side of a [`GroupConsumer`].
struct SessionHandler {
    handler: RwLock<Option<HandlerFunc>>,
    hooks: RwLock<Option<Arc<dyn GroupHooks>>>,
    gate: watch::Receiver<bool>,
    /// first handler error of the current generation
    failure: Mutex<Option<AppError>>,
    metrics: Arc<ConsumerMetrics>,
}

impl SessionHandler {
    fn record_failure(&self, err: AppError) {
        let mut failure = self.failure.lock();
        if failure.is_none() {
            *failure = Some(err);
        }
    }

    fn take_failure(&self) -> Option<AppError> {
        self.failure.lock().take()
    }

    fn hooks(&self) -> Option<Arc<dyn GroupHooks>> {
        self.hooks.read().clone()
    }
}

#[async_trait]
impl ConsumerGroupHandler for SessionHandler {
    async fn setup(&self, session: &dyn ConsumerGroupSession) -> AppResult<()> {
        self.metrics.record_session();
        info!(
            member_id = session.member_id(),
            generation = session.generation_id(),
            claims = ?session.claims(),
            "session setup"
        );
        if let Some(hooks) = self.hooks() {
            if let Err(err) = hooks.setup(session).await {
                error!(generation = session.generation_id(), error = %err, "setup hook failed");
            }
        }
        Ok(())
    }

    async fn cleanup(&self, session: &dyn ConsumerGroupSession) -> AppResult<()> {
        info!(
            member_id = session.member_id(),
            generation = session.generation_id(),
            "session cleanup"
        );
        if let Some(hooks) = self.hooks() {
            if let Err(err) = hooks.cleanup(session).await {
                error!(generation = session.generation_id(), error = %err, "cleanup hook failed");
            }
        }
        Ok(())
    }

    async fn consume_claim(
        &self,
        session: Arc<dyn ConsumerGroupSession>,
        claim: Box<dyn ConsumerGroupClaim>,
    ) -> AppResult<()> {
        // deliveries wait for `run`
        let cancel = session.cancellation();
        let mut gate = self.gate.clone();
        let released = tokio::select! {
            released = async move { gate.wait_for(|open| *open).await.is_ok() } => released,
            _ = cancel.cancelled() => false,
        };
        if !released {
            return Ok(());
        }

        let handler = self.handler.read().clone();
        let Some(handler) = handler else {
            return Err(AppError::IllegalState("no handler installed".into()));
        };

        let worker = ClaimWorker::new(handler, self.metrics.clone());
        let result = match catch_panic(worker.run(session.clone(), claim)).await {
            Ok(result) => result,
            Err(panic) => {
                error!(error = %panic, "partition worker panicked, cancelling session");
                session.cancel();
                Err(AppError::Handler(Box::new(panic)))
            }
        };
        match result {
            Err(AppError::Handler(cause)) => {
                let text = cause.to_string();
                self.record_failure(AppError::Handler(cause));
                Err(AppError::Handler(text.into()))
            }
            other => other,
        }
    }
}
