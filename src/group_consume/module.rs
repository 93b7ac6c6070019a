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

use async_trait::async_trait;

use crate::handler::HandlerFunc;
use crate::service::Module;
use crate::{AppError, AppResult, ConsumerConfig};

use super::{Connector, GroupConsumer, GroupHooks, MetricsRegistry};

/// Runs one [`GroupConsumer`] under the [`Runner`](crate::Runner).
pub struct ConsumerModule {
    name: String,
    config: ConsumerConfig,
    connector: Arc<dyn Connector>,
    registry: Arc<dyn MetricsRegistry>,
    handler: HandlerFunc,
    hooks: Option<Arc<dyn GroupHooks>>,
    consumer: Option<GroupConsumer>,
}

impl ConsumerModule {
    pub fn new(
        config: ConsumerConfig,
        connector: Arc<dyn Connector>,
        registry: Arc<dyn MetricsRegistry>,
        handler: HandlerFunc,
    ) -> Self {
        Self {
            name: format!("consumer:{}", config.metrics_prefix()),
            config,
            connector,
            registry,
            handler,
            hooks: None,
            consumer: None,
        }
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn GroupHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    /// The consumer, once `init` succeeded.
    pub fn consumer(&self) -> Option<&GroupConsumer> {
        self.consumer.as_ref()
    }

    fn initialized(&self) -> AppResult<&GroupConsumer> {
        self.consumer
            .as_ref()
            .ok_or_else(|| AppError::IllegalState(format!("{} is not initialized", self.name)))
    }
}

#[async_trait]
impl Module for ConsumerModule {
    fn name(&self) -> &str {
        &self.name
    }

    async fn init(&mut self) -> AppResult<()> {
        let consumer = GroupConsumer::init(
            self.config.clone(),
            self.connector.as_ref(),
            self.registry.clone(),
        )
        .await?;
        if let Some(hooks) = &self.hooks {
            consumer.set_consumer_group_handler(hooks.clone());
        }
        self.consumer = Some(consumer);
        Ok(())
    }

    async fn run(&self) -> AppResult<()> {
        self.initialized()?.run(self.handler.clone()).await
    }

    async fn close(&self) -> AppResult<()> {
        self.initialized()?.close().await
    }
}
