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

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

use crate::{AppError, AppResult};

/// Counters of one consumer, registered under a prefix.
#[derive(Debug, Default)]
pub struct ConsumerMetrics {
    prefix: String,
    messages: AtomicU64,
    handler_errors: AtomicU64,
    sessions: AtomicU64,
    claims: AtomicU64,
    coordinator_retries: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub messages: u64,
    pub handler_errors: u64,
    pub sessions: u64,
    pub claims: u64,
    pub coordinator_retries: u64,
}

impl ConsumerMetrics {
    fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            ..Default::default()
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn record_message(&self) {
        self.messages.fetch_add(1, Ordering::Relaxed);
    }
    pub fn record_handler_error(&self) {
        self.handler_errors.fetch_add(1, Ordering::Relaxed);
    }
    pub fn record_session(&self) {
        self.sessions.fetch_add(1, Ordering::Relaxed);
    }
    pub fn record_claim(&self) {
        self.claims.fetch_add(1, Ordering::Relaxed);
    }
    pub fn record_coordinator_retry(&self) {
        self.coordinator_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages: self.messages.load(Ordering::Relaxed),
            handler_errors: self.handler_errors.load(Ordering::Relaxed),
            sessions: self.sessions.load(Ordering::Relaxed),
            claims: self.claims.load(Ordering::Relaxed),
            coordinator_retries: self.coordinator_retries.load(Ordering::Relaxed),
        }
    }
}

/// Instrumentation sink consumers register with. Passed to each consumer
/// explicitly so several consumers can share one process.
pub trait MetricsRegistry: Send + Sync {
    /// Fails with [`AppError::Metrics`] when the prefix is taken.
    fn register(&self, prefix: &str) -> AppResult<Arc<ConsumerMetrics>>;
    fn unregister(&self, prefix: &str) -> AppResult<()>;
}

/// In-process [`MetricsRegistry`].
#[derive(Debug, Default)]
pub struct PrefixRegistry {
    metrics: DashMap<String, Arc<ConsumerMetrics>>,
}

impl PrefixRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, prefix: &str) -> Option<Arc<ConsumerMetrics>> {
        self.metrics.get(prefix).map(|m| m.value().clone())
    }

    pub fn prefixes(&self) -> Vec<String> {
        let mut prefixes: Vec<String> = self.metrics.iter().map(|e| e.key().clone()).collect();
        prefixes.sort();
        prefixes
    }
}

impl MetricsRegistry for PrefixRegistry {
    fn register(&self, prefix: &str) -> AppResult<Arc<ConsumerMetrics>> {
        match self.metrics.entry(prefix.to_string()) {
            Entry::Occupied(_) => Err(AppError::Metrics(format!(
                "metrics prefix {} already registered",
                prefix
            ))),
            Entry::Vacant(entry) => {
                let metrics = Arc::new(ConsumerMetrics::new(prefix));
                entry.insert(metrics.clone());
                debug!(prefix, "registered consumer metrics");
                Ok(metrics)
            }
        }
    }

    fn unregister(&self, prefix: &str) -> AppResult<()> {
        self.metrics
            .remove(prefix)
            .map(|_| debug!(prefix, "unregistered consumer metrics"))
            .ok_or_else(|| AppError::Metrics(format!("metrics prefix {} not registered", prefix)))
    }
}
