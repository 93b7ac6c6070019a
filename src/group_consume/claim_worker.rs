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

use tracing::{debug, error, info};

use crate::handler::{mark_fn, HandlerFunc};
use crate::message::Message;
use crate::{AppError, AppResult};

use super::{ConsumerGroupClaim, ConsumerGroupSession, ConsumerMetrics};

/// Feeds one partition claim through the handler, one message at a time.
pub(crate) struct ClaimWorker {
    handler: HandlerFunc,
    metrics: Arc<ConsumerMetrics>,
}

impl ClaimWorker {
    pub fn new(handler: HandlerFunc, metrics: Arc<ConsumerMetrics>) -> Self {
        Self { handler, metrics }
    }

    /// Returns `Ok` once the claim is closed. A handler error cancels the
    /// session, so sibling workers stop too, and is returned.
    pub async fn run(
        self,
        session: Arc<dyn ConsumerGroupSession>,
        mut claim: Box<dyn ConsumerGroupClaim>,
    ) -> AppResult<()> {
        let topic = claim.topic().to_string();
        let partition = claim.partition();
        info!(
            topic = %topic,
            partition,
            initial_offset = claim.initial_offset(),
            high_water_mark = claim.high_water_mark(),
            generation = session.generation_id(),
            "claim started"
        );
        self.metrics.record_claim();

        let cancel = session.cancellation();
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                message = claim.next_message() => message,
            };
            let Some(message) = next else {
                break;
            };
            let message = Arc::new(message);

            // the mark stays on this task, bound to this message and session
            let mark_session = session.clone();
            let mark_message: Arc<Message> = message.clone();
            let mark = mark_fn(move |metadata| mark_session.mark_message(&mark_message, metadata));

            self.metrics.record_message();
            if let Err(err) = (self.handler)(message.clone(), mark).await {
                self.metrics.record_handler_error();
                error!(
                    topic = %topic,
                    partition,
                    offset = message.offset,
                    error = %err,
                    "handler failed, cancelling session"
                );
                session.cancel();
                return Err(AppError::Handler(err));
            }
        }

        debug!(topic = %topic, partition, "claim finished");
        Ok(())
    }
}
