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

use chrono::Utc;
use futures::FutureExt;
use tracing::{debug, error};

use crate::handler::{HandlerFunc, MarkFn};
use crate::message::Message;

/// Logs the message coordinates and how long it waited since it was produced,
/// then logs the handler's error if it returned one. The result is passed
/// through unchanged.
pub fn log(next: HandlerFunc) -> HandlerFunc {
    Arc::new(move |message: Arc<Message>, mark: MarkFn| {
        let next = next.clone();
        async move {
            let latency_ms = (Utc::now() - message.timestamp).num_milliseconds();
            debug!(
                topic = %message.topic,
                partition = message.partition,
                offset = message.offset,
                latency_ms,
                "processing message"
            );
            let result = next(message.clone(), mark).await;
            if let Err(err) = &result {
                error!(
                    topic = %message.topic,
                    partition = message.partition,
                    offset = message.offset,
                    error = %err,
                    "message handler failed"
                );
            }
            result
        }
        .boxed()
    })
}
