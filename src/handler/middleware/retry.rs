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

use futures::FutureExt;
use tracing::warn;

use crate::handler::{is_retryable, markable, HandlerFunc, MarkFn, Middleware};
use crate::message::Message;

use super::mark_if_no_error;

/// Calls the inner handler again after `wait` while it fails with a retryable
/// error, at most `max_retries` extra times. The last result is returned and
/// nothing is marked.
pub fn retry(max_retries: u32, wait: Duration) -> Middleware {
    Arc::new(move |next: HandlerFunc| -> HandlerFunc {
        Arc::new(move |message: Arc<Message>, mark: MarkFn| {
            let next = next.clone();
            async move {
                let mut attempt: u32 = 1;
                loop {
                    let result = next(message.clone(), mark.clone()).await;
                    match result {
                        Err(err) if is_retryable(err.as_ref()) && attempt <= max_retries => {
                            warn!(
                                topic = %message.topic,
                                partition = message.partition,
                                offset = message.offset,
                                attempt,
                                max_retries,
                                error = %err,
                                "retrying message"
                            );
                            if !wait.is_zero() {
                                tokio::time::sleep(wait).await;
                            }
                            attempt += 1;
                        }
                        other => return other,
                    }
                }
            }
            .boxed()
        })
    })
}

/// Non-retryable errors leave here tagged markable.
fn markable_unless_retryable(next: HandlerFunc) -> HandlerFunc {
    Arc::new(move |message: Arc<Message>, mark: MarkFn| {
        let next = next.clone();
        async move {
            match next(message.clone(), mark).await {
                Err(err) if !is_retryable(err.as_ref()) => {
                    warn!(
                        topic = %message.topic,
                        partition = message.partition,
                        offset = message.offset,
                        error = %err,
                        "skipping message after non-retryable error"
                    );
                    Err(markable(err))
                }
                other => other,
            }
        }
        .boxed()
    })
}

/// [`retry`] inside [`mark_if_no_error`]: success and non-retryable failures
/// are marked and return `Ok`, an error still retryable once the budget is
/// spent is returned unmarked so the caller can stop consuming.
pub fn common_defaults_with_retry(max_retries: u32, wait: Duration) -> Middleware {
    let retry = retry(max_retries, wait);
    Arc::new(move |next: HandlerFunc| -> HandlerFunc {
        mark_if_no_error(markable_unless_retryable(retry(next)))
    })
}
