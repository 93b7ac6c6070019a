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

use futures::FutureExt;
use tracing::debug;

use crate::handler::{is_markable, HandlerFunc, MarkFn};
use crate::message::Message;

/// Marks the message after the inner handler returns, whatever it returned.
pub fn mark(next: HandlerFunc) -> HandlerFunc {
    Arc::new(move |message: Arc<Message>, mark: MarkFn| {
        let next = next.clone();
        async move {
            let result = next(message, mark.clone()).await;
            mark("");
            result
        }
        .boxed()
    })
}

/// Marks the message when the inner handler succeeded or failed with a
/// markable error; the markable error is then swallowed. Any other error is
/// returned unmarked.
pub fn mark_if_no_error(next: HandlerFunc) -> HandlerFunc {
    Arc::new(move |message: Arc<Message>, mark: MarkFn| {
        let next = next.clone();
        async move {
            match next(message.clone(), mark.clone()).await {
                Ok(()) => {
                    mark("");
                    Ok(())
                }
                Err(err) if is_markable(err.as_ref()) => {
                    debug!(
                        topic = %message.topic,
                        partition = message.partition,
                        offset = message.offset,
                        error = %err,
                        "marking message despite markable error"
                    );
                    mark("");
                    Ok(())
                }
                Err(err) => Err(err),
            }
        }
        .boxed()
    })
}

/// Swallows every error. Does not mark.
pub fn ignore_errors(next: HandlerFunc) -> HandlerFunc {
    Arc::new(move |message: Arc<Message>, mark: MarkFn| {
        let next = next.clone();
        async move {
            let _ = next(message, mark).await;
            Ok(())
        }
        .boxed()
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::handler::middleware::test_support::{counting_mark, message};
    use crate::handler::{handler_fn, markable, retryable};
    use crate::BoxError;

    fn returning(make: fn() -> Option<BoxError>) -> HandlerFunc {
        handler_fn(move |_, _| async move {
            match make() {
                Some(err) => Err(err),
                None => Ok(()),
            }
        })
    }

    #[tokio::test]
    async fn mark_always_marks_once() {
        for make in [
            (|| None) as fn() -> Option<BoxError>,
            || Some("plain".into()),
            || Some(retryable("again")),
        ] {
            let expect_err = make().is_some();
            let handler = mark(returning(make));
            let (mark_cb, marks) = counting_mark();
            let result = handler(message(0, 0), mark_cb).await;
            assert_eq!(result.is_err(), expect_err);
            assert_eq!(marks.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test]
    async fn mark_if_no_error_marks_success() {
        let handler = mark_if_no_error(returning(|| None));
        let (mark_cb, marks) = counting_mark();
        assert!(handler(message(0, 0), mark_cb).await.is_ok());
        assert_eq!(marks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn mark_if_no_error_swallows_markable() {
        let handler = mark_if_no_error(returning(|| Some(markable("poison message"))));
        let (mark_cb, marks) = counting_mark();
        assert!(handler(message(0, 0), mark_cb).await.is_ok());
        assert_eq!(marks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn mark_if_no_error_propagates_other_errors() {
        let handler = mark_if_no_error(returning(|| Some(retryable("db down"))));
        let (mark_cb, marks) = counting_mark();
        let err = handler(message(0, 0), mark_cb).await.unwrap_err();
        assert_eq!(err.to_string(), "db down");
        assert_eq!(marks.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn ignore_errors_never_marks() {
        let handler = ignore_errors(returning(|| Some("plain".into())));
        let (mark_cb, marks) = counting_mark();
        assert!(handler(message(0, 0), mark_cb).await.is_ok());
        assert_eq!(marks.load(Ordering::SeqCst), 0);
    }
}
