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
use tracing::error;

use crate::handler::{HandlerFunc, MarkFn};
use crate::message::Message;
use crate::utils::catch_panic;
use crate::AppError;

/// Converts a panic in the inner handler into an [`AppError::Panic`] carrying
/// the panic message and a captured stack. The panic is logged and returned as
/// the handler's error, never resumed.
pub fn recover(next: HandlerFunc) -> HandlerFunc {
    Arc::new(move |message: Arc<Message>, mark: MarkFn| {
        let next = next.clone();
        async move {
            match catch_panic(next(message.clone(), mark)).await {
                Ok(result) => result,
                Err(err) => {
                    if let AppError::Panic { message: cause, stack } = &err {
                        error!(
                            topic = %message.topic,
                            partition = message.partition,
                            offset = message.offset,
                            panic = %cause,
                            stack = %stack,
                            "recovered from handler panic"
                        );
                    }
                    Err(Box::new(err) as _)
                }
            }
        }
        .boxed()
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::handler::handler_fn;
    use crate::handler::middleware::test_support::{counting_mark, message, panicking};
    use crate::BoxError;

    #[tokio::test]
    async fn string_panic_becomes_error() {
        let handler = recover(panicking(|| "cannot decode value"));
        let (mark, marks) = counting_mark();
        let err = handler(message(0, 5), mark).await.unwrap_err();

        let app_err = err.downcast_ref::<AppError>().expect("AppError");
        match app_err {
            AppError::Panic { message, stack } => {
                assert_eq!(message, "cannot decode value");
                assert!(!stack.is_empty());
            }
            other => panic!("unexpected error {other}"),
        }
        assert!(err.to_string().contains("cannot decode value"));
        assert_eq!(marks.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn error_value_panic_becomes_error() {
        let handler = recover(panicking(|| -> BoxError { "schema mismatch".into() }));
        let (mark, _) = counting_mark();
        let err = handler(message(0, 6), mark).await.unwrap_err();
        assert!(err.to_string().contains("schema mismatch"));
    }

    #[tokio::test]
    async fn results_pass_through() {
        let handler = recover(handler_fn(|_, _| async { Err("plain".into()) }));
        let (mark, _) = counting_mark();
        assert_eq!(
            handler(message(0, 7), mark).await.unwrap_err().to_string(),
            "plain"
        );
    }
}
