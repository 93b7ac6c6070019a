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

//! The unit of user logic and the middleware that composes around it.
//!
//! A [`HandlerFunc`] receives one [`Message`] and a [`MarkFn`] bound to that
//! message's session. Middleware are plain functions from `HandlerFunc` to
//! `HandlerFunc`; [`chain`] applies a list of them with the first entry
//! outermost.

mod errors;
pub mod middleware;

pub use errors::{
    is_markable, is_retryable, markable, retryable, MarkableError, RetryableError,
};

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::message::Message;
use crate::BoxError;

pub type HandlerResult = Result<(), BoxError>;

/// Records the bound message's offset (and every earlier offset on the same
/// partition) as consumable. The argument is the commit metadata.
///
/// Must be called from the task that received the message and not retained
/// past the handler's return.
pub type MarkFn = Arc<dyn Fn(&str) + Send + Sync>;

pub type HandlerFunc =
    Arc<dyn Fn(Arc<Message>, MarkFn) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

pub type Middleware = Arc<dyn Fn(HandlerFunc) -> HandlerFunc + Send + Sync>;

/// Wraps an async closure into a [`HandlerFunc`].
pub fn handler_fn<F, Fut>(f: F) -> HandlerFunc
where
    F: Fn(Arc<Message>, MarkFn) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(move |message: Arc<Message>, mark: MarkFn| f(message, mark).boxed())
}

pub fn mark_fn<F>(f: F) -> MarkFn
where
    F: Fn(&str) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Wraps `handler` so that `middlewares[0]` runs first.
pub fn chain<I>(handler: HandlerFunc, middlewares: I) -> HandlerFunc
where
    I: IntoIterator<Item = Middleware>,
    I::IntoIter: DoubleEndedIterator,
{
    middlewares
        .into_iter()
        .rev()
        .fold(handler, |next, middleware| middleware(next))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    fn tagging(name: &'static str, seen: Arc<Mutex<Vec<&'static str>>>) -> Middleware {
        Arc::new(move |next: HandlerFunc| {
            let seen = seen.clone();
            handler_fn(move |message, mark| {
                seen.lock().unwrap().push(name);
                next(message, mark)
            })
        })
    }

    #[tokio::test]
    async fn chain_runs_first_middleware_outermost() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let inner_seen = seen.clone();
        let handler = handler_fn(move |_, _| {
            inner_seen.lock().unwrap().push("handler");
            async { Ok(()) }
        });

        let wrapped = chain(
            handler,
            vec![tagging("outer", seen.clone()), tagging("inner", seen.clone())],
        );
        wrapped(
            Arc::new(Message::new("t", 0, 0, "k", "v")),
            mark_fn(|_| {}),
        )
        .await
        .unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["outer", "inner", "handler"]);
    }
}
