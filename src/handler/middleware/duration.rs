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
use std::time::{Duration, Instant};

use futures::FutureExt;
use tracing::debug;

use crate::handler::{HandlerFunc, MarkFn, Middleware};
use crate::message::Message;

/// Measures the wall-clock time of the inner call and hands it to `observe`.
/// Never alters the result.
pub fn duration<O>(observe: O) -> Middleware
where
    O: Fn(&Message, Duration) + Send + Sync + 'static,
{
    let observe = Arc::new(observe);
    Arc::new(move |next: HandlerFunc| -> HandlerFunc {
        let observe = observe.clone();
        Arc::new(move |message: Arc<Message>, mark: MarkFn| {
            let next = next.clone();
            let observe = observe.clone();
            async move {
                let start = Instant::now();
                let result = next(message.clone(), mark).await;
                observe(&message, start.elapsed());
                result
            }
            .boxed()
        })
    })
}

/// [`duration`] reporting to the `handler_duration_ms` histogram picked up by
/// the OpenTelemetry metrics layer.
pub fn duration_metric(next: HandlerFunc) -> HandlerFunc {
    let middleware = duration(|message, elapsed| {
        debug!(
            histogram.handler_duration_ms = elapsed.as_secs_f64() * 1000.0,
            topic = %message.topic,
            partition = message.partition,
        );
    });
    middleware(next)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::handler::handler_fn;
    use crate::handler::middleware::test_support::{counting_mark, message};

    #[tokio::test]
    async fn observes_elapsed_time_without_touching_result() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let middleware = duration(move |message, elapsed| {
            sink.lock().unwrap().push((message.offset, elapsed));
        });

        let handler = middleware(handler_fn(|_, _| async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Err("slow and broken".into())
        }));
        let (mark, _) = counting_mark();
        let err = handler(message(1, 9), mark).await.unwrap_err();
        assert_eq!(err.to_string(), "slow and broken");

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, 9);
        assert!(seen[0].1 >= Duration::from_millis(20));
    }

    #[tokio::test]
    async fn metric_variant_is_transparent() {
        let handler = duration_metric(handler_fn(|_, _| async { Ok(()) }));
        let (mark, _) = counting_mark();
        assert!(handler(message(0, 0), mark).await.is_ok());
    }
}
