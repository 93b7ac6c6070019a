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
use tracing::field::{display, Empty};
use tracing::{info_span, Instrument};

use crate::handler::{HandlerFunc, MarkFn};
use crate::message::Message;

/// Runs the handler inside a `consume_message` span tagged with the message
/// coordinates. A failed handler records its error on the span. The span is
/// closed when the inner future completes or is dropped, unwinding included.
pub fn trace(next: HandlerFunc) -> HandlerFunc {
    Arc::new(move |message: Arc<Message>, mark: MarkFn| {
        let next = next.clone();
        let span = info_span!(
            "consume_message",
            topic = %message.topic,
            partition = message.partition,
            offset = message.offset,
            timestamp = %message.timestamp,
            error = Empty,
        );
        async move {
            let result = next(message, mark).instrument(span.clone()).await;
            if let Err(err) = &result {
                span.record("error", display(err));
            }
            result
        }
        .boxed()
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::fmt::Debug;
    use std::sync::Mutex;

    use tracing::field::{Field, Visit};
    use tracing::span::{Attributes, Id, Record};
    use tracing::Subscriber;
    use tracing_subscriber::layer::{Context, SubscriberExt};
    use tracing_subscriber::Layer;

    use super::*;
    use crate::handler::handler_fn;
    use crate::handler::middleware::test_support::{counting_mark, message, panicking};

    #[derive(Default, Clone)]
    struct SpanRecorder {
        fields: Arc<Mutex<HashMap<String, String>>>,
        closed: Arc<Mutex<usize>>,
    }

    struct Collect<'a>(&'a mut HashMap<String, String>);

    impl Visit for Collect<'_> {
        fn record_debug(&mut self, field: &Field, value: &dyn Debug) {
            self.0.insert(field.name().to_string(), format!("{:?}", value));
        }
    }

    impl<S: Subscriber> Layer<S> for SpanRecorder {
        fn on_new_span(&self, attrs: &Attributes<'_>, _id: &Id, _ctx: Context<'_, S>) {
            attrs.record(&mut Collect(&mut self.fields.lock().unwrap()));
        }

        fn on_record(&self, _id: &Id, values: &Record<'_>, _ctx: Context<'_, S>) {
            values.record(&mut Collect(&mut self.fields.lock().unwrap()));
        }

        fn on_close(&self, _id: Id, _ctx: Context<'_, S>) {
            *self.closed.lock().unwrap() += 1;
        }
    }

    #[tokio::test]
    async fn span_carries_coordinates_and_error() {
        let recorder = SpanRecorder::default();
        let subscriber = tracing_subscriber::registry().with(recorder.clone());
        let _guard = tracing::subscriber::set_default(subscriber);

        let handler = trace(handler_fn(|_, _| async { Err("payment declined".into()) }));
        let (mark, _) = counting_mark();
        let result = handler(message(3, 42), mark).await;
        assert!(result.is_err());

        let fields = recorder.fields.lock().unwrap().clone();
        assert_eq!(fields.get("topic").map(String::as_str), Some("orders"));
        assert_eq!(fields.get("partition").map(String::as_str), Some("3"));
        assert_eq!(fields.get("offset").map(String::as_str), Some("42"));
        assert!(fields.contains_key("timestamp"));
        assert_eq!(
            fields.get("error").map(String::as_str),
            Some("payment declined")
        );
        assert_eq!(*recorder.closed.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn span_is_closed_when_handler_panics() {
        let recorder = SpanRecorder::default();
        let subscriber = tracing_subscriber::registry().with(recorder.clone());
        let _guard = tracing::subscriber::set_default(subscriber);

        let handler = trace(panicking(|| "bad payload"));
        let (mark, _) = counting_mark();
        let outcome = crate::utils::catch_panic(handler(message(0, 1), mark)).await;
        assert!(outcome.is_err());
        assert_eq!(*recorder.closed.lock().unwrap(), 1);
        assert!(!recorder.fields.lock().unwrap().contains_key("error"));
    }
}
