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

use std::collections::HashMap;
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::Mutex;

use crate::handler::{mark_fn, HandlerFunc, MarkFn};
use crate::message::{Message, TopicPartition};

/// Keeps the latest mark callback of every partition seen. The handler gets a
/// replacement callback which, when called, invokes and clears every pending
/// callback with the given metadata. Used to mark a batch assembled from
/// several partitions in one go.
///
/// The flush happens whenever the handler calls the replacement callback, even
/// if it goes on to return an error.
pub fn multi_partition_mark(next: HandlerFunc) -> HandlerFunc {
    let pending: Arc<Mutex<HashMap<TopicPartition, MarkFn>>> = Arc::new(Mutex::new(HashMap::new()));
    Arc::new(move |message: Arc<Message>, mark: MarkFn| {
        let next = next.clone();
        pending.lock().insert(message.topic_partition(), mark);

        let table = pending.clone();
        let flush_all = mark_fn(move |metadata| {
            let marks: Vec<MarkFn> = table.lock().drain().map(|(_, mark)| mark).collect();
            for mark in marks {
                mark(metadata);
            }
        });
        async move { next(message, flush_all).await }.boxed()
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::handler::handler_fn;
    use crate::handler::middleware::test_support::message;

    #[tokio::test]
    async fn flush_marks_every_pending_partition() {
        const PARTITIONS: usize = 5;
        const ROUNDS: i64 = 10;

        // only partition 2's handler calls mark
        let handler = multi_partition_mark(handler_fn(|message, mark| async move {
            if message.partition == 2 {
                mark("");
            }
            Ok(())
        }));

        let counts: Vec<Arc<AtomicUsize>> =
            (0..PARTITIONS).map(|_| Arc::new(AtomicUsize::new(0))).collect();
        for offset in 0..ROUNDS {
            for (partition, count) in counts.iter().enumerate() {
                let count = count.clone();
                let mark = mark_fn(move |_| {
                    count.fetch_add(1, Ordering::SeqCst);
                });
                handler(message(partition as i32, offset), mark)
                    .await
                    .unwrap();
            }
        }

        let marked: Vec<usize> = counts.iter().map(|c| c.load(Ordering::SeqCst)).collect();
        assert_eq!(marked, vec![10, 10, 10, 9, 9]);
    }

    #[tokio::test]
    async fn flush_passes_metadata_and_survives_handler_error() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let handler = multi_partition_mark(handler_fn(|message, mark| async move {
            if message.partition == 1 {
                mark("batch-7");
                return Err("sink rejected batch".into());
            }
            Ok(())
        }));

        for partition in 0..2 {
            let seen = seen.clone();
            let mark = mark_fn(move |metadata| seen.lock().push((partition, metadata.to_string())));
            let _ = handler(message(partition, 0), mark).await;
        }

        let mut seen = seen.lock().clone();
        seen.sort();
        assert_eq!(
            seen,
            vec![(0, "batch-7".to_string()), (1, "batch-7".to_string())]
        );
    }
}
