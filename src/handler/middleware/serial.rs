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
use tokio::sync::Mutex;

use crate::handler::{HandlerFunc, MarkFn};
use crate::message::Message;

/// Serializes calls to the inner handler. Every clone of the returned handler
/// shares one lock, so partition workers sharing it take turns.
pub fn serial(next: HandlerFunc) -> HandlerFunc {
    let lock = Arc::new(Mutex::new(()));
    Arc::new(move |message: Arc<Message>, mark: MarkFn| {
        let next = next.clone();
        let lock = lock.clone();
        async move {
            let _guard = lock.lock().await;
            next(message, mark).await
        }
        .boxed()
    })
}
