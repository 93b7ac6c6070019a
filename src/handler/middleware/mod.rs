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

//! Middleware primitives. Each takes the next [`HandlerFunc`] and returns a
//! wrapped one; parameterised middleware are constructors returning such a
//! function.
//!
//! [`HandlerFunc`]: super::HandlerFunc

mod duration;
mod log;
mod mark;
mod multi_partition;
mod recover;
mod retry;
mod serial;
mod trace;

pub use duration::{duration, duration_metric};
pub use log::log;
pub use mark::{ignore_errors, mark, mark_if_no_error};
pub use multi_partition::multi_partition_mark;
pub use recover::recover;
pub use retry::{common_defaults_with_retry, retry};
pub use serial::serial;
pub use trace::trace;

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use crate::handler::{handler_fn, mark_fn, HandlerFunc, MarkFn};
    use crate::message::Message;

    pub fn message(partition: i32, offset: i64) -> Arc<Message> {
        Arc::new(Message::new("orders", partition, offset, "key", "value"))
    }

    /// A mark callback plus the number of times it was invoked.
    pub fn counting_mark() -> (MarkFn, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = count.clone();
        (
            mark_fn(move |_| {
                inner.fetch_add(1, Ordering::SeqCst);
            }),
            count,
        )
    }

    /// A handler that panics with the payload built by `make`.
    pub fn panicking<F, P>(make: F) -> HandlerFunc
    where
        F: Fn() -> P + Send + Sync + 'static,
        P: std::any::Any + Send + 'static,
    {
        let make = Arc::new(make);
        handler_fn(move |message, _| {
            let make = make.clone();
            async move {
                if message.offset >= 0 {
                    std::panic::panic_any(make());
                }
                Ok(())
            }
        })
    }
}
