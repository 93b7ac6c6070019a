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

use std::any::{type_name, Any};
use std::backtrace::Backtrace;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;

use crate::AppError;

/// Upper bound on the captured stack trace.
pub const MAX_STACK_BYTES: usize = 64 * 1024;

/// Renders a panic payload. `&str` and `String` payloads cover `panic!` and
/// `std::panic::panic_any` with an error's message.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else if let Some(err) = payload.downcast_ref::<Box<dyn std::error::Error + Send + Sync>>() {
        err.to_string()
    } else {
        format!("panic with an unknown payload type: {}", type_name_of(payload))
    }
}

fn type_name_of<T: ?Sized>(_: &T) -> &'static str {
    type_name::<T>()
}

/// Captures the current stack, truncated to [`MAX_STACK_BYTES`].
pub fn capture_stack() -> String {
    let mut stack = Backtrace::force_capture().to_string();
    if stack.len() > MAX_STACK_BYTES {
        let mut cut = MAX_STACK_BYTES;
        while !stack.is_char_boundary(cut) {
            cut -= 1;
        }
        stack.truncate(cut);
    }
    stack
}

pub fn panic_error(payload: Box<dyn Any + Send>) -> AppError {
    AppError::Panic {
        message: panic_message(payload.as_ref()),
        stack: capture_stack(),
    }
}

/// Polls `fut` to completion, turning a panic into [`AppError::Panic`].
pub async fn catch_panic<F, T>(fut: F) -> Result<T, AppError>
where
    F: Future<Output = T>,
{
    AssertUnwindSafe(fut).catch_unwind().await.map_err(panic_error)
}
