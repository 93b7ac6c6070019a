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

use std::error::Error;

use crate::BoxError;

/// Tags an error as worth retrying.
#[derive(Debug, thiserror::Error)]
#[error("{source}")]
pub struct RetryableError {
    #[source]
    source: BoxError,
}

/// Tags an error as safe to mark the offset for despite the failure.
#[derive(Debug, thiserror::Error)]
#[error("{source}")]
pub struct MarkableError {
    #[source]
    source: BoxError,
}

pub fn retryable<E: Into<BoxError>>(err: E) -> BoxError {
    Box::new(RetryableError { source: err.into() })
}

pub fn markable<E: Into<BoxError>>(err: E) -> BoxError {
    Box::new(MarkableError { source: err.into() })
}

fn chain_contains<T: Error + 'static>(err: &(dyn Error + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if e.is::<T>() {
            return true;
        }
        current = e.source();
    }
    false
}

/// True when any error in the `source()` chain carries the retryable tag.
pub fn is_retryable(err: &(dyn Error + 'static)) -> bool {
    chain_contains::<RetryableError>(err)
}

/// True when any error in the `source()` chain carries the markable tag.
pub fn is_markable(err: &(dyn Error + 'static)) -> bool {
    chain_contains::<MarkableError>(err)
}
