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

use std::fmt;

pub type AppResult<T> = Result<T, AppError>;

/// Boxed error returned by user handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// a required option is missing or has an invalid value
    #[error("config error: {0}")]
    Config(String),

    #[error("config file error: {0}")]
    ConfigFile(#[from] config::ConfigError),

    /// the coordinator could not be reached when the consumer was initialised
    #[error("connection error: {0}")]
    Connection(String),

    /// protocol or session error surfaced by the coordinator while consuming
    #[error("coordinator error: {0}")]
    Coordinator(String),

    /// a handler error escaped the middleware chain and stopped the session
    #[error("handler error: {0}")]
    Handler(#[source] BoxError),

    #[error("metrics error: {0}")]
    Metrics(String),

    #[error("panic: {message}\n{stack}")]
    Panic { message: String, stack: String },

    #[error("illegal state: {0}")]
    IllegalState(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{}", AggregateDisplay(.0))]
    Aggregate(Vec<AppError>),
}

impl AppError {
    /// Folds a list of errors into one, `None` when the list is empty.
    pub fn aggregate(mut errors: Vec<AppError>) -> Option<AppError> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(AppError::Aggregate(errors)),
        }
    }

    pub fn is_config(&self) -> bool {
        matches!(self, AppError::Config(_) | AppError::ConfigFile(_))
    }
}

struct AggregateDisplay<'a>(&'a [AppError]);

impl fmt::Display for AggregateDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} errors occurred:", self.0.len())?;
        for err in self.0 {
            write!(f, "\n\t* {}", err)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_collapses_small_lists() {
        assert!(AppError::aggregate(vec![]).is_none());

        let single = AppError::aggregate(vec![AppError::Metrics("dup".into())]).unwrap();
        assert!(matches!(single, AppError::Metrics(_)));

        let many = AppError::aggregate(vec![
            AppError::Metrics("dup".into()),
            AppError::Coordinator("gone".into()),
        ])
        .unwrap();
        let text = many.to_string();
        assert!(text.starts_with("2 errors occurred:"));
        assert!(text.contains("metrics error: dup"));
        assert!(text.contains("coordinator error: gone"));
    }
}
