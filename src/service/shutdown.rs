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

use tokio::sync::broadcast;

/// What caused a shutdown to begin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// external cancellation, e.g. ctrl-c
    Signal,
    /// the named module returned from `run`
    ModuleExited(String),
}

/// Listens for the shutdown broadcast. Once a reason has been received every
/// further `recv` returns it immediately.
#[derive(Debug)]
pub struct Shutdown {
    reason: Option<ShutdownReason>,
    notify: broadcast::Receiver<ShutdownReason>,
}

impl Shutdown {
    pub fn new(notify: broadcast::Receiver<ShutdownReason>) -> Shutdown {
        Shutdown {
            reason: None,
            notify,
        }
    }
    pub fn is_shutdown(&self) -> bool {
        self.reason.is_some()
    }

    /// Waits for the first reason. `None` once every sender is gone without
    /// one being sent.
    pub async fn recv(&mut self) -> Option<ShutdownReason> {
        if let Some(reason) = &self.reason {
            return Some(reason.clone());
        }
        loop {
            match self.notify.recv().await {
                Ok(reason) => {
                    self.reason = Some(reason.clone());
                    return Some(reason);
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
