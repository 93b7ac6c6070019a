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

pub mod group_consume;
pub mod handler;
pub mod message;
pub mod service;
mod utils;

pub use group_consume::{ConsumerModule, GroupConsumer, MemoryCluster, PrefixRegistry};
pub use handler::{chain, handler_fn, HandlerFunc, HandlerResult, MarkFn, Middleware};
pub use message::{Header, Message, TopicPartition};
pub use service::{
    setup_local_tracing, setup_tracing, AppConfig, AppError, AppResult, BoxError, ClusterConfig,
    ConsumerConfig, Module, OtelGuard, Runner, Shutdown, ShutdownReason,
};
pub use utils::{capture_stack, catch_panic, panic_error, panic_message, MAX_STACK_BYTES};
