// Copyright 2026 foyer Project Authors
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

//! In-memory engine of strata: a concurrent cache with W-TinyLFU admission and eviction.

/// Read and write event buffers.
pub mod buffer;
mod cache;
/// Queues, partition and routing of the TinyLFU policy, and entry expiry.
pub mod eviction;
mod prelude;
mod raw;
/// Cache entries and their flags.
pub mod record;
/// Where maintenance passes run.
pub mod scheduler;
mod scoped_cache;
/// Count-min frequency sketch.
pub mod sketch;
/// Single-flight initialization and reference counted disposal.
pub mod sync;

/// Utilities for testing.
#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;

pub use prelude::*;
