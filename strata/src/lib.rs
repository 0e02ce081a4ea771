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

//! strata - a concurrent in-memory cache with W-TinyLFU admission and eviction.
//!
//! ```
//! use strata::{Cache, CacheBuilder};
//!
//! let cache: Cache<u64, String> = CacheBuilder::new(100).build().unwrap();
//! cache.insert(1, "one".to_string());
//! assert_eq!(cache.get(&1).as_deref(), Some("one"));
//!
//! let value = cache.get_or_add(2, |k| Ok::<_, anyhow::Error>(k.to_string())).unwrap();
//! assert_eq!(value, "2");
//! ```

pub use strata_common as common;
pub use strata_memory as memory;

mod prelude;
pub use prelude::*;
