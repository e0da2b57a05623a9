// Copyright 2021 Locha Mesh Developers <contact@locha.io>
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

//! Wire-level codecs for the two dialects a bootloader might speak.
//!
//! Neither module knows about the other, and neither owns a transport or
//! session state — they're handed one by `&mut` reference per call, which is
//! what lets [`crate::programmer::Session`] treat them uniformly behind a
//! single surface.

pub mod v1;
pub mod v2;
