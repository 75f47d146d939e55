// Copyright 2025 cmdrelay Authors
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

//! # cmdrelay CLI
//!
//! Command-line interface for the cmdrelay broker.
//!
//! - `cmdrelay broker`: run the broker
//! - `cmdrelay call`: send one command as an orchestrator (raw JSON output)
//! - `cmdrelay status`: connected clients and pending commands
//! - `cmdrelay history`: recently routed commands
//!
//! `status` and `history` read the broker's HTTP views through [`inspect`].

pub mod inspect;
