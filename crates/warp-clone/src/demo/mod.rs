// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Demo vocabularies built on the clone engine.

/// Arena-backed animator graph with one clone kind per node kind.
pub mod animator;
