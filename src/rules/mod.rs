// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

//! Declarative fingerprint model and the process-wide rule store.

pub mod loader;
pub mod model;

pub use loader::{RuleInput, RuleStore};
pub use model::{Fingerprint, NamedRule, Rule, RuleRequest};
