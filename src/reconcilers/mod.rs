// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Reconciliation logic for the `TurndownSchedule` resource.

pub mod retry;
pub mod turndown_schedule;

pub use turndown_schedule::{cleanup_schedule, reconcile_turndown_schedule};
