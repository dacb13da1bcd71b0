/*
 * 5D Labs Machine Deletion Remediation - Kubernetes Node Remediation Controller
 * Copyright (C) 2025 5D Labs
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published
 * by the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 */

#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc, clippy::doc_markdown)]

//! Machine deletion remediation controller
//!
//! Remediates an unhealthy node by deleting the Machine that created it, so the
//! owning MachineSet provisions a healthy replacement. The controller only acts on
//! `MachineDeletionRemediation` requests created by an external health checker.

pub mod crds;
pub mod machine;
pub mod tasks;

// Re-export commonly used types
pub use crds::{
    MachineDeletionRemediation, MachineDeletionRemediationSpec, MachineDeletionRemediationStatus,
};
pub use machine::{Machine, MachineKey};
pub use tasks::config::ControllerConfig;
pub use tasks::{run_remediation_controller, Error, Result};
