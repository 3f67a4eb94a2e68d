//! FiberWatch - operator-gated customer notifications for optical-line faults.
//!
//! # Overview
//!
//! The network-management system raises an alert whenever a PON port loses
//! power or optical signal. FiberWatch lists those alerts, resolves each one
//! into the subscribers it affects, and lets an operator decide whether the
//! subscribers get a notification through the messaging vendor.
//!
//! Once an incident is approved, its physical fault (OLT, PON slot and alert
//! type) is suppressed for 24 hours, so the same outage re-raised under a new
//! alert id does not notify anyone twice.
//!
//! # Modules
//!
//! - [`model`]: Incidents, signatures, decisions and audit records
//! - [`phone`]: Contact normalization
//! - [`data_sources`]: Alert API session and messaging vendor clients
//! - [`resolver`]: Alert to snapshot plus affected subscribers
//! - [`dispatch`]: Notification fan-out
//! - [`feed`]: Open-incident feed and history view
//! - [`workflow`]: Approve / deny state machine
//! - [`storage`]: SQLite storage layer
//! - [`api`]: HTTP API handlers

pub mod api;
pub mod config;
pub mod data_sources;
pub mod dispatch;
pub mod error;
pub mod feed;
pub mod model;
pub mod phone;
pub mod resolver;
pub mod storage;
pub mod workflow;

#[cfg(test)]
mod testing;
