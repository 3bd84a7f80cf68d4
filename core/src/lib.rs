//! Core of the macrotrack macro tracker.
//!
//! The local SQLite store is the source of truth on a device. The [`sync::SyncEngine`]
//! mirrors goals and log entries into a per-principal remote document namespace and
//! pulls back entries the device has not seen yet.

pub mod connectivity;
pub mod db;
pub mod identity;
pub mod local;
pub mod models;
pub mod openfoodfacts;
pub mod remote;
pub mod service;
pub mod sync;
