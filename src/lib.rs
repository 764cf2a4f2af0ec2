//! Catalog a local CMIP5 replica tree and reconcile it against the ESGF archive.
//!
//! The flow is: candidate paths (a manifest, a directory walk or an ESGF wget
//! script) are parsed into dataset identifiers, filtered by a
//! [`constraints::ConstraintSet`], folded into canonical records, and finally
//! compared with the requested variable/model/experiment space.

pub mod app;
pub mod catalog;
pub mod config;
pub mod constraints;
pub mod domain;
pub mod error;
pub mod esgf;
pub mod freshness;
pub mod frequency;
pub mod listing;
pub mod output;
pub mod reconcile;
pub mod store;
