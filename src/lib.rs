//! Course progress, certificate eligibility and instructor analytics for a
//! safety-training service.
//!
//! Every operation takes the acting learner's id explicitly and talks to
//! persistence through [`store::DocumentStore`]. The HTTP layer in
//! [`routes`] is a thin adapter over these functions.

pub mod access;
pub mod analytics;
pub mod certificate;
pub mod completion;
pub mod config;
pub mod courses;
pub mod db;
pub mod error;
pub mod learners;
pub mod models;
pub mod notify;
pub mod progress;
pub mod quiz;
pub mod routes;
pub mod scoring;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;
