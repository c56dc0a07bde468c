//! Fan-out paper search across metadata providers and resilient PDF
//! acquisition with page-bounded text extraction.

pub mod acquire;
pub mod apis;
pub mod config;
pub mod extract;
pub mod search;
