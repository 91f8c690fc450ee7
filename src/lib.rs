//! Scheduled LM-driven markdown heading groomer.
//!
//! Scans a corpus of markdown documents, detects which ones changed since
//! the last run via a persisted fingerprint ledger, and sends each changed
//! document to the Gemini API under a headings-only transformation
//! contract, rewriting the file in place only when the output differs.

pub mod config;
pub mod gemini;
pub mod ledger;
pub mod locate;
pub mod pipeline;
pub mod util;
