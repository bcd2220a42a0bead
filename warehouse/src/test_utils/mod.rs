//! In-memory doubles for testing code built on the warehouse drivers.
//!
//! [`fake::FakeNativeClient`] stands in for the Google Cloud client. Replies are scripted per
//! call kind and every submitted query is recorded, so tests can drive a full
//! connector → connection → statement → rows flow without network access.

pub mod fake;
