//! Label Inspector - production-line label inspection
//!
//! Locates a product label in a camera frame, straightens it, reads its
//! text and barcodes and scores the read against a reference catalog entry.
//! An [`inspection::InspectionSession`] wraps the single-frame
//! [`inspection::Pipeline`] in a bounded number of validation attempts.

pub mod analysis;
pub mod capture;
pub mod config;
pub mod error;
pub mod inspection;
pub mod storage;
pub mod vision;

#[cfg(test)]
mod test_utils;
