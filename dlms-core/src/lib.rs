//! Core types shared by the DLMS/COSEM HDLC link layer
//!
//! This crate provides the error type used by the transport and session crates.

pub mod error;

pub use error::{DlmsError, DlmsResult};
