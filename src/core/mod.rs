//! Core module containing the harness engine
//!
//! This module provides:
//! - Transport layer for the console (pseudoterminal, loopback)
//! - Console buffer with blocking forward search
//! - Device session with send/expect
//! - Line logger for console output
//! - Mock network services
//! - Test sequencer

pub mod logger;
pub mod sequencer;
pub mod services;
pub mod session;
pub mod stream;
pub mod transport;
