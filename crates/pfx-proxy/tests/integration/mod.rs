//! Integration test support for pfx-proxy.

pub mod common;
