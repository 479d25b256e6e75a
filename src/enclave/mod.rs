//! The enclave process: key custody behind a local IPC boundary
//!
//! In this system "enclave" means a separate hardened OS process, not an
//! SGX/TEE enclave. It owns the server identity and every session key and
//! performs all AEAD and ECDH operations on the gateway's behalf; the
//! gateway never observes a plaintext key.

pub mod hardening;
pub mod key_manager;
pub mod main;
pub mod service;
