//! Local IPC between the gateway and the enclave
//!
//! A blocking-style framed request/response protocol over a Unix stream
//! socket. Requests are strictly serialized: one outstanding request per
//! connection, the next is not written until the previous response has
//! been fully read.

pub mod client;
pub mod protocol;
