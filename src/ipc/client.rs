//! Gateway-side enclave client
//!
//! Owns the connected Unix stream and the monotonic request id. Every call
//! is one strictly paired request/response exchange; the response id must
//! echo the request id or the connection is considered corrupt.

use crate::crypto::keys::SessionKey;
use crate::crypto::{KEY_SIZE, NONCE_SIZE, TAG_SIZE};
use crate::ipc::protocol::{Command, IpcError, Request, Response, MAX_DATA_LEN};
use std::net::Ipv4Addr;
use std::path::Path;
use tokio::net::UnixStream;
use zeroize::Zeroize;

pub struct EnclaveClient {
    stream: UnixStream,
    next_request_id: u32,
}

impl EnclaveClient {
    pub async fn connect<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let stream = UnixStream::connect(path.as_ref()).await?;
        tracing::info!("connected to enclave at {}", path.as_ref().display());
        Ok(Self {
            stream,
            next_request_id: 0,
        })
    }

    /// One request/response exchange
    ///
    /// Transport failures bubble up as-is; a failure status from the
    /// enclave becomes [`IpcError::Refused`] so callers can tell a dropped
    /// packet from a dead enclave.
    async fn call(
        &mut self,
        command: Command,
        vpn_ip: Ipv4Addr,
        data: Vec<u8>,
    ) -> Result<Response, IpcError> {
        if data.len() > MAX_DATA_LEN {
            return Err(IpcError::DataTooLarge(data.len()));
        }

        self.next_request_id = self.next_request_id.wrapping_add(1);
        let request = Request {
            command,
            request_id: self.next_request_id,
            vpn_ip,
            data,
        };
        request.write_to(&mut self.stream).await?;

        let response = Response::read_from(&mut self.stream).await?;
        if response.request_id != request.request_id {
            return Err(IpcError::Protocol(format!(
                "response id {} does not match request id {}",
                response.request_id, request.request_id
            )));
        }
        if response.status != 0 {
            return Err(IpcError::Refused(command));
        }
        Ok(response)
    }

    pub async fn ping(&mut self) -> Result<(), IpcError> {
        self.call(Command::Ping, Ipv4Addr::UNSPECIFIED, Vec::new())
            .await?;
        Ok(())
    }

    pub async fn add_key(&mut self, vpn_ip: Ipv4Addr, key: &SessionKey) -> Result<(), IpcError> {
        self.call(Command::AddKey, vpn_ip, key.as_bytes().to_vec())
            .await?;
        Ok(())
    }

    pub async fn remove_key(&mut self, vpn_ip: Ipv4Addr) -> Result<(), IpcError> {
        self.call(Command::RemoveKey, vpn_ip, Vec::new()).await?;
        Ok(())
    }

    /// Runs the ECDH handshake for one client
    ///
    /// Returns the enclave's public key. The enclave also returns the
    /// derived session key in the same response; the gateway has no use
    /// for it and lets it drop on the floor, so the key never outlives
    /// this call outside the enclave.
    pub async fn handshake(
        &mut self,
        vpn_ip: Ipv4Addr,
        client_public: &[u8; 32],
    ) -> Result<[u8; 32], IpcError> {
        let response = self
            .call(Command::Handshake, vpn_ip, client_public.to_vec())
            .await?;
        if response.data.len() != 2 * KEY_SIZE {
            return Err(IpcError::Protocol(format!(
                "handshake response has {} bytes, expected {}",
                response.data.len(),
                2 * KEY_SIZE
            )));
        }
        let mut server_public = [0u8; 32];
        server_public.copy_from_slice(&response.data[..KEY_SIZE]);
        // the trailing session key copy is discarded unused; scrub it
        let mut data = response.data;
        data.zeroize();
        Ok(server_public)
    }

    pub async fn encrypt(
        &mut self,
        vpn_ip: Ipv4Addr,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, IpcError> {
        let response = self
            .call(Command::Encrypt, vpn_ip, plaintext.to_vec())
            .await?;
        if response.data.len() < NONCE_SIZE + TAG_SIZE {
            return Err(IpcError::Protocol(
                "encrypt response shorter than nonce + tag".to_string(),
            ));
        }
        Ok(response.data)
    }

    pub async fn decrypt(
        &mut self,
        vpn_ip: Ipv4Addr,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, IpcError> {
        let response = self
            .call(Command::Decrypt, vpn_ip, ciphertext.to_vec())
            .await?;
        Ok(response.data)
    }

    pub async fn shutdown(&mut self) -> Result<(), IpcError> {
        self.call(Command::Shutdown, Ipv4Addr::UNSPECIFIED, Vec::new())
            .await?;
        Ok(())
    }
}
