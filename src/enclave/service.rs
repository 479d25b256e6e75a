//! Enclave IPC server
//!
//! Single-task loop over a Unix listener. Connections are drained one at a
//! time (serialized accept): the gateway is itself single-threaded, so at
//! most one peer is ever active and a second connector simply waits its
//! turn. Within a connection, requests are processed strictly in arrival
//! order.

use crate::crypto::aead::SessionCipher;
use crate::crypto::keys::SessionKey;
use crate::crypto::{KEY_SIZE, NONCE_SIZE, TAG_SIZE};
use crate::enclave::key_manager::KeyManager;
use crate::ipc::protocol::{Command, IpcError, Request, Response};
use std::path::PathBuf;
use tokio::net::{UnixListener, UnixStream};

pub struct EnclaveService {
    socket_path: PathBuf,
    keys: KeyManager,
    running: bool,
}

impl EnclaveService {
    pub fn new(socket_path: PathBuf, keys: KeyManager) -> Self {
        Self {
            socket_path,
            keys,
            running: true,
        }
    }

    pub async fn run(&mut self) -> crate::Result<()> {
        // a stale socket file from an unclean exit would fail the bind
        let _ = std::fs::remove_file(&self.socket_path);
        let listener = UnixListener::bind(&self.socket_path)?;
        tracing::info!("enclave listening on {}", self.socket_path.display());

        while self.running {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("signal received, shutting down");
                    self.running = false;
                }

                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, _)) => {
                            tracing::debug!("gateway connected");
                            self.serve_connection(stream).await;
                            tracing::debug!("gateway disconnected");
                        }
                        Err(e) => {
                            tracing::warn!("accept failed: {}", e);
                        }
                    }
                }
            }
        }

        let _ = std::fs::remove_file(&self.socket_path);
        tracing::info!("enclave stopped");
        Ok(())
    }

    /// Drains one gateway connection until it closes, errors, or a
    /// shutdown is requested
    async fn serve_connection(&mut self, mut stream: UnixStream) {
        loop {
            let request = tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("signal received, shutting down");
                    self.running = false;
                    return;
                }
                request = Request::read_from(&mut stream) => request,
            };

            let request = match request {
                Ok(request) => request,
                Err(IpcError::PeerGone) => return,
                Err(e) => {
                    tracing::warn!("dropping connection: {}", e);
                    return;
                }
            };

            tracing::debug!(
                "request {} id={} ip={} len={}",
                request.command,
                request.request_id,
                request.vpn_ip,
                request.data.len()
            );

            let response = self.dispatch(request);
            if let Err(e) = response.write_to(&mut stream).await {
                tracing::warn!("response write failed: {}", e);
                return;
            }

            // a SHUTDOWN was acknowledged; tear down after the reply
            if !self.running {
                return;
            }
        }
    }

    fn dispatch(&mut self, request: Request) -> Response {
        let id = request.request_id;
        match request.command {
            Command::Ping => Response::success(id, Vec::new()),

            Command::AddKey => {
                let key_bytes: [u8; KEY_SIZE] = match request.data.as_slice().try_into() {
                    Ok(bytes) => bytes,
                    Err(_) => {
                        tracing::warn!("add_key with {} data bytes", request.data.len());
                        return Response::failure(id);
                    }
                };
                match self.keys.add_key(request.vpn_ip, SessionKey::from_bytes(key_bytes)) {
                    Ok(()) => Response::success(id, Vec::new()),
                    Err(e) => {
                        tracing::warn!("add_key failed: {}", e);
                        Response::failure(id)
                    }
                }
            }

            Command::RemoveKey => {
                self.keys.remove_key(request.vpn_ip);
                Response::success(id, Vec::new())
            }

            Command::Encrypt => {
                // sealing adds nonce + tag; the response must stay under
                // the data cap
                if request.data.len() > crate::ipc::protocol::MAX_DATA_LEN - NONCE_SIZE - TAG_SIZE {
                    tracing::warn!("encrypt with {} data bytes", request.data.len());
                    return Response::failure(id);
                }
                let Some(key) = self.keys.get_key(request.vpn_ip) else {
                    tracing::warn!("encrypt without key for {}", request.vpn_ip);
                    return Response::failure(id);
                };
                let cipher = SessionCipher::new(key);
                let mut data = request.data;
                match cipher.seal(&mut data) {
                    Ok(()) => Response::success(id, data),
                    Err(e) => {
                        tracing::warn!("encrypt failed: {}", e);
                        Response::failure(id)
                    }
                }
            }

            Command::Decrypt => {
                let Some(key) = self.keys.get_key(request.vpn_ip) else {
                    tracing::warn!("decrypt without key for {}", request.vpn_ip);
                    return Response::failure(id);
                };
                if request.data.len() < NONCE_SIZE + TAG_SIZE {
                    tracing::warn!("decrypt with {} data bytes", request.data.len());
                    return Response::failure(id);
                }
                let cipher = SessionCipher::new(key);
                let mut data = request.data;
                match cipher.open(&mut data) {
                    Ok(()) => Response::success(id, data),
                    Err(_) => {
                        // authentication failure; no plaintext leaves here
                        tracing::debug!("decrypt failed for {}", request.vpn_ip);
                        Response::failure(id)
                    }
                }
            }

            Command::Handshake => {
                let client_public: [u8; KEY_SIZE] = match request.data.as_slice().try_into() {
                    Ok(bytes) => bytes,
                    Err(_) => {
                        tracing::warn!("handshake with {} data bytes", request.data.len());
                        return Response::failure(id);
                    }
                };
                match self.keys.handshake(request.vpn_ip, &client_public) {
                    Ok((server_public, session_key)) => {
                        let mut data = Vec::with_capacity(2 * KEY_SIZE);
                        data.extend_from_slice(&server_public);
                        data.extend_from_slice(session_key.as_bytes());
                        tracing::info!("handshake complete for {}", request.vpn_ip);
                        Response::success(id, data)
                    }
                    Err(e) => {
                        tracing::warn!("handshake failed for {}: {}", request.vpn_ip, e);
                        Response::failure(id)
                    }
                }
            }

            Command::Shutdown => {
                tracing::info!("shutdown requested");
                self.running = false;
                Response::success(id, Vec::new())
            }
        }
    }
}
