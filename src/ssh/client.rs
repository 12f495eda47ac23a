use russh::ChannelMsg;
use russh::client::{Config, Handle, Handler};
use russh::keys::PrivateKey;
use russh_sftp::{client::SftpSession, protocol::OpenFlags};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::ssh::errors::SshError;
use crate::ssh::output::OutputHandler;

const CHUNK_SIZE: usize = 32768;

pub struct ClientHandler;

impl Handler for ClientHandler {
    type Error = russh::Error;

    // The box is recreated often and gets a fresh host key each time, so
    // there is nothing stable to pin against.
    async fn check_server_key(&mut self, _: &russh::keys::PublicKey) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// Hands channel output to the matching handler. Returns the exit status when
/// `msg` carries one.
fn route_message<F, G>(
    msg: &ChannelMsg,
    stdout_handler: &mut F,
    stderr_handler: &mut G,
) -> Option<u32>
where
    F: FnMut(&[u8]),
    G: FnMut(&[u8]),
{
    match msg {
        ChannelMsg::Data { data } => {
            stdout_handler(&data[..]);
            None
        }
        ChannelMsg::ExtendedData { data, ext: 1 } => {
            stderr_handler(&data[..]);
            None
        }
        ChannelMsg::ExitStatus { exit_status } => Some(*exit_status),
        _ => None,
    }
}

pub struct Client {
    handle: Handle<ClientHandler>,
    logger: Option<Arc<dyn OutputHandler>>,
}

impl Client {
    /// Opens a session to `host:port` and authenticates with the private key
    /// at `key_file`.
    pub async fn connect(
        host: &str,
        port: u16,
        username: &str,
        key_file: &Path,
        logger: Option<Arc<dyn OutputHandler>>,
    ) -> Result<Self, SshError> {
        let config = Arc::new(Config::default());
        let addr = tokio::net::lookup_host((host, port))
            .await?
            .next()
            .ok_or_else(|| SshError::Address(format!("{}:{} did not resolve", host, port)))?;

        debug!(%addr, username, "opening ssh session");
        let mut handle = russh::client::connect(config, addr, ClientHandler).await?;

        let key = russh::keys::load_secret_key(key_file, None)?;
        Client::auth_with_key(key, username, &mut handle).await?;

        info!(host, username, "ssh session authenticated");
        Ok(Self { handle, logger })
    }

    async fn auth_with_key(
        key: PrivateKey,
        username: &str,
        handle: &mut Handle<ClientHandler>,
    ) -> Result<(), SshError> {
        let key = Arc::new(key);
        let hash = handle.best_supported_rsa_hash().await?.ok_or_else(|| {
            SshError::AuthenticationFailed("No suitable RSA hash algorithm found".to_string())
        })?;

        let auth_res = handle
            .authenticate_publickey(username, russh::keys::PrivateKeyWithHashAlg::new(key, hash))
            .await?;

        match auth_res.success() {
            true => Ok(()),
            false => Err(SshError::AuthenticationFailed(format!(
                "key was not accepted for user {}",
                username
            ))),
        }
    }

    pub async fn disconnect(&self) -> Result<(), SshError> {
        self.handle
            .disconnect(russh::Disconnect::ByApplication, "", "")
            .await?;
        Ok(())
    }

    /// Runs `command` remotely, feeding output to the handlers as it arrives.
    /// Returns the remote exit status.
    pub async fn execute<F, G>(
        &self,
        command: &str,
        mut stdout_handler: F,
        mut stderr_handler: G,
    ) -> Result<u32, SshError>
    where
        F: FnMut(&[u8]) + Send,
        G: FnMut(&[u8]) + Send,
    {
        debug!(command, "exec");
        let mut channel = self.handle.channel_open_session().await?;
        channel.exec(true, command).await?;

        let mut exit_status = None;

        while let Some(msg) = channel.wait().await {
            if let Some(code) = route_message(&msg, &mut stdout_handler, &mut stderr_handler) {
                exit_status = Some(code);
            }
        }

        exit_status.ok_or_else(|| {
            SshError::Command(format!("`{}` ended without an exit status", command))
        })
    }

    /// Like `execute`, streaming to the local terminal and the optional log
    pub async fn execute_and_print(&self, command: &str) -> Result<u32, SshError> {
        let logger = self.logger.clone();
        let err_logger = self.logger.clone();

        let stdout_handler = move |data: &[u8]| {
            let mut out = std::io::stdout().lock();
            if let Err(e) = out.write_all(data).and_then(|_| out.flush()) {
                warn!(error = %e, "failed to write stdout");
            }
            if let Some(logger) = &logger {
                if let Err(e) = logger.stdout(data) {
                    warn!(error = %e, "failed to log stdout");
                }
            }
        };

        let stderr_handler = move |data: &[u8]| {
            let mut err = std::io::stderr().lock();
            if let Err(e) = err.write_all(data).and_then(|_| err.flush()) {
                warn!(error = %e, "failed to write stderr");
            }
            if let Some(logger) = &err_logger {
                if let Err(e) = logger.stderr(data) {
                    warn!(error = %e, "failed to log stderr");
                }
            }
        };

        self.execute(command, stdout_handler, stderr_handler).await
    }

    async fn sftp_session(&self) -> Result<SftpSession, SshError> {
        let channel = self.handle.channel_open_session().await?;
        channel.request_subsystem(true, "sftp").await?;
        let session = SftpSession::new(channel.into_stream()).await?;
        Ok(session)
    }

    /// Copies a local file to `destination` on the box. Returns bytes sent.
    pub async fn upload(
        &self,
        source: impl AsRef<Path>,
        destination: &str,
    ) -> Result<u64, SshError> {
        let session = self.sftp_session().await?;

        let mut local_file = tokio::fs::File::open(source).await?;
        let mut remote_file = session
            .open_with_flags(
                destination,
                OpenFlags::CREATE | OpenFlags::TRUNCATE | OpenFlags::WRITE,
            )
            .await?;

        let mut buffer = [0u8; CHUNK_SIZE];
        let mut total_bytes = 0;
        loop {
            match local_file.read(&mut buffer).await? {
                0 => break,
                bytes_read => {
                    remote_file.write_all(&buffer[..bytes_read]).await?;
                    total_bytes += bytes_read as u64;
                }
            }
        }

        remote_file.flush().await?;
        remote_file.shutdown().await?;
        Ok(total_bytes)
    }

    /// Copies `source` from the box to a local file. Returns bytes received.
    pub async fn download(
        &self,
        source: &str,
        destination: impl AsRef<Path>,
    ) -> Result<u64, SshError> {
        let session = self.sftp_session().await?;

        let mut remote_file = session.open_with_flags(source, OpenFlags::READ).await?;
        let mut local_file = tokio::fs::File::create(destination).await?;

        let mut buffer = [0u8; CHUNK_SIZE];
        let mut total_bytes = 0;
        loop {
            match remote_file.read(&mut buffer).await? {
                0 => break,
                bytes_read => {
                    local_file.write_all(&buffer[..bytes_read]).await?;
                    total_bytes += bytes_read as u64;
                }
            }
        }

        local_file.flush().await?;
        Ok(total_bytes)
    }
}
