//! Polling budgets and the SSH port probe.

use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, info};

pub const SSH_PORT: u16 = 22;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// How often to look and how long to keep looking
#[derive(Debug, Clone)]
pub struct WaitConfig {
    pub interval: Duration,
    pub timeout: Duration,
}

impl WaitConfig {
    /// Instance state changes take tens of seconds, so poll slowly.
    pub fn instance_state() -> Self {
        WaitConfig {
            interval: Duration::from_secs(10),
            timeout: Duration::from_secs(600),
        }
    }

    pub fn ssh() -> Self {
        WaitConfig {
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(600),
        }
    }
}

async fn is_port_open(host: &str, port: u16, connect_timeout: Duration) -> bool {
    matches!(
        timeout(connect_timeout, TcpStream::connect((host, port))).await,
        Ok(Ok(_))
    )
}

/// Probes `host:port` until a TCP connect succeeds. Returns false when the
/// budget runs out.
pub async fn wait_for_port(host: &str, port: u16, config: &WaitConfig) -> bool {
    let started = Instant::now();
    let connect_timeout = CONNECT_TIMEOUT.min(config.timeout);

    loop {
        if is_port_open(host, port, connect_timeout).await {
            info!(host, port, "ssh is now available");
            return true;
        }
        if started.elapsed() >= config.timeout {
            return false;
        }
        debug!(host, port, "waiting for ssh");
        sleep(config.interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn quick() -> WaitConfig {
        WaitConfig {
            interval: Duration::from_millis(5),
            timeout: Duration::from_millis(100),
        }
    }

    #[tokio::test]
    async fn test_open_port_is_found() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        assert!(wait_for_port("127.0.0.1", port, &quick()).await);
    }

    #[tokio::test]
    async fn test_closed_port_gives_up() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        assert!(!wait_for_port("127.0.0.1", port, &quick()).await);
    }
}
