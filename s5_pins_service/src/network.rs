use anyhow::{anyhow, bail};
use s5_pins_core::Network;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// `Network` that treats a peer as reachable when a plain TCP connection to
/// one of its addresses succeeds.
#[derive(Debug, Clone)]
pub struct TcpNetwork {
    announce: Vec<String>,
    timeout: Duration,
}

impl TcpNetwork {
    pub fn new(announce: Vec<String>, timeout: Duration) -> Self {
        Self { announce, timeout }
    }
}

/// Extracts `(host, port)` from `/ip4|ip6|dns|dns4|dns6/<host>/tcp/<port>/...`.
pub fn tcp_target(addr: &str) -> Option<(&str, u16)> {
    let mut parts = addr.split('/').skip(1);
    let host = match parts.next()? {
        "ip4" | "ip6" | "dns" | "dns4" | "dns6" => parts.next()?,
        _ => return None,
    };
    if parts.next()? != "tcp" {
        return None;
    }
    let port = parts.next()?.parse().ok()?;
    Some((host, port))
}

#[async_trait::async_trait]
impl Network for TcpNetwork {
    fn local_addrs(&self) -> Vec<String> {
        self.announce.clone()
    }

    async fn dial(&self, addrs: &[String], cancel: &CancellationToken) -> anyhow::Result<()> {
        let mut last_err = anyhow!("no dialable tcp address in {addrs:?}");
        for addr in addrs {
            let Some(target) = tcp_target(addr) else {
                continue;
            };
            let attempt = tokio::time::timeout(self.timeout, TcpStream::connect(target));
            tokio::select! {
                biased;
                _ = cancel.cancelled() => bail!("dial cancelled"),
                result = attempt => match result {
                    Ok(Ok(_stream)) => {
                        debug!(addr, "peer reachable");
                        return Ok(());
                    }
                    Ok(Err(err)) => last_err = anyhow!("{addr}: {err}"),
                    Err(_) => last_err = anyhow!("{addr}: timed out"),
                },
            }
        }
        Err(last_err)
    }
}
