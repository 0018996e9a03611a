//! TCP reachability scan across IPv4 prefixes.
//!
//! One task per host, bounded by a semaphore-sized worker pool. The caller
//! blocks until every probe has finished.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info};

use super::{Endpoint, FleetError};

/// Shortest prefix accepted; larger networks are almost always a typo.
const MIN_PREFIX_LEN: u8 = 16;

/// Expand `a.b.c.d/len` (or a bare address) into host addresses.
///
/// Network and broadcast addresses are skipped for prefixes of length 30
/// or shorter.
pub fn expand_prefix(prefix: &str) -> Result<Vec<Ipv4Addr>, FleetError> {
    let invalid = |reason: &str| FleetError::InvalidPrefix(prefix.to_string(), reason.to_string());

    let (addr, len) = match prefix.trim().split_once('/') {
        Some((addr, len)) => (
            addr,
            len.parse::<u8>().map_err(|_| invalid("bad prefix length"))?,
        ),
        None => (prefix.trim(), 32),
    };
    let addr: Ipv4Addr = addr.parse().map_err(|_| invalid("bad IPv4 address"))?;
    if !(MIN_PREFIX_LEN..=32).contains(&len) {
        return Err(invalid("prefix length must be between 16 and 32"));
    }

    let mask = if len == 32 { u32::MAX } else { !(u32::MAX >> len) };
    let network = u32::from(addr) & mask;
    let broadcast = network | !mask;

    let hosts = if len >= 31 {
        (network..=broadcast).map(Ipv4Addr::from).collect()
    } else {
        (network + 1..broadcast).map(Ipv4Addr::from).collect()
    };
    Ok(hosts)
}

async fn probe(addr: SocketAddr, timeout: Duration) -> bool {
    matches!(
        tokio::time::timeout(timeout, TcpStream::connect(addr)).await,
        Ok(Ok(_))
    )
}

/// Probe `port` on every host of every prefix; returns reachable endpoints
/// sorted by address.
pub async fn scan(
    prefixes: &[String],
    port: u16,
    timeout: Duration,
    concurrency: usize,
) -> Result<Vec<Endpoint>, FleetError> {
    let mut hosts = Vec::new();
    for prefix in prefixes {
        hosts.extend(expand_prefix(prefix)?);
    }
    hosts.sort_unstable();
    hosts.dedup();

    info!(
        hosts = hosts.len(),
        port,
        workers = concurrency,
        "Scanning for inference nodes"
    );

    let permits = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut tasks = JoinSet::new();
    for ip in hosts {
        let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
            break;
        };
        tasks.spawn(async move {
            let _permit = permit;
            let reachable = probe(SocketAddr::from((ip, port)), timeout).await;
            reachable.then_some(ip)
        });
    }

    let mut found = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Some(ip)) => found.push(ip),
            Ok(None) => {}
            Err(e) => debug!(error = %e, "Scan task failed"),
        }
    }
    found.sort_unstable();

    info!(reachable = found.len(), "Scan complete");
    Ok(found
        .into_iter()
        .map(|ip| Endpoint::from_host(ip, port))
        .collect())
}
