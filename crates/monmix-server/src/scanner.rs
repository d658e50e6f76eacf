/// Discovery scan for consoles on the local /24.
///
/// Every host `.1`–`.254` × every candidate port gets a TCP connect probe.
/// Open ports receive a harmless read-only command and the first reply
/// chunk is fingerprinted against a keyword list. Probes run in bounded
/// batches; a target that refuses, resets or times out is simply left out.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info};

use monmix_protocol::status::{NetworkInfo, ScanResult};
use monmix_protocol::{CANDIDATE_PORTS, DEVICE_KEYWORDS, DISCOVERY_PROBE};

use crate::config::ScannerSection;

/// Longest reply excerpt kept in a result
const SNIPPET_LEN: usize = 200;
const READ_CHUNK: usize = 512;

#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// `/24` prefix such as `192.168.1`; derived from the local address if unset
    pub subnet: Option<String>,
    pub ports: Vec<u16>,
    pub connect_timeout: Duration,
    pub probe_timeout: Duration,
    pub batch_size: usize,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self::from(&ScannerSection::default())
    }
}

impl From<&ScannerSection> for ScanOptions {
    fn from(section: &ScannerSection) -> Self {
        Self {
            subnet: None,
            ports: section.ports.clone(),
            connect_timeout: Duration::from_millis(section.connect_timeout_ms),
            probe_timeout: Duration::from_millis(section.probe_timeout_ms),
            batch_size: section.batch_size.max(1),
        }
    }
}

/// Non-loopback IPv4 address of this machine.
///
/// Connecting a UDP socket sends nothing; it only makes the OS pick the
/// outbound interface.
pub fn local_ipv4() -> Option<Ipv4Addr> {
    let socket = std::net::UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    match socket.local_addr().ok()?.ip() {
        IpAddr::V4(ip) if !ip.is_loopback() && !ip.is_unspecified() => Some(ip),
        _ => None,
    }
}

/// `/24` prefix of an address, e.g. `192.168.1.40` → `192.168.1`.
pub fn subnet_prefix(ip: Ipv4Addr) -> String {
    let [a, b, c, _] = ip.octets();
    format!("{}.{}.{}", a, b, c)
}

pub fn network_info(ports: &[u16]) -> NetworkInfo {
    let ip = local_ipv4();
    NetworkInfo {
        server_ip: ip.map(|ip| ip.to_string()),
        subnet: ip.map(subnet_prefix),
        candidate_ports: if ports.is_empty() {
            CANDIDATE_PORTS.to_vec()
        } else {
            ports.to_vec()
        },
    }
}

/// Hosts `.1` to `.254` of a `/24`. Accepts `a.b.c`, `a.b.c.d` or
/// `a.b.c.0/24`; only the first three octets are used.
pub fn subnet_hosts(subnet: &str) -> anyhow::Result<Vec<Ipv4Addr>> {
    let trimmed = subnet.trim().trim_end_matches("/24");
    let octets: Vec<u8> = trimmed
        .split('.')
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<u8>())
        .collect::<Result<_, _>>()
        .map_err(|_| anyhow::anyhow!("invalid subnet: {}", subnet))?;
    if octets.len() < 3 || octets.len() > 4 {
        anyhow::bail!("invalid subnet: {}", subnet);
    }
    Ok((1..=254u8)
        .map(|host| Ipv4Addr::new(octets[0], octets[1], octets[2], host))
        .collect())
}

/// Case-insensitive keyword match on a probe reply.
pub fn is_target_response(reply: &str) -> bool {
    let lower = reply.to_ascii_lowercase();
    DEVICE_KEYWORDS.iter().any(|k| lower.contains(k))
}

/// Target devices first, then by ascending latency.
pub fn sort_results(results: &mut [ScanResult]) {
    results.sort_by(|a, b| {
        b.is_target_device
            .cmp(&a.is_target_device)
            .then(a.latency_ms.cmp(&b.latency_ms))
    });
}

/// Probe one host:port. `None` if the port is not open.
pub async fn probe_target(
    addr: SocketAddr,
    connect_timeout: Duration,
    probe_timeout: Duration,
) -> Option<ScanResult> {
    let started = Instant::now();
    let mut stream = match tokio::time::timeout(connect_timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            debug!(%addr, error = %e, "Probe connect failed");
            return None;
        }
        Err(_) => return None,
    };
    let latency_ms = started.elapsed().as_millis() as u64;

    let reply = async {
        stream.write_all(DISCOVERY_PROBE.as_bytes()).await?;
        let mut buf = vec![0u8; READ_CHUNK];
        let n = stream.read(&mut buf).await?;
        buf.truncate(n);
        Ok::<_, std::io::Error>(buf)
    };
    let response = match tokio::time::timeout(probe_timeout, reply).await {
        Ok(Ok(bytes)) if !bytes.is_empty() => {
            let text = String::from_utf8_lossy(&bytes).trim().to_string();
            Some(text.chars().take(SNIPPET_LEN).collect::<String>())
        }
        Ok(Ok(_)) => None,
        Ok(Err(e)) => {
            debug!(%addr, error = %e, "Probe exchange failed");
            None
        }
        Err(_) => None,
    };

    let is_target_device = response.as_deref().map(is_target_response).unwrap_or(false);

    Some(ScanResult {
        host: addr.ip().to_string(),
        port: addr.port(),
        is_target_device,
        response,
        latency_ms,
    })
}

/// Probe a list of targets in batches of `batch_size`.
pub async fn probe_all(targets: Vec<SocketAddr>, options: &ScanOptions) -> Vec<ScanResult> {
    let mut results = Vec::new();
    for batch in targets.chunks(options.batch_size.max(1)) {
        let handles: Vec<_> = batch
            .iter()
            .map(|&addr| {
                tokio::spawn(probe_target(addr, options.connect_timeout, options.probe_timeout))
            })
            .collect();
        for handle in handles {
            if let Ok(Some(result)) = handle.await {
                results.push(result);
            }
        }
    }
    sort_results(&mut results);
    results
}

/// Sweep the subnet. Fails only when no subnet is given and none can be derived.
pub async fn scan(options: &ScanOptions) -> anyhow::Result<Vec<ScanResult>> {
    let subnet = match options.subnet.as_deref().filter(|s| !s.trim().is_empty()) {
        Some(subnet) => subnet.to_string(),
        None => local_ipv4()
            .map(subnet_prefix)
            .ok_or_else(|| anyhow::anyhow!("no local IPv4 address to derive a subnet from"))?,
    };
    let hosts = subnet_hosts(&subnet)?;
    let ports = if options.ports.is_empty() {
        CANDIDATE_PORTS.to_vec()
    } else {
        options.ports.clone()
    };

    let targets: Vec<SocketAddr> = hosts
        .iter()
        .flat_map(|ip| ports.iter().map(move |&port| SocketAddr::new(IpAddr::V4(*ip), port)))
        .collect();

    info!(subnet = %subnet, ports = ?ports, targets = targets.len(), "Starting discovery scan");
    let started = Instant::now();
    let results = probe_all(targets, options).await;
    info!(
        found = results.len(),
        consoles = results.iter().filter(|r| r.is_target_device).count(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Discovery scan finished"
    );
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    const FAST: Duration = Duration::from_millis(300);

    #[test]
    fn test_subnet_hosts_covers_1_to_254() {
        let hosts = subnet_hosts("10.0.0").unwrap();
        assert_eq!(hosts.len(), 254);
        assert_eq!(hosts.first().unwrap().to_string(), "10.0.0.1");
        assert_eq!(hosts.last().unwrap().to_string(), "10.0.0.254");
        assert!(!hosts.iter().any(|h| h.octets()[3] == 0 || h.octets()[3] == 255));
    }

    #[test]
    fn test_subnet_forms() {
        assert_eq!(subnet_hosts("192.168.4.0/24").unwrap()[0].to_string(), "192.168.4.1");
        assert_eq!(subnet_hosts("192.168.4.77").unwrap()[1].to_string(), "192.168.4.2");
        assert!(subnet_hosts("192.168").is_err());
        assert!(subnet_hosts("300.1.1").is_err());
        assert!(subnet_hosts("not a subnet").is_err());
    }

    #[test]
    fn test_subnet_prefix() {
        assert_eq!(subnet_prefix(Ipv4Addr::new(172, 16, 5, 40)), "172.16.5");
    }

    #[test]
    fn test_keyword_match_is_case_insensitive() {
        assert!(is_target_response("PRESET = 3"));
        assert!(is_target_response("ok"));
        assert!(is_target_response("Gain In 1 = -10"));
        assert!(is_target_response("YAMAHA TF5 ready"));
        assert!(is_target_response("SCP v1"));
        assert!(is_target_response("Welcome to Yamaha remote control\r\n"));
        assert!(!is_target_response("SSH-2.0-OpenSSH_9.6"));
        assert!(!is_target_response("HTTP/1.1 400 Bad Request"));
    }

    fn result(target: bool, latency_ms: u64) -> ScanResult {
        ScanResult {
            host: "10.0.0.1".to_string(),
            port: 23,
            is_target_device: target,
            response: None,
            latency_ms,
        }
    }

    #[test]
    fn test_targets_sort_first_then_latency() {
        let mut results = vec![result(false, 1), result(true, 40), result(false, 5), result(true, 3)];
        sort_results(&mut results);
        let order: Vec<(bool, u64)> = results.iter().map(|r| (r.is_target_device, r.latency_ms)).collect();
        assert_eq!(order, vec![(true, 3), (true, 40), (false, 1), (false, 5)]);
    }

    async fn replying_target(reply: &'static [u8]) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 64];
            let _ = socket.read(&mut buf).await;
            socket.write_all(reply).await.unwrap();
            tokio::time::sleep(Duration::from_secs(1)).await;
        });
        addr
    }

    async fn silent_target() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });
        addr
    }

    #[tokio::test]
    async fn test_responding_console_is_identified() {
        let addr = replying_target(b"PRESET = 1\r\n").await;
        let found = probe_target(addr, FAST, FAST).await.unwrap();
        assert!(found.is_target_device);
        assert_eq!(found.response.as_deref(), Some("PRESET = 1"));
        assert_eq!(found.port, addr.port());
        assert_eq!(found.host, "127.0.0.1");
    }

    #[tokio::test]
    async fn test_silent_port_is_open_but_unidentified() {
        let addr = silent_target().await;
        let found = probe_target(addr, FAST, FAST).await.unwrap();
        assert!(!found.is_target_device);
        assert!(found.response.is_none());
    }

    #[tokio::test]
    async fn test_closed_port_is_excluded() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        assert!(probe_target(addr, FAST, FAST).await.is_none());
    }

    #[tokio::test]
    async fn test_probe_all_orders_consoles_first() {
        let silent = silent_target().await;
        let other = replying_target(b"SSH-2.0-OpenSSH_9.6\r\n").await;
        let console = replying_target(b"OK\r\n").await;

        let closed = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };

        let options = ScanOptions {
            subnet: None,
            ports: vec![],
            connect_timeout: FAST,
            probe_timeout: FAST,
            batch_size: 2,
        };
        let results = probe_all(vec![silent, closed, other, console], &options).await;

        assert_eq!(results.len(), 3);
        assert!(results[0].is_target_device);
        assert_eq!(results[0].port, console.port());
        assert!(results[1..].iter().all(|r| !r.is_target_device));
    }
}
