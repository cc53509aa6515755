//! Best-effort discovery of controllers on the local network.
//!
//! Candidates come either from TCP connects to every host of the configured
//! network or from the responders to an SSDP `M-SEARCH`; each candidate is
//! then confirmed by asking for its `/info` document.

use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::time::Duration;

use futures_util::{StreamExt, stream};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::Instant;

use portbridge_app::ports::NetworkScanner;
use portbridge_app::ports::scanner::{DiscoveredDevice, ScanMethod};
use portbridge_domain::device::DeviceInfo;
use portbridge_domain::error::BridgeError;

use crate::api::parse_info;
use crate::config::ScanConfig;
use crate::error::DeviceError;

const SSDP_MULTICAST: &str = "239.255.255.250:1900";

/// Widest network the TCP scan accepts.
const MIN_PREFIX: u32 = 16;

pub struct LanScanner {
    http: reqwest::Client,
    config: ScanConfig,
}

impl LanScanner {
    /// # Errors
    ///
    /// Returns [`DeviceError::Http`] if the HTTP client cannot be built.
    pub fn new(config: ScanConfig) -> Result<Self, DeviceError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()?;
        Ok(Self { http, config })
    }

    fn concurrency(&self) -> usize {
        self.config.concurrency.max(1)
    }

    /// Hosts of the configured network accepting connections on the scan
    /// port.
    async fn sweep_network(&self) -> Result<Vec<String>, DeviceError> {
        let hosts = hosts(&self.config.network)?;
        let port = self.config.scan_port;
        let timeout = Duration::from_secs(self.config.connect_timeout_secs);
        tracing::info!(network = %self.config.network, hosts = hosts.len(), port, "sweeping network");

        let open: Vec<String> = stream::iter(hosts)
            .map(|addr| async move {
                let connect = TcpStream::connect((addr, port));
                matches!(tokio::time::timeout(timeout, connect).await, Ok(Ok(_)))
                    .then(|| addr.to_string())
            })
            .buffer_unordered(self.concurrency())
            .filter_map(|hit| async move { hit })
            .collect()
            .await;
        Ok(open)
    }

    /// Hosts named in the `LOCATION` header of the SSDP answers.
    async fn ssdp_search(&self) -> Result<Vec<String>, DeviceError> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
        let wait = self.config.ssdp_wait_secs.max(1);
        let request = format!(
            "M-SEARCH * HTTP/1.1\r\nHOST: {SSDP_MULTICAST}\r\nMAN: \"ssdp:discover\"\r\nMX: {wait}\r\nST: {}\r\n\r\n",
            self.config.ssdp_search_target
        );
        socket.send_to(request.as_bytes(), SSDP_MULTICAST).await?;
        tracing::info!(target = %self.config.ssdp_search_target, "ssdp search sent");

        let deadline = Instant::now() + Duration::from_secs(wait);
        let mut found = BTreeSet::new();
        let mut buf = vec![0_u8; 2048];
        while let Ok(received) = tokio::time::timeout_at(deadline, socket.recv_from(&mut buf)).await {
            match received {
                Ok((len, from)) => match location_host(&String::from_utf8_lossy(&buf[..len])) {
                    Some(host) => {
                        found.insert(host);
                    }
                    None => tracing::debug!(%from, "ssdp answer without location"),
                },
                Err(err) => {
                    tracing::warn!(%err, "ssdp receive failed");
                    break;
                }
            }
        }
        Ok(found.into_iter().collect())
    }

    fn info_url(&self, ip: &str) -> String {
        match self.config.scan_port {
            80 => format!("http://{ip}/info"),
            port => format!("http://{ip}:{port}/info"),
        }
    }

    async fn info(&self, ip: &str) -> Result<DeviceInfo, DeviceError> {
        let document = self
            .http
            .get(self.info_url(ip))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        parse_info(document)
    }

    /// Keep the candidates answering a valid `/info`.
    async fn confirm(&self, candidates: Vec<String>) -> Vec<DiscoveredDevice> {
        let mut found: Vec<DiscoveredDevice> = stream::iter(candidates)
            .map(|ip| async move {
                match self.info(&ip).await {
                    Ok(info) => Some(DiscoveredDevice { ip, info }),
                    Err(err) => {
                        tracing::debug!(%ip, %err, "candidate is not a controller");
                        None
                    }
                }
            })
            .buffer_unordered(self.concurrency())
            .filter_map(|device| async move { device })
            .collect()
            .await;
        found.sort_by_key(|device| device.ip.parse::<Ipv4Addr>().ok());
        found
    }
}

impl NetworkScanner for LanScanner {
    #[tracing::instrument(skip(self))]
    async fn scan(&self, method: ScanMethod) -> Result<Vec<DiscoveredDevice>, BridgeError> {
        let candidates = match method {
            ScanMethod::Tcp => self.sweep_network().await?,
            ScanMethod::Ssdp => self.ssdp_search().await?,
        };
        let found = self.confirm(candidates).await;
        tracing::info!(found = found.len(), "scan finished");
        Ok(found)
    }
}

/// Usable host addresses of an IPv4 CIDR.
///
/// `/31` and `/32` keep every address; wider networks drop the network and
/// broadcast addresses. A bare address is read as `/32`.
fn hosts(network: &str) -> Result<Vec<Ipv4Addr>, DeviceError> {
    let invalid = || DeviceError::InvalidNetwork {
        network: network.to_string(),
    };
    let (addr, prefix) = network.split_once('/').unwrap_or((network, "32"));
    let addr: Ipv4Addr = addr.trim().parse().map_err(|_| invalid())?;
    let prefix: u32 = prefix.trim().parse().map_err(|_| invalid())?;
    if !(MIN_PREFIX..=32).contains(&prefix) {
        return Err(invalid());
    }
    let span = u32::MAX.checked_shr(prefix).unwrap_or(0);
    let first = u32::from(addr) & !span;
    let last = first | span;
    let range = if span < 2 {
        first..=last
    } else {
        first + 1..=last - 1
    };
    Ok(range.map(Ipv4Addr::from).collect())
}

/// Host of the `LOCATION` header of an SSDP answer.
fn location_host(answer: &str) -> Option<String> {
    let location = answer.lines().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        name.trim()
            .eq_ignore_ascii_case("location")
            .then(|| value.trim())
    })?;
    let url = url::Url::parse(location).ok()?;
    url.host_str().map(str::to_string)
}
