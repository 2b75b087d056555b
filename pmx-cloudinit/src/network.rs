//! network-config (netplan v2) rendering.

use ipnet::IpNet;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use tracing::debug;

use crate::error::{NetworkConfigError, Result};

/// Addressing for one guest NIC.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfigData {
    pub mac_address: String,
    /// IPv4 address in CIDR notation, e.g. `10.0.0.10/24`.
    pub ip_address: String,
    /// IPv6 address in CIDR notation.
    pub ipv6_address: String,
    pub gateway: String,
    pub gateway6: String,
    pub dns_servers: Vec<String>,
    pub dhcp4: bool,
    pub dhcp6: bool,
}

/// Renders the machine network-config.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    configs: Vec<NetworkConfigData>,
}

impl NetworkConfig {
    pub fn new(configs: Vec<NetworkConfigData>) -> Self {
        Self { configs }
    }

    /// Validate and render the network-config document.
    pub fn render(&self) -> Result<Vec<u8>> {
        self.validate()?;

        let doc = Document {
            version: 2,
            ethernets: Ethernets(&self.configs),
        };
        let rendered = serde_yaml::to_string(&doc)?;
        debug!(network_config = %rendered, "rendered network-config");

        Ok(rendered.into_bytes())
    }

    fn validate(&self) -> Result<()> {
        if self.configs.is_empty() {
            return Err(NetworkConfigError::MissingNetworkConfigData);
        }

        for d in &self.configs {
            if !d.dhcp4 && !d.dhcp6 && d.ip_address.is_empty() && d.ipv6_address.is_empty() {
                return Err(NetworkConfigError::MissingIpAddress);
            }
            if d.mac_address.is_empty() {
                return Err(NetworkConfigError::MissingMacAddress);
            }

            if !d.dhcp4 && !d.ip_address.is_empty() {
                valid_ip_address(&d.ip_address)?;
                if d.gateway.is_empty() {
                    return Err(NetworkConfigError::MissingGateway);
                }
            }

            if !d.dhcp6 && !d.ipv6_address.is_empty() {
                valid_ip_address(&d.ipv6_address)?;
                if d.gateway6.is_empty() {
                    return Err(NetworkConfigError::MissingGateway);
                }
            }
        }

        Ok(())
    }
}

fn valid_ip_address(input: &str) -> Result<()> {
    if input.is_empty() {
        return Err(NetworkConfigError::MissingIpAddress);
    }
    input
        .parse::<IpNet>()
        .map_err(|_| NetworkConfigError::MalformedIpAddress(input.to_string()))?;
    Ok(())
}

#[derive(Serialize)]
struct Document<'a> {
    version: u8,
    ethernets: Ethernets<'a>,
}

/// Serializes as an ordered `eth<N>` map.
struct Ethernets<'a>(&'a [NetworkConfigData]);

impl Serialize for Ethernets<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (index, data) in self.0.iter().enumerate() {
            map.serialize_entry(&format!("eth{}", index), &Ethernet::new(index, data))?;
        }
        map.end()
    }
}

#[derive(Serialize)]
struct Ethernet<'a> {
    #[serde(rename = "match")]
    matcher: Match<'a>,
    dhcp4: bool,
    dhcp6: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    addresses: Vec<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    gateway4: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    gateway6: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    nameservers: Option<Nameservers<'a>>,
}

#[derive(Serialize)]
struct Match<'a> {
    macaddress: &'a str,
}

#[derive(Serialize)]
struct Nameservers<'a> {
    addresses: &'a [String],
}

fn non_empty(s: &str) -> Option<&str> {
    (!s.is_empty()).then_some(s)
}

impl<'a> Ethernet<'a> {
    fn new(index: usize, d: &'a NetworkConfigData) -> Self {
        let addresses = [d.ip_address.as_str(), d.ipv6_address.as_str()]
            .into_iter()
            .filter(|a| !a.is_empty())
            .collect();

        // routes and resolvers live on the primary interface only
        let primary = index == 0;
        Self {
            matcher: Match {
                macaddress: &d.mac_address,
            },
            dhcp4: d.dhcp4,
            dhcp6: d.dhcp6,
            addresses,
            gateway4: non_empty(&d.gateway).filter(|_| primary),
            gateway6: non_empty(&d.gateway6).filter(|_| primary),
            nameservers: (primary && !d.dns_servers.is_empty()).then(|| Nameservers {
                addresses: &d.dns_servers,
            }),
        }
    }
}
