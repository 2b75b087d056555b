//! network-config validation errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NetworkConfigError {
    #[error("network-config data is missing")]
    MissingNetworkConfigData,

    #[error("ip address is missing")]
    MissingIpAddress,

    #[error("malformed ip address: {0}")]
    MalformedIpAddress(String),

    #[error("mac address is missing")]
    MissingMacAddress,

    #[error("gateway is missing")]
    MissingGateway,

    #[error("failed to render network-config: {0}")]
    Render(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, NetworkConfigError>;
