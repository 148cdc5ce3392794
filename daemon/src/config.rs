use serde::Deserialize;

use crate::error::DltRelayError;

/// Transport the daemon listens on for ingest datagrams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SocketType {
    Unix,
    Udpv4,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UnixSocketConfig {
    pub server_path: String,
}

impl Default for UnixSocketConfig {
    fn default() -> Self {
        UnixSocketConfig {
            server_path: "/tmp/dlt.sock".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UdpSocketConfig {
    pub server_address: String,
    pub server_port: u16,
}

impl Default for UdpSocketConfig {
    fn default() -> Self {
        UdpSocketConfig {
            server_address: "127.0.0.1".to_string(),
            server_port: 0,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageServerConfig {
    pub server_address: String,
    pub server_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub socket_type: SocketType,
    pub unix_socket: UnixSocketConfig,
    pub udp_socket: UdpSocketConfig,
    pub storage_server: StorageServerConfig,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            socket_type: SocketType::Unix,
            unix_socket: UnixSocketConfig::default(),
            udp_socket: UdpSocketConfig::default(),
            storage_server: StorageServerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub htype_use_extended_hdr: bool,
    pub htype_msb_first: bool,
    pub htype_send_ecu_id: bool,
    pub htype_send_timestamp: bool,
    pub htype_version: u8,
    pub htype_ecu_id: String,
    pub ext_hdr_verbose_mode: bool,
    pub network: NetworkConfig,
    pub log_to_console: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            htype_use_extended_hdr: true,
            htype_msb_first: false,
            htype_send_ecu_id: true,
            htype_send_timestamp: false,
            htype_version: 1,
            htype_ecu_id: String::new(),
            ext_hdr_verbose_mode: true,
            network: NetworkConfig::default(),
            log_to_console: false,
        }
    }
}

impl Config {
    /// The fields without usable defaults: the ECU id and the storage
    /// endpoint. Version has to fit its 3-bit header field.
    pub fn validate(&self) -> Result<(), DltRelayError> {
        if self.htype_ecu_id.is_empty() || self.htype_ecu_id.len() > 4 {
            return Err(DltRelayError::InvalidConfig(format!(
                "htype_ecu_id must be 1..=4 characters, got {:?}",
                self.htype_ecu_id
            )));
        }
        if self.htype_version > 7 {
            return Err(DltRelayError::InvalidConfig(format!(
                "htype_version must be 0..=7, got {}",
                self.htype_version
            )));
        }
        let storage = &self.network.storage_server;
        if storage.server_address.is_empty() || storage.server_port == 0 {
            return Err(DltRelayError::InvalidConfig(
                "network.storage_server address and port are required".to_string(),
            ));
        }
        Ok(())
    }
}

pub async fn parse_config<P>(path: P) -> Result<Config, DltRelayError>
where
    P: AsRef<std::path::Path>,
{
    let contents = tokio::fs::read_to_string(&path)
        .await
        .map_err(|_| DltRelayError::MissingConfigFile(path.as_ref().display().to_string()))?;
    let config: Config = serde_json::from_str(&contents)?;
    config.validate()?;
    Ok(config)
}

pub struct Args {
    pub config_path: String,
}

pub fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().collect();
    if args.len() != 2 {
        println!("Usage: {} /path/to/config/file", args[0]);
        std::process::exit(1);
    }
    Args {
        config_path: args[1].clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL_CONFIG: &str = r#"{
        "htype_use_extended_hdr": true,
        "htype_msb_first": false,
        "htype_send_ecu_id": true,
        "htype_send_timestamp": false,
        "htype_version": 1,
        "htype_ecu_id": "ECU1",
        "ext_hdr_verbose_mode": true,
        "network": {
            "socket_type": "unix",
            "unix_socket": {
                "server_path": "/tmp/dlt.sock"
            },
            "storage_server": {
                "server_address": "192.168.1.100",
                "server_port": 14400
            }
        },
        "log_to_console": true
    }"#;

    #[test]
    fn test_parse_full_config() {
        let config: Config = serde_json::from_str(FULL_CONFIG).unwrap();
        config.validate().unwrap();
        assert_eq!(config.htype_ecu_id, "ECU1");
        assert_eq!(config.htype_version, 1);
        assert_eq!(config.network.socket_type, SocketType::Unix);
        assert_eq!(config.network.unix_socket.server_path, "/tmp/dlt.sock");
        assert_eq!(
            config.network.storage_server.server_address,
            "192.168.1.100"
        );
        assert_eq!(config.network.storage_server.server_port, 14400);
        assert!(config.log_to_console);
    }

    #[test]
    fn test_missing_keys_take_defaults() {
        let config: Config = serde_json::from_str(
            r#"{
                "htype_ecu_id": "EC",
                "network": {
                    "socket_type": "udpv4",
                    "udp_socket": {
                        "server_address": "0.0.0.0",
                        "server_port": 3490
                    },
                    "storage_server": {
                        "server_address": "10.0.0.1",
                        "server_port": 9000
                    }
                }
            }"#,
        )
        .unwrap();
        config.validate().unwrap();
        assert!(config.htype_use_extended_hdr);
        assert!(!config.htype_send_timestamp);
        assert_eq!(config.network.socket_type, SocketType::Udpv4);
        assert_eq!(config.network.udp_socket.server_port, 3490);
        assert!(!config.log_to_console);
    }

    #[test]
    fn test_validation_failures() {
        let mut config: Config = serde_json::from_str(FULL_CONFIG).unwrap();
        config.htype_ecu_id = String::new();
        assert!(config.validate().is_err());

        let mut config: Config = serde_json::from_str(FULL_CONFIG).unwrap();
        config.htype_ecu_id = "TOOLONG".to_string();
        assert!(config.validate().is_err());

        let mut config: Config = serde_json::from_str(FULL_CONFIG).unwrap();
        config.htype_version = 8;
        assert!(config.validate().is_err());

        let mut config: Config = serde_json::from_str(FULL_CONFIG).unwrap();
        config.network.storage_server.server_port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_socket_type_rejected() {
        let result: Result<Config, _> = serde_json::from_str(
            r#"{"htype_ecu_id": "ECU1", "network": {"socket_type": "tcp"}}"#,
        );
        assert!(result.is_err());
    }
}
