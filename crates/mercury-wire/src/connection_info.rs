//! Kernel connection-file record.

use serde::{Deserialize, Serialize};

use crate::message::Channel;

/// Contents of a Jupyter connection file: where each channel lives and the
/// key used to sign traffic. Serde-compatible with the files kernels and
/// clients exchange on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub transport: String,
    pub ip: String,
    pub shell_port: u16,
    pub iopub_port: u16,
    pub stdin_port: u16,
    pub control_port: u16,
    pub hb_port: u16,
    pub key: String,
    pub signature_scheme: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kernel_name: Option<String>,
}

impl ConnectionInfo {
    /// Endpoint URL for one channel, e.g. `tcp://127.0.0.1:5555`.
    pub fn endpoint(&self, channel: Channel) -> String {
        let port = match channel {
            Channel::Shell => self.shell_port,
            Channel::IoPub => self.iopub_port,
            Channel::Stdin => self.stdin_port,
            Channel::Control => self.control_port,
            Channel::Heartbeat => self.hb_port,
        };
        format!("{}://{}:{}", self.transport, self.ip, port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ConnectionInfo {
        ConnectionInfo {
            transport: "tcp".into(),
            ip: "127.0.0.1".into(),
            shell_port: 50001,
            iopub_port: 50002,
            stdin_port: 50003,
            control_port: 50004,
            hb_port: 50005,
            key: "abc".into(),
            signature_scheme: "hmac-sha256".into(),
            kernel_name: Some("python3".into()),
        }
    }

    #[test]
    fn test_endpoint_per_channel() {
        let info = sample();
        assert_eq!(info.endpoint(Channel::Shell), "tcp://127.0.0.1:50001");
        assert_eq!(info.endpoint(Channel::IoPub), "tcp://127.0.0.1:50002");
        assert_eq!(info.endpoint(Channel::Heartbeat), "tcp://127.0.0.1:50005");
    }

    #[test]
    fn test_connection_file_roundtrip() {
        let info = sample();
        let json = serde_json::to_string_pretty(&info).unwrap();
        let back: ConnectionInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(back.shell_port, info.shell_port);
        assert_eq!(back.key, info.key);
        assert_eq!(back.kernel_name.as_deref(), Some("python3"));
    }

    #[test]
    fn test_connection_file_without_kernel_name() {
        let json = r#"{
            "transport": "tcp",
            "ip": "127.0.0.1",
            "shell_port": 1,
            "iopub_port": 2,
            "stdin_port": 3,
            "control_port": 4,
            "hb_port": 5,
            "key": "",
            "signature_scheme": "hmac-sha256"
        }"#;
        let info: ConnectionInfo = serde_json::from_str(json).unwrap();
        assert!(info.kernel_name.is_none());
    }
}
