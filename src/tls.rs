//! TLS and credential material for the two transports

use std::time::Duration;
use tonic::metadata::{Ascii, MetadataValue};
use tonic::transport::{Certificate, ClientTlsConfig, Identity};

use crate::config::NodeConfig;
use crate::error::{BridgeError, Result};

const PEM_CERT_MARKER: &str = "-----BEGIN CERTIFICATE-----";

fn check_pem(pem: &str, what: &str) -> Result<()> {
    if pem.contains(PEM_CERT_MARKER) {
        Ok(())
    } else {
        Err(BridgeError::Tls(format!("{} is not a PEM certificate", what)))
    }
}

/// Client TLS settings for the gRPC channel.
///
/// The node's certificate must chain to `server_ca`. A client identity is
/// presented when one is configured.
pub fn grpc_tls_config(config: &NodeConfig) -> Result<ClientTlsConfig> {
    check_pem(&config.server_ca, "server CA")?;

    let mut tls = ClientTlsConfig::new()
        .ca_certificate(Certificate::from_pem(&config.server_ca))
        .domain_name(config.address.trim_matches(|c| c == '[' || c == ']'));

    if let (Some(cert), Some(key)) = (&config.client_cert, &config.client_key) {
        check_pem(cert, "client certificate")?;
        tls = tls.identity(Identity::from_pem(cert, key));
    }

    Ok(tls)
}

/// HTTPS client trusting the built-in roots plus `server_ca`
pub fn rest_client(config: &NodeConfig) -> Result<reqwest::Client> {
    let ca_cert = reqwest::Certificate::from_pem(config.server_ca.as_bytes())
        .map_err(|e| BridgeError::Tls(format!("Invalid CA certificate: {}", e)))?;

    reqwest::Client::builder()
        .use_rustls_tls()
        .add_root_certificate(ca_cert)
        .https_only(true)
        .connect_timeout(Duration::from_millis(config.timings.request_timeout_ms))
        .build()
        .map_err(|e| BridgeError::Tls(format!("Failed to build HTTP client: {}", e)))
}

/// `Bearer <credential>` for the `authorization` metadata key
pub fn bearer_metadata(credential: &str) -> Result<MetadataValue<Ascii>> {
    format!("Bearer {}", credential)
        .parse()
        .map_err(|_| BridgeError::Configuration("credential is not valid ASCII".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeProtocol;
    use uuid::Uuid;

    fn config(ca: &str) -> NodeConfig {
        NodeConfig::new("node.example.com", 62050, NodeProtocol::Grpc, ca, Uuid::nil())
    }

    #[test]
    fn test_grpc_tls_rejects_garbage_ca() {
        let err = grpc_tls_config(&config("not a certificate")).unwrap_err();
        assert!(matches!(err, BridgeError::Tls(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_grpc_tls_rejects_garbage_client_cert() {
        let config = config("-----BEGIN CERTIFICATE-----\nAAAA\n-----END CERTIFICATE-----\n")
            .with_client_identity("garbage", "garbage");
        assert!(matches!(grpc_tls_config(&config), Err(BridgeError::Tls(_))));
    }

    #[test]
    fn test_bearer_metadata() {
        let value = bearer_metadata("abc").unwrap();
        assert_eq!(value.to_str().unwrap(), "Bearer abc");
        assert!(bearer_metadata("bad\nkey").is_err());
    }
}
