//! TLS settings shared by the MQTT and FTPS channels.
//!
//! Bambu printers serve a self-signed certificate on both channels, so the
//! certificate chain is not verified.

use std::sync::Arc;

use rumqttc::tokio_rustls::rustls;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};

/// Client configuration accepting the printer's certificate.
///
/// Share one instance between a control connection and its data connections
/// so TLS sessions can be resumed.
pub fn client_config() -> Arc<ClientConfig> {
    let config = ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(PrinterCertificate))
        .with_no_client_auth();
    Arc::new(config)
}

#[derive(Debug)]
struct PrinterCertificate;

impl ServerCertVerifier for PrinterCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ED25519,
        ]
    }
}

/// Server name for a host string, falling back to a fixed name when the host
/// is neither a DNS name nor an IP address.
pub fn server_name(host: &str) -> ServerName<'static> {
    ServerName::try_from(host.to_string())
        .unwrap_or_else(|_| ServerName::try_from("printer.local").expect("static DNS name is valid"))
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_self_signed_certificate_is_accepted() {
        let cert = CertificateDer::from(vec![0x30, 0x00]);
        let result = PrinterCertificate.verify_server_cert(
            &cert,
            &[],
            &server_name("192.168.1.20"),
            &[],
            UnixTime::now(),
        );
        assert!(result.is_ok());
        assert!(!PrinterCertificate.supported_verify_schemes().is_empty());
    }

    #[test]
    fn test_client_config_builds() {
        let config = client_config();
        assert!(Arc::strong_count(&config) >= 1);
    }

    #[test]
    fn test_server_name() {
        assert!(matches!(server_name("192.168.1.20"), ServerName::IpAddress(_)));
        assert!(matches!(server_name("x1c.lan"), ServerName::DnsName(_)));
        assert!(matches!(server_name("bad host!"), ServerName::DnsName(_)));
    }
}
