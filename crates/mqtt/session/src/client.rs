//! Construction of `rumqttc` clients for both protocol versions.
//!
//! `ClientBuilder` turns a [`Configuration`] snapshot into either a 3.1.1
//! (`rumqttc`) or a 5.0 (`rumqttc::v5`) client/event-loop pair. Both paths
//! share transport selection:
//!
//! | use_tls | use_websocket | Transport | Broker address |
//! |---------|---------------|-----------|----------------|
//! | false   | false         | TCP       | `host`         |
//! | true    | false         | TLS       | `host`         |
//! | false   | true          | WS        | `ws://host:port/mqtt`  |
//! | true    | true          | WSS       | `wss://host:port/mqtt` |
//!
//! TLS uses the platform root store unless self-signed certificates are
//! allowed, in which case every server certificate is accepted.
//!
//! # Examples
//!
//! ```ignore
//! match ClientBuilder::from_config(&config)?.build()? {
//!     BuiltClient::V311(client, event_loop) => { /* ... */ }
//!     BuiltClient::V5(client, event_loop) => { /* ... */ }
//! }
//! ```

use std::{sync::Arc, time::Duration};

use rumqttc::{
    tokio_rustls::rustls::{
        self,
        client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
        pki_types::{CertificateDer, ServerName, UnixTime},
        DigitallySignedStruct, SignatureScheme,
    },
    TlsConfiguration, Transport,
};
use rumqttc::v5::mqttbytes::v5::{ConnectProperties, LastWill as LastWillV5, LastWillProperties};
use tracing::{debug, warn};
use validator::Validate;

use super::{
    config::{Configuration, ProtocolVersion},
    error::SessionError,
};

/// Will delay interval sent with a v5 last will, in seconds.
pub const WILL_DELAY_INTERVAL: u32 = 10;

/// Session expiry requested on v5 CONNECT, in seconds.
pub const SESSION_EXPIRY_INTERVAL: u32 = 3600;

/// Receive maximum requested on v5 CONNECT.
pub const RECEIVE_MAXIMUM: u16 = 100;

/// Maximum packet size requested on v5 CONNECT.
pub const MAX_PACKET_SIZE: u32 = 65535;

/// Default capacity of the client request channel.
const REQUEST_CHANNEL_CAPACITY: usize = 64;

/// A constructed client together with the event loop that drives it.
pub enum BuiltClient {
    V311(rumqttc::AsyncClient, rumqttc::EventLoop),
    V5(rumqttc::v5::AsyncClient, rumqttc::v5::EventLoop),
}

impl BuiltClient {
    pub fn version(&self) -> ProtocolVersion {
        match self {
            BuiltClient::V311(..) => ProtocolVersion::V311,
            BuiltClient::V5(..) => ProtocolVersion::V5,
        }
    }
}

/// Builds a version-appropriate `rumqttc` client from a configuration.
pub struct ClientBuilder {
    config: Configuration,

    /// Client identifier resolved once, so both paths agree.
    client_id: String,

    /// Capacity of the client request channel.
    cap: usize,
}

impl ClientBuilder {
    /// Validates the configuration and prepares a builder.
    ///
    /// # Errors
    /// `SessionError::InitializationFailure` when validation fails.
    pub fn from_config(config: &Configuration) -> Result<Self, SessionError> {
        config
            .validate()
            .map_err(|e| SessionError::InitializationFailure(e.to_string()))?;

        let client_id = config.effective_client_id();
        if client_id.starts_with(char::is_whitespace) {
            return Err(SessionError::InitializationFailure(
                "Client ID must not start with whitespace".into(),
            ));
        }

        Ok(Self {
            config: config.clone(),
            client_id,
            cap: REQUEST_CHANNEL_CAPACITY,
        })
    }

    /// Overrides the request channel capacity.
    pub fn request_capacity(mut self, cap: usize) -> Self {
        self.cap = cap.max(1);
        self
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Address handed to `rumqttc`: the WebSocket URL or the bare host.
    pub fn broker_address(&self) -> String {
        if self.config.use_websocket {
            self.config.websocket_url()
        } else {
            self.config.host.clone()
        }
    }

    /// Selects the transport from the TLS and WebSocket flags.
    pub fn transport(&self) -> Transport {
        match (self.config.use_tls, self.config.use_websocket) {
            (false, false) => Transport::Tcp,
            (true, false) => Transport::Tls(self.tls_configuration()),
            (false, true) => Transport::Ws,
            (true, true) => Transport::Wss(self.tls_configuration()),
        }
    }

    fn tls_configuration(&self) -> TlsConfiguration {
        if self.config.allow_self_signed_certs {
            warn!("Server certificate verification is disabled");
            TlsConfiguration::Rustls(Arc::new(insecure_client_config()))
        } else {
            TlsConfiguration::default()
        }
    }

    fn keep_alive(&self) -> Duration {
        Duration::from_secs(u64::from(self.config.keep_alive))
    }

    /// MQTT 3.1.1 options.
    pub fn v311_options(&self) -> rumqttc::MqttOptions {
        let config = &self.config;
        let mut opts =
            rumqttc::MqttOptions::new(self.client_id.clone(), self.broker_address(), config.port);

        opts.set_keep_alive(self.keep_alive());
        opts.set_clean_session(config.clean_session);

        if let Some((username, password)) = config.credentials() {
            opts.set_credentials(username, password);
        }

        if config.last_will.is_active() {
            let will = &config.last_will;
            opts.set_last_will(rumqttc::LastWill::new(
                will.topic.clone(),
                will.payload.clone().into_bytes(),
                will.qos.into(),
                will.retain,
            ));
        }

        opts.set_transport(self.transport());
        opts
    }

    /// MQTT 5.0 options, including the connect properties.
    pub fn v5_options(&self) -> rumqttc::v5::MqttOptions {
        let config = &self.config;
        let mut opts = rumqttc::v5::MqttOptions::new(
            self.client_id.clone(),
            self.broker_address(),
            config.port,
        );

        opts.set_keep_alive(self.keep_alive());
        opts.set_clean_start(config.clean_session);

        if let Some((username, password)) = config.credentials() {
            opts.set_credentials(username, password);
        }

        opts.set_connect_properties(ConnectProperties {
            session_expiry_interval: Some(SESSION_EXPIRY_INTERVAL),
            receive_maximum: Some(RECEIVE_MAXIMUM),
            max_packet_size: Some(MAX_PACKET_SIZE),
            user_properties: config.effective_user_properties(),
            ..Default::default()
        });

        if config.last_will.is_active() {
            let will = &config.last_will;
            let properties = LastWillProperties {
                delay_interval: Some(WILL_DELAY_INTERVAL),
                payload_format_indicator: None,
                message_expiry_interval: None,
                content_type: None,
                response_topic: None,
                correlation_data: None,
                user_properties: Vec::new(),
            };
            opts.set_last_will(LastWillV5::new(
                will.topic.clone(),
                will.payload.clone().into_bytes(),
                will.qos.into(),
                will.retain,
                Some(properties),
            ));
        }

        opts.set_transport(self.transport());
        opts
    }

    /// Creates the client and event loop for the configured version.
    pub fn build(self) -> Result<BuiltClient, SessionError> {
        debug!(
            "Building MQTT {} client {} for {}:{}",
            self.config.version, self.client_id, self.config.host, self.config.port
        );

        let built = match self.config.version {
            ProtocolVersion::V311 => {
                let (client, event_loop) = rumqttc::AsyncClient::new(self.v311_options(), self.cap);
                BuiltClient::V311(client, event_loop)
            }
            ProtocolVersion::V5 => {
                let (client, event_loop) =
                    rumqttc::v5::AsyncClient::new(self.v5_options(), self.cap);
                BuiltClient::V5(client, event_loop)
            }
        };
        Ok(built)
    }
}

/// TLS client configuration that accepts any server certificate.
fn insecure_client_config() -> rustls::ClientConfig {
    rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert))
        .with_no_client_auth()
}

/// Certificate verifier used when self-signed certificates are allowed.
#[derive(Debug)]
struct AcceptAnyServerCert;

impl ServerCertVerifier for AcceptAnyServerCert {
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
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
        ]
    }
}
