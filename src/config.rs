//! Configuration management

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::endpoint::Timeouts;
use crate::mtls::{PeerPolicy, Role, TrustContext, TrustContextBuilder, TrustModel};
use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Network endpoint configuration
    pub endpoint: EndpointConfig,
    /// Local certificate and key
    pub identity: IdentityConfig,
    /// How the peer certificate is trusted
    pub trust: TrustConfig,
    /// Post-handshake peer policy
    pub policy: PolicyConfig,
}

/// Endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Host to bind to (server) or connect to (client)
    pub host: String,
    /// Port
    pub port: u16,
    /// Listen backlog
    pub backlog: u32,
    /// Upper bound on the TLS handshake
    #[serde(with = "humantime_serde")]
    pub handshake_timeout: Duration,
    /// Upper bound on a single receive
    #[serde(with = "humantime_serde")]
    pub receive_timeout: Duration,
    /// Name the client verifies the server certificate against
    pub server_name: String,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 1234,
            backlog: 10,
            handshake_timeout: Duration::from_secs(10),
            receive_timeout: Duration::from_secs(30),
            server_name: crate::mtls::DEFAULT_SERVER_NAME.to_string(),
        }
    }
}

impl EndpointConfig {
    /// Handshake and receive bounds.
    #[must_use]
    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            handshake: self.handshake_timeout,
            receive: self.receive_timeout,
        }
    }

    /// Resolve `host:port` to the first matching socket address.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the host does not resolve.
    pub async fn socket_addr(&self) -> Result<SocketAddr> {
        tokio::net::lookup_host((self.host.as_str(), self.port))
            .await
            .map_err(|e| Error::Config(format!("Cannot resolve '{}': {e}", self.host)))?
            .next()
            .ok_or_else(|| Error::Config(format!("No address for '{}'", self.host)))
    }
}

/// Local identity: the certificate presented to the peer and its key
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// PEM certificate (chain)
    pub cert: PathBuf,
    /// PEM private key
    pub key: PathBuf,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            cert: PathBuf::from("server.pem"),
            key: PathBuf::from("server.key"),
        }
    }
}

/// Trust model selector
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustModelKind {
    /// Pin the peer's self-signed certificate
    #[default]
    Pinned,
    /// Verify the peer against root CA certificates
    RootCa,
}

/// Peer trust configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustConfig {
    /// Trust model
    pub model: TrustModelKind,
    /// Pinned peer certificate (pinned model)
    pub peer_cert: Option<PathBuf>,
    /// Root certificates (root CA model)
    pub root_certs: Vec<PathBuf>,
}

impl TrustConfig {
    /// Convert to the context builder's trust model.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the selected model lacks its certificate paths.
    pub fn to_model(&self) -> Result<TrustModel> {
        match self.model {
            TrustModelKind::Pinned => self
                .peer_cert
                .clone()
                .map(TrustModel::PinnedPeer)
                .ok_or_else(|| Error::Config("trust.peer_cert is required for the pinned model".to_string())),
            TrustModelKind::RootCa if self.root_certs.is_empty() => Err(Error::Config(
                "trust.root_certs is required for the root_ca model".to_string(),
            )),
            TrustModelKind::RootCa => Ok(TrustModel::RootCa(self.root_certs.clone())),
        }
    }
}

/// Post-handshake peer policy configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Required peer commonName
    pub expected_common_name: Option<String>,
    /// Re-verify the peer certificate against the trust anchors after the handshake
    pub verify_chain: bool,
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // MTLS_TRUST_ENDPOINT__PORT=4321 → endpoint.port
        figment = figment.merge(Env::prefixed("MTLS_TRUST_").split("__"));

        let config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values no endpoint can work with.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` naming the offending key.
    pub fn validate(&self) -> Result<()> {
        if self.endpoint.backlog == 0 {
            return Err(Error::Config("endpoint.backlog must be positive".to_string()));
        }
        if self.endpoint.handshake_timeout.is_zero() {
            return Err(Error::Config(
                "endpoint.handshake_timeout must be positive".to_string(),
            ));
        }
        if self.endpoint.receive_timeout.is_zero() {
            return Err(Error::Config(
                "endpoint.receive_timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Context builder for `role` from the identity and trust sections.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the trust section is incomplete.
    pub fn context_builder(&self, role: Role) -> Result<TrustContextBuilder> {
        Ok(TrustContextBuilder::new(
            role,
            &self.identity.cert,
            &self.identity.key,
            self.trust.to_model()?,
        )
        .server_name(&self.endpoint.server_name))
    }

    /// Build the peer policy.  The explicit chain check reuses the anchors
    /// of `context`.
    #[must_use]
    pub fn peer_policy(&self, context: &TrustContext) -> PeerPolicy {
        let mut policy = PeerPolicy::new();
        if let Some(ref cn) = self.policy.expected_common_name {
            policy = policy.with_expected_common_name(cn);
        }
        if self.policy.verify_chain {
            policy = policy.with_chain_check(context.anchors().clone());
        }
        policy
    }
}

/// Custom humantime serde module for Duration
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to human-readable string (e.g., "30s", "500ms")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    /// Deserialize human-readable duration string (e.g., "30s", "5m", "100ms")
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let s = s.trim();

        // "ms" before "s": every "100ms" also ends in 's'
        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(serde::de::Error::custom)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.parse::<u64>()
                .map(|m| Duration::from_secs(m * 60))
                .map_err(serde::de::Error::custom)
        } else {
            // Assume seconds
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn defaults_match_reference_endpoint() {
        let config = Config::default();
        assert_eq!(config.endpoint.host, "127.0.0.1");
        assert_eq!(config.endpoint.port, 1234);
        assert_eq!(config.endpoint.backlog, 10);
        assert_eq!(config.endpoint.handshake_timeout, Duration::from_secs(10));
        assert_eq!(config.endpoint.receive_timeout, Duration::from_secs(30));
        assert_eq!(config.trust.model, TrustModelKind::Pinned);
        assert!(!config.policy.verify_chain);
    }

    #[test]
    fn full_config_deserialises_from_yaml() {
        let yaml = r"
endpoint:
  host: 0.0.0.0
  port: 4433
  backlog: 64
  handshake_timeout: 500ms
  receive_timeout: 1m
  server_name: server.mydomain.com
identity:
  cert: client.pem
  key: client.key
trust:
  model: root_ca
  root_certs: [rootCA.cert]
policy:
  expected_common_name: server.mydomain.com
  verify_chain: true
";
        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.endpoint.port, 4433);
        assert_eq!(config.endpoint.handshake_timeout, Duration::from_millis(500));
        assert_eq!(config.endpoint.receive_timeout, Duration::from_secs(60));
        assert_eq!(config.identity.cert, PathBuf::from("client.pem"));
        assert_eq!(config.trust.model, TrustModelKind::RootCa);
        assert_eq!(
            config.trust.to_model().unwrap(),
            TrustModel::RootCa(vec![PathBuf::from("rootCA.cert")])
        );
        assert_eq!(
            config.policy.expected_common_name.as_deref(),
            Some("server.mydomain.com")
        );
        assert!(config.policy.verify_chain);
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let config: Config = serde_yaml::from_str("endpoint:\n  port: 9000\n").unwrap();
        assert_eq!(config.endpoint.port, 9000);
        assert_eq!(config.endpoint.backlog, 10);
        assert_eq!(config.identity.key, PathBuf::from("server.key"));
    }

    #[test]
    fn pinned_model_requires_peer_cert() {
        let trust = TrustConfig::default();
        assert!(matches!(trust.to_model(), Err(Error::Config(_))));

        let trust = TrustConfig {
            peer_cert: Some(PathBuf::from("client.pem")),
            ..TrustConfig::default()
        };
        assert_eq!(
            trust.to_model().unwrap(),
            TrustModel::PinnedPeer(PathBuf::from("client.pem"))
        );
    }

    #[test]
    fn root_ca_model_requires_roots() {
        let trust = TrustConfig {
            model: TrustModelKind::RootCa,
            ..TrustConfig::default()
        };
        assert!(matches!(trust.to_model(), Err(Error::Config(_))));
    }

    #[test]
    fn load_missing_file_is_config_error() {
        let err = Config::load(Some(Path::new("/nonexistent/mtls.yaml"))).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn load_reads_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mtls.yaml");
        std::fs::write(
            &path,
            "endpoint:\n  port: 4321\ntrust:\n  peer_cert: client.pem\n",
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.endpoint.port, 4321);
        assert_eq!(config.trust.peer_cert, Some(PathBuf::from("client.pem")));
    }

    #[test]
    fn load_rejects_zero_backlog() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mtls.yaml");
        std::fs::write(&path, "endpoint:\n  backlog: 0\n").unwrap();

        let err = Config::load(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("backlog"));
    }

    #[test]
    fn humantime_parses_millis_seconds_and_minutes() {
        #[derive(Deserialize)]
        struct Wrapper {
            #[serde(with = "humantime_serde")]
            d: Duration,
        }

        let parse = |s: &str| serde_yaml::from_str::<Wrapper>(&format!("d: {s}")).unwrap().d;
        assert_eq!(parse("250ms"), Duration::from_millis(250));
        assert_eq!(parse("10s"), Duration::from_secs(10));
        assert_eq!(parse("2m"), Duration::from_secs(120));
        assert_eq!(parse("\"7\""), Duration::from_secs(7));
    }

    #[test]
    fn humantime_serializes_sub_second_as_millis() {
        let endpoint = EndpointConfig {
            handshake_timeout: Duration::from_millis(1500),
            ..EndpointConfig::default()
        };
        let yaml = serde_yaml::to_string(&endpoint).unwrap();
        assert!(yaml.contains("handshake_timeout: 1500ms"));
        assert!(yaml.contains("receive_timeout: 30s"));
    }

    #[tokio::test]
    async fn socket_addr_resolves_loopback() {
        let endpoint = EndpointConfig::default();
        let addr = endpoint.socket_addr().await.unwrap();
        assert_eq!(addr, "127.0.0.1:1234".parse::<SocketAddr>().unwrap());
    }
}
