//! CLI commands

use std::path::PathBuf;

use serde::Serialize;
use tracing::debug;

use fleetbench_cluster::{ClusterProviderRegistry, FederationConfigurator, TopologyManager};
use fleetbench_common::config::{resolve_config_path, Document};
use fleetbench_common::types::ServiceDiscoveryConfig;
use fleetbench_discovery::DiscoveryRegistry;

use crate::{Error, OutputFormat, Result};

pub mod cluster;
pub mod federation;
pub mod test;
pub mod topology;

/// Settings shared by every command
#[derive(Clone, Debug)]
pub struct Context {
    /// Explicit `--config` path
    pub config: Option<PathBuf>,
    /// Result output format
    pub output: OutputFormat,
}

impl Context {
    /// Load and validate the configuration document
    pub fn load_document(&self) -> Result<Document> {
        let path = resolve_config_path(self.config.as_deref());
        if !path.exists() {
            return Err(Error::ConfigNotFound { path });
        }
        debug!(path = %path.display(), "Using configuration");
        Ok(Document::load(&path)?)
    }

    /// Print a result in the selected format, using `text` for human output
    pub fn print<T: Serialize>(&self, value: &T, text: impl FnOnce(&T) -> String) -> Result<()> {
        println!("{}", render(value, self.output, text)?);
        Ok(())
    }
}

/// Render a value as text, JSON or YAML
pub fn render<T: Serialize>(
    value: &T,
    format: OutputFormat,
    text: impl FnOnce(&T) -> String,
) -> Result<String> {
    Ok(match format {
        OutputFormat::Text => text(value),
        OutputFormat::Json => serde_json::to_string_pretty(value)?,
        OutputFormat::Yaml => serde_yaml::to_string(value)?.trim_end().to_string(),
    })
}

/// Topology manager over the built-in providers with the document's timeouts
pub fn topology_manager(doc: &Document) -> TopologyManager {
    TopologyManager::new(ClusterProviderRegistry::with_defaults(), doc.timeouts.clone())
}

/// Federation configurator over the built-in mechanisms and providers
pub fn federation_configurator() -> FederationConfigurator {
    FederationConfigurator::from_providers(
        DiscoveryRegistry::with_defaults(),
        ClusterProviderRegistry::with_defaults(),
    )
}

/// Discovery config for federation: the document's, or a disabled one for
/// the mechanism the topology selects
pub fn discovery_config(doc: &Document) -> ServiceDiscoveryConfig {
    doc.service_discovery.clone().unwrap_or_else(|| {
        let mechanism = doc
            .topology
            .federation
            .discovery
            .clone()
            .unwrap_or_else(|| fleetbench_discovery::dns::MECHANISM.to_string());
        ServiceDiscoveryConfig::disabled(mechanism)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const DOC: &str = r#"
topology:
  name: lab
  primary: { provider: kind, name: p1 }
  federation: { enabled: true, discovery: manual }
"#;

    fn context(path: PathBuf) -> Context {
        Context {
            config: Some(path),
            output: OutputFormat::Text,
        }
    }

    #[test]
    fn missing_config_is_reported_with_its_path() {
        let err = context(PathBuf::from("/nonexistent/fleetbench.yaml"))
            .load_document()
            .unwrap_err();
        assert!(matches!(err, Error::ConfigNotFound { .. }));
        assert!(err.to_string().contains("/nonexistent/fleetbench.yaml"));
    }

    #[test]
    fn loads_document_and_derives_discovery() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(DOC.as_bytes()).unwrap();

        let doc = context(file.path().to_path_buf()).load_document().unwrap();
        assert_eq!(doc.topology.name, "lab");

        let discovery = discovery_config(&doc);
        assert_eq!(discovery.mechanism, "manual");
        assert!(!discovery.enabled);
    }

    #[test]
    fn invalid_document_is_a_core_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"topology: 3").unwrap();
        let err = context(file.path().to_path_buf()).load_document().unwrap_err();
        assert!(matches!(err, Error::Core(_)));
    }

    #[test]
    fn renders_each_format() {
        let value = serde_json::json!({ "name": "p1", "healthy": true });
        let text = render(&value, OutputFormat::Text, |_| "p1 healthy".into()).unwrap();
        assert_eq!(text, "p1 healthy");

        let json = render(&value, OutputFormat::Json, |_| unreachable!()).unwrap();
        assert!(json.contains("\"healthy\": true"));

        let yaml = render(&value, OutputFormat::Yaml, |_| unreachable!()).unwrap();
        assert!(yaml.contains("name: p1"));
    }
}
