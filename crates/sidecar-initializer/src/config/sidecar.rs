//! Sidecar configuration loaded from a ConfigMap.

use error_stack::Report;
use error_stack::ResultExt;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::api::core::v1::Container;
use k8s_openapi::api::core::v1::Volume;
use serde::Deserialize;
use tracing::info;

use crate::domain::InitializerError;
use crate::infrastructure::k8s::ClusterSession;

/// ConfigMap data key holding the sidecar document.
pub const CONFIG_KEY: &str = "config";

/// Containers and volumes appended to every initialized pod template.
///
/// Both lists keep the order they have in the source document.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SidecarConfig {
    #[serde(default, alias = "Containers")]
    pub containers: Vec<Container>,
    #[serde(default, alias = "Volumes")]
    pub volumes: Vec<Volume>,
}

impl SidecarConfig {
    /// Parse a YAML (or JSON) document with `containers` and `volumes` lists.
    ///
    /// # Errors
    ///
    /// - [`InitializerError::ConfigParse`] if the document is malformed, an
    ///   element does not match the container/volume schema, or an element
    ///   has an empty name
    pub fn parse(document: &str) -> Result<Self, Report<InitializerError>> {
        let config: Self =
            serde_yaml::from_str(document).change_context(InitializerError::ConfigParse {
                message: "sidecar configuration does not match the containers/volumes schema"
                    .to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Every element must be named. Missing required strings deserialize as
    /// `""`, so absence shows up as an empty name.
    fn validate(&self) -> Result<(), Report<InitializerError>> {
        let unnamed = |kind: &str, index: usize| {
            Report::new(InitializerError::ConfigParse {
                message: format!("{kind} #{index} has no name"),
            })
        };

        if let Some(index) = self.containers.iter().position(|c| c.name.is_empty()) {
            return Err(unnamed("container", index));
        }
        if let Some(index) = self.volumes.iter().position(|v| v.name.is_empty()) {
            return Err(unnamed("volume", index));
        }
        Ok(())
    }

    /// Read the document stored under [`CONFIG_KEY`].
    pub fn from_config_map(config_map: &ConfigMap) -> Result<Self, Report<InitializerError>> {
        let document = config_map
            .data
            .as_ref()
            .and_then(|data| data.get(CONFIG_KEY))
            .ok_or_else(|| {
                Report::new(InitializerError::ConfigParse {
                    message: format!("configmap has no `{CONFIG_KEY}` key"),
                })
            })?;
        Self::parse(document)
    }

    /// Fetch and parse the configuration ConfigMap.
    ///
    /// # Errors
    ///
    /// - [`InitializerError::ConfigUnavailable`] if the ConfigMap cannot be fetched
    /// - [`InitializerError::ConfigParse`] if its contents are invalid
    pub async fn load<S: ClusterSession>(
        session: &S,
        namespace: &str,
        name: &str,
    ) -> Result<Self, Report<InitializerError>> {
        let config_map = session.get_config_map(namespace, name).await.change_context(
            InitializerError::ConfigUnavailable {
                name: name.to_string(),
                namespace: namespace.to_string(),
            },
        )?;

        let config = Self::from_config_map(&config_map)
            .attach_printable_lazy(|| format!("configmap {namespace}/{name}"))?;
        info!(
            containers = config.containers.len(),
            volumes = config.volumes.len(),
            "Loaded sidecar configuration from {namespace}/{name}"
        );
        Ok(config)
    }
}
