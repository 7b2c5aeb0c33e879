use std::env;
use std::path::PathBuf;

use error_stack::Report;
use error_stack::ResultExt;
use kube::config::KubeConfigOptions;
use kube::config::Kubeconfig;
use kube::Client;
use kube::Config;

use crate::config::CredentialSource;
use crate::infrastructure::k8s::KubernetesError;

/// Location of the local kubeconfig, `$HOME/.kube/config`.
pub fn local_kubeconfig_path() -> Result<PathBuf, Report<KubernetesError>> {
    let home = env::var_os("HOME").ok_or_else(|| {
        Report::new(KubernetesError::ConnectionFailed {
            message: "HOME is not set, cannot locate kubeconfig".to_string(),
        })
    })?;
    Ok(PathBuf::from(home).join(".kube").join("config"))
}

pub async fn init_kube_client(
    credentials: &CredentialSource,
) -> Result<Client, Report<KubernetesError>> {
    let config = match credentials {
        CredentialSource::InCluster => {
            Config::incluster().change_context(KubernetesError::ConnectionFailed {
                message: "Failed to load in-cluster configuration".to_string(),
            })?
        }
        CredentialSource::LocalKubeconfig => {
            let kubeconfig_path = local_kubeconfig_path()?;
            // Load kubeconfig from the user's home directory
            let kubeconfig = Kubeconfig::read_from(&kubeconfig_path).change_context(
                KubernetesError::ConnectionFailed {
                    message: format!(
                        "Failed to read kubeconfig file: {}",
                        kubeconfig_path.display()
                    ),
                },
            )?;

            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .change_context(KubernetesError::ConnectionFailed {
                    message: format!(
                        "Failed to create config from kubeconfig: {}",
                        kubeconfig_path.display()
                    ),
                })?
        }
    };

    Client::try_from(config).change_context(KubernetesError::ConnectionFailed {
        message: "Failed to create Kubernetes client".to_string(),
    })
}
