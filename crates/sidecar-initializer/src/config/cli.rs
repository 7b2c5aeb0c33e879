use clap::Parser;
use utils::version;

pub const DEFAULT_ANNOTATION: &str = "initializer.kubernetes.io/envoy";
pub const DEFAULT_INITIALIZER_NAME: &str = "envoy.initializer.kubernetes.io";
pub const DEFAULT_CONFIGMAP: &str = "envoy-initializer";
pub const DEFAULT_NAMESPACE: &str = "default";

/// Injects sidecar containers into Deployments awaiting initialization.
#[derive(Parser, Clone, Debug)]
#[command(about, long_about, version = &**version::VERSION)]
pub struct Cli {
    #[arg(
        long,
        env = "INITIALIZER_ANNOTATION",
        default_value = DEFAULT_ANNOTATION,
        help = "The annotation to trigger initialization"
    )]
    pub annotation: String,

    #[arg(
        long,
        env = "INITIALIZER_CONFIGMAP",
        default_value = DEFAULT_CONFIGMAP,
        help = "The sidecar initializer configuration configmap"
    )]
    pub configmap: String,

    #[arg(
        long,
        env = "INITIALIZER_NAME",
        default_value = DEFAULT_INITIALIZER_NAME,
        help = "The initializer name"
    )]
    pub initializer_name: String,

    #[arg(
        long,
        env = "INITIALIZER_NAMESPACE",
        default_value = DEFAULT_NAMESPACE,
        help = "The configuration namespace"
    )]
    pub namespace: String,

    #[arg(long, help = "Require annotation for initialization")]
    pub require_annotation: bool,

    #[arg(
        long,
        help = "Use $HOME/.kube/config instead of in-cluster credentials"
    )]
    pub kubeconfig: bool,

    #[arg(
        long,
        default_value_t = 30,
        value_parser = clap::value_parser!(u64).range(1..),
        help = "Seconds between full re-lists of uninitialized deployments"
    )]
    pub resync_period_secs: u64,
}
