use core::error::Error;

/// Errors raised while configuring or running the initializer.
#[derive(Debug, derive_more::Display)]
pub enum InitializerError {
    #[display("Sidecar configuration {namespace}/{name} is unavailable")]
    ConfigUnavailable { name: String, namespace: String },
    #[display("Failed to parse sidecar configuration: {message}")]
    ConfigParse { message: String },
    #[display("Failed to encode deployment {workload} for diffing")]
    DiffEncoding { workload: String },
    #[display("Patch rejected for deployment {workload}")]
    PatchRejected { workload: String },
}

impl Error for InitializerError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initializer_error_display_formatting() {
        let parse = InitializerError::ConfigParse {
            message: "bad yaml".to_string(),
        };
        assert_eq!(
            parse.to_string(),
            "Failed to parse sidecar configuration: bad yaml"
        );

        let rejected = InitializerError::PatchRejected {
            workload: "shop/web".to_string(),
        };
        assert_eq!(rejected.to_string(), "Patch rejected for deployment shop/web");
    }
}
