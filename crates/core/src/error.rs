use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("unknown runtime sequence: {0:?}")]
    UnknownSequence(String),

    #[error("unknown platform mode: {0:?}")]
    UnknownPlatformMode(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = CoreError::UnknownSequence("frobnicate".to_string());
        assert_eq!(error.to_string(), "unknown runtime sequence: \"frobnicate\"");
    }

    #[test]
    fn test_platform_mode_error_display() {
        let error = CoreError::UnknownPlatformMode("vm".to_string());
        assert!(error.to_string().contains("\"vm\""));
    }
}
