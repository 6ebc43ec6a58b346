use std::fmt::{self, Display};
use std::io;

/// Provides `EpiError` and maps the errors raised while loading and
/// validating model inputs into it.
#[derive(Debug)]
#[allow(clippy::module_name_repetitions)]
pub enum EpiError {
    IoError(io::Error),
    JsonError(serde_json::Error),
    CSVError(csv::Error),
    ParseFloatError(std::num::ParseFloatError),
    EpiError(String),
}

impl From<io::Error> for EpiError {
    fn from(error: io::Error) -> Self {
        EpiError::IoError(error)
    }
}

impl From<serde_json::Error> for EpiError {
    fn from(error: serde_json::Error) -> Self {
        EpiError::JsonError(error)
    }
}

impl From<csv::Error> for EpiError {
    fn from(error: csv::Error) -> Self {
        EpiError::CSVError(error)
    }
}

impl From<std::num::ParseFloatError> for EpiError {
    fn from(error: std::num::ParseFloatError) -> Self {
        EpiError::ParseFloatError(error)
    }
}

impl From<String> for EpiError {
    fn from(error: String) -> Self {
        EpiError::EpiError(error)
    }
}

impl From<&str> for EpiError {
    fn from(error: &str) -> Self {
        EpiError::EpiError(error.to_string())
    }
}

impl std::error::Error for EpiError {}

impl Display for EpiError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Error: {self:?}")?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::EpiError;

    #[test]
    fn test_from_str_is_message_variant() {
        let e: EpiError = "bad input".into();
        match e {
            EpiError::EpiError(msg) => assert_eq!(msg, "bad input"),
            other => panic!("Expected a message error, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_error_converts() {
        let e: EpiError = "x1".parse::<f64>().unwrap_err().into();
        assert!(matches!(e, EpiError::ParseFloatError(_)));
        assert!(e.to_string().starts_with("Error: "));
    }
}
