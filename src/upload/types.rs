use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Minimal classification payload consumed from the service
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub label: Option<String>,
    pub score: f32,
    /// Status reported for the physical object (`"detected"` when found)
    pub object_status: Option<String>,
    pub message: Option<String>,
}

/// Final verdict shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanResult {
    Genuine,
    PoorImage,
    Fake,
}

impl ScanResult {
    /// Map a classification: the object must be detected and the label known,
    /// anything else is a poor image
    pub fn from_classification(result: &ClassificationResult) -> Self {
        if result.object_status.as_deref() != Some("detected") {
            return ScanResult::PoorImage;
        }
        match result.label.as_deref() {
            Some("genuine") => ScanResult::Genuine,
            Some("fake") => ScanResult::Fake,
            _ => ScanResult::PoorImage,
        }
    }
}

/// Upload failure with an optional HTTP-like status code.
///
/// `None` means no code was available and 505 means the code was rejected;
/// both are soft failures that send the user back to scanning.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Upload failed ({status:?}): {message}")]
pub struct UploadError {
    pub status: Option<u16>,
    pub message: String,
}

impl UploadError {
    pub const INVALID_CODE: u16 = 505;
    pub const TIMEOUT: u16 = 408;
    pub const SERVER: u16 = 500;

    pub fn new<S: Into<String>>(status: Option<u16>, message: S) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn no_code() -> Self {
        Self::new(None, "Code is not detected")
    }

    pub fn invalid_code() -> Self {
        Self::new(Some(Self::INVALID_CODE), "Code is invalid")
    }

    pub fn timeout() -> Self {
        Self::new(Some(Self::TIMEOUT), "Request timed out, please try again")
    }

    pub fn server<S: Into<String>>(message: S) -> Self {
        Self::new(Some(Self::SERVER), message)
    }

    /// Failures that reset the session instead of surfacing an error
    pub fn is_soft(&self) -> bool {
        matches!(self.status, None | Some(Self::INVALID_CODE))
    }
}

/// Extract `message` from a JSON error body
pub fn parse_error_body(body: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(value) => value
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| "Unable to communicate with server, please try again".to_string()),
        Err(e) => format!("Unknown error :: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classification(label: Option<&str>, status: Option<&str>) -> ClassificationResult {
        ClassificationResult {
            label: label.map(str::to_string),
            score: 0.9,
            object_status: status.map(str::to_string),
            message: None,
        }
    }

    #[test]
    fn test_result_mapping() {
        let detected = Some("detected");
        assert_eq!(
            ScanResult::from_classification(&classification(Some("genuine"), detected)),
            ScanResult::Genuine
        );
        assert_eq!(
            ScanResult::from_classification(&classification(Some("fake"), detected)),
            ScanResult::Fake
        );
        assert_eq!(
            ScanResult::from_classification(&classification(Some("poor"), detected)),
            ScanResult::PoorImage
        );
        assert_eq!(
            ScanResult::from_classification(&classification(Some("other"), detected)),
            ScanResult::PoorImage
        );
        assert_eq!(
            ScanResult::from_classification(&classification(None, detected)),
            ScanResult::PoorImage
        );
        assert_eq!(
            ScanResult::from_classification(&classification(Some("genuine"), Some("missing"))),
            ScanResult::PoorImage
        );
    }

    #[test]
    fn test_upload_error_softness() {
        assert!(UploadError::no_code().is_soft());
        assert!(UploadError::invalid_code().is_soft());
        assert!(!UploadError::timeout().is_soft());
        assert!(!UploadError::new(Some(404), "Not found").is_soft());
        assert_eq!(UploadError::server("down").status, Some(500));
    }

    #[test]
    fn test_parse_error_body() {
        assert_eq!(parse_error_body(r#"{"message":"quota exceeded"}"#), "quota exceeded");
        assert!(parse_error_body(r#"{"code":1}"#).starts_with("Unable to communicate"));
        assert!(parse_error_body("<html>").starts_with("Unknown error"));
    }
}
