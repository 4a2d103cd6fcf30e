use super::{ClassificationResult, UploadError, Uploader};
use crate::capture::CompressedImage;
use crate::config::UploadConfig;
use async_trait::async_trait;
use tracing::{debug, warn};
use url::Url;

/// Lowercased host of an absolute URL, parsed with WHATWG rules
pub fn url_host(code: &str) -> Option<String> {
    let parsed = Url::parse(code.trim()).ok()?;
    match parsed.host_str() {
        Some(host) if !host.is_empty() => Some(host.to_ascii_lowercase()),
        _ => None,
    }
}

/// A URL whose host looks like a public domain
pub fn is_real_domain(code: &str) -> bool {
    url_host(code).is_some_and(|host| host.contains('.') && !host.contains("localhost"))
}

/// Applies the code domain policy before delegating to the real uploader
pub struct ValidatingUploader<U> {
    inner: U,
    allowed_domains: Vec<String>,
}

impl<U: Uploader> ValidatingUploader<U> {
    pub fn new(inner: U, config: &UploadConfig) -> Self {
        Self {
            inner,
            allowed_domains: config
                .allowed_domains
                .iter()
                .map(|d| d.to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn is_allowed(&self, code: &str) -> bool {
        url_host(code)
            .map(|host| {
                let domain = host.strip_prefix("www.").unwrap_or(&host).to_string();
                self.allowed_domains.contains(&domain)
            })
            .unwrap_or(false)
    }
}

#[async_trait]
impl<U: Uploader> Uploader for ValidatingUploader<U> {
    async fn submit(
        &self,
        code: &str,
        image: &CompressedImage,
    ) -> Result<ClassificationResult, UploadError> {
        if code.trim().is_empty() {
            return Err(UploadError::no_code());
        }

        if !is_real_domain(code) {
            warn!("Rejecting code without a real domain: {}", code);
            return Err(UploadError::invalid_code());
        }

        if !self.is_allowed(code) {
            debug!("Code domain not recognized, classifying as fake: {}", code);
            return Ok(ClassificationResult {
                label: Some("fake".to_string()),
                score: 0.0,
                object_status: Some("detected".to_string()),
                message: Some("Code link is not recognized".to_string()),
            });
        }

        self.inner.submit(code, image).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upload::ScanResult;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingUploader {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Uploader for CountingUploader {
        async fn submit(
            &self,
            _code: &str,
            _image: &CompressedImage,
        ) -> Result<ClassificationResult, UploadError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ClassificationResult {
                label: Some("genuine".into()),
                score: 0.97,
                object_status: Some("detected".into()),
                message: None,
            })
        }
    }

    fn image() -> CompressedImage {
        CompressedImage {
            data: vec![0xFF, 0xD8],
            quality: 100,
            width: 1,
            height: 1,
        }
    }

    #[test]
    fn test_url_host() {
        assert_eq!(url_host("https://www.QTRU.st/abc?x=1"), Some("www.qtru.st".into()));
        assert_eq!(url_host("http://user@ahm.to:8080"), Some("ahm.to".into()));
        assert_eq!(url_host("qtru.st/abc"), None);
        assert_eq!(url_host("mailto:someone@qtru.st"), None);
        assert!(is_real_domain("https://example.com"));
        assert!(!is_real_domain("http://localhost.dev"));
        assert!(!is_real_domain("http://intranet/x"));
        assert!(!is_real_domain("plain text"));
    }

    #[test]
    fn test_userinfo_does_not_spoof_host() {
        let uploader = ValidatingUploader::new(CountingUploader::default(), &UploadConfig::default());

        assert_eq!(url_host("https://evil.com\\@qtru.st/x"), Some("evil.com".into()));
        assert!(!uploader.is_allowed("https://evil.com\\@qtru.st/x"));
        assert_eq!(url_host("https://qtru.st@evil.com/x"), Some("evil.com".into()));
        assert!(!uploader.is_allowed("https://qtru.st@evil.com/x"));
        assert!(!uploader.is_allowed("https://qtru.st.evil.com/x"));
        assert!(uploader.is_allowed("https://user@qtru.st/x"));
    }

    #[tokio::test]
    async fn test_policy() {
        let uploader = ValidatingUploader::new(CountingUploader::default(), &UploadConfig::default());

        assert_eq!(uploader.submit("  ", &image()).await, Err(UploadError::no_code()));
        assert_eq!(
            uploader.submit("not a url", &image()).await.unwrap_err().status,
            Some(505)
        );

        let fake = uploader.submit("https://example.com/a", &image()).await.unwrap();
        assert_eq!(ScanResult::from_classification(&fake), ScanResult::Fake);
        assert_eq!(uploader.inner.calls.load(Ordering::SeqCst), 0);

        let genuine = uploader.submit("https://www.qtru.st/abc", &image()).await.unwrap();
        assert_eq!(ScanResult::from_classification(&genuine), ScanResult::Genuine);
        assert_eq!(uploader.inner.calls.load(Ordering::SeqCst), 1);
    }
}
