mod types;
mod validation;

pub use types::{parse_error_body, ClassificationResult, ScanResult, UploadError};
pub use validation::{is_real_domain, url_host, ValidatingUploader};

use crate::capture::CompressedImage;
use async_trait::async_trait;
use std::sync::Arc;

/// Classification service collaborator. The core never retries.
#[async_trait]
pub trait Uploader: Send + Sync {
    async fn submit(
        &self,
        code: &str,
        image: &CompressedImage,
    ) -> Result<ClassificationResult, UploadError>;
}

#[async_trait]
impl<U: Uploader + ?Sized> Uploader for Arc<U> {
    async fn submit(
        &self,
        code: &str,
        image: &CompressedImage,
    ) -> Result<ClassificationResult, UploadError> {
        (**self).submit(code, image).await
    }
}
