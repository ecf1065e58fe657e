//! Plate recognition client
//!
//! The recognition model is an opaque collaborator: `recognize(image)` returns
//! plate text and a confidence. `HttpPlateRecognizer` posts the image to a
//! configured endpoint with reqwest.

use crate::infra::error::{CoreError, CoreResult};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Recognized plate with confidence normalized to [0, 1]
#[derive(Debug, Clone, PartialEq)]
pub struct PlateReading {
    pub plate: String,
    pub confidence: f32,
}

#[async_trait]
pub trait PlateRecognizer: Send + Sync {
    async fn recognize(&self, image: &[u8]) -> CoreResult<PlateReading>;
}

/// Decode a base64 image, accepting an optional `data:image/...;base64,` prefix
pub fn decode_image_base64(encoded: &str) -> CoreResult<Vec<u8>> {
    let trimmed = encoded.trim();
    let data = match trimmed.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => trimmed,
    };
    if data.is_empty() {
        return Err(CoreError::Invalid("image payload is empty".to_string()));
    }
    STANDARD.decode(data).map_err(|e| CoreError::Invalid(format!("invalid base64 image: {e}")))
}

/// Recognizers report either a fraction or a percentage
pub fn normalize_confidence(raw: f32) -> f32 {
    let value = if raw > 1.0 { raw / 100.0 } else { raw };
    value.clamp(0.0, 1.0)
}

#[derive(Serialize)]
struct RecognizeRequest {
    image_base64: String,
}

#[derive(Deserialize)]
struct RecognizeResponse {
    #[serde(default)]
    plate: String,
    #[serde(default)]
    confidence: f32,
}

pub struct HttpPlateRecognizer {
    client: reqwest::Client,
    url: String,
}

impl HttpPlateRecognizer {
    pub fn new(url: impl Into<String>, timeout: Duration) -> CoreResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CoreError::Recognition(format!("failed to build client: {e}")))?;
        Ok(Self { client, url: url.into() })
    }
}

#[async_trait]
impl PlateRecognizer for HttpPlateRecognizer {
    async fn recognize(&self, image: &[u8]) -> CoreResult<PlateReading> {
        let request = RecognizeRequest { image_base64: STANDARD.encode(image) };
        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| CoreError::Recognition(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CoreError::Recognition(format!("recognizer returned {status}")));
        }

        let body: RecognizeResponse = response
            .json()
            .await
            .map_err(|e| CoreError::Recognition(format!("invalid response: {e}")))?;

        let plate = body.plate.trim().to_string();
        if plate.is_empty() {
            return Err(CoreError::Recognition("no plate detected in image".to_string()));
        }
        let confidence = normalize_confidence(body.confidence);
        debug!(plate = %plate, confidence = %confidence, "plate_recognized");
        Ok(PlateReading { plate, confidence })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_plain_and_data_url() {
        let encoded = STANDARD.encode(b"jpegbytes");
        assert_eq!(decode_image_base64(&encoded).unwrap(), b"jpegbytes");

        let data_url = format!("data:image/jpeg;base64,{encoded}");
        assert_eq!(decode_image_base64(&data_url).unwrap(), b"jpegbytes");
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_image_base64("").is_err());
        assert!(decode_image_base64("not base64!!").is_err());
    }

    #[test]
    fn test_confidence_normalization() {
        assert_eq!(normalize_confidence(0.92), 0.92);
        assert!((normalize_confidence(92.0) - 0.92).abs() < 1e-6);
        assert_eq!(normalize_confidence(150.0), 1.0);
        assert_eq!(normalize_confidence(-0.5), 0.0);
    }
}
