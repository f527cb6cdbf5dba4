use base64::Engine;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use uuid::Uuid;

/// Binary image attached to a generation request.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceImage {
    pub data: Bytes,
    pub mime_type: String,
}

impl ReferenceImage {
    pub fn new(data: impl Into<Bytes>, mime_type: impl Into<String>) -> Self {
        Self { data: data.into(), mime_type: mime_type.into() }
    }

    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.data)
    }

    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.to_base64())
    }

    /// Parses a `data:<mime>;base64,<payload>` URL.
    pub fn from_data_url(url: &str) -> Option<Self> {
        let rest = url.strip_prefix("data:")?;
        let (header, payload) = rest.split_once(',')?;
        let mime_type = header.strip_suffix(";base64")?;
        let data = base64::engine::general_purpose::STANDARD.decode(payload.trim()).ok()?;
        Some(Self::new(data, mime_type))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub label: String,
    pub prompt: String,
    pub reference_images: Vec<ReferenceImage>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum GenerationOutcome {
    #[serde(rename_all = "camelCase")]
    Success { label: String, result_url: String },
    Failure { label: String, reason: String },
}

impl GenerationOutcome {
    pub fn label(&self) -> &str {
        match self {
            Self::Success { label, .. } | Self::Failure { label, .. } => label,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Male,
    Female,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Hairstyle {
    pub name: &'static str,
    pub description: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    Upload,
    CategorySelect,
    StyleSelect,
    Generating,
    Results,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub name: String,
    pub hex: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FontPairing {
    pub header: String,
    pub body: String,
}

/// Shape of the structured brand response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrandAttributes {
    pub color_palette: Vec<Color>,
    pub font_pairing: FontPairing,
}

#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BrandIdentity {
    pub color_palette: Vec<Color>,
    pub font_pairing: Option<FontPairing>,
    pub primary_logo: String,
    pub secondary_mark_icon: String,
    pub secondary_mark_wordmark: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub role: Role,
    pub text: String,
    pub sent_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self { role, text: text.into(), sent_at: Utc::now() }
    }
}

// --- API payloads ---

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct UploadPhotoRequest {
    /// Raw base64 or a `data:` URL.
    pub data: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CategoryRequest {
    pub category: Category,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ToggleStyleRequest {
    pub style: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BrandRequest {
    pub mission: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ChatRequest {
    pub text: String,
}

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ResultImage {
    pub style: String,
    pub url: String,
    pub file_name: String,
}

#[skip_serializing_none]
#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct MakeoverView {
    pub id: Uuid,
    pub phase: Phase,
    pub preview_url: Option<String>,
    pub category: Option<Category>,
    pub selected_styles: Vec<String>,
    pub can_generate: bool,
    pub results: Vec<ResultImage>,
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ChatView {
    pub id: Uuid,
    pub messages: Vec<ChatMessage>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn data_url_parses_back_into_image() {
        let image = ReferenceImage::new(vec![1u8, 2, 3, 250], "image/png");
        let url = image.to_data_url();
        assert!(url.starts_with("data:image/png;base64,"));
        assert_eq!(ReferenceImage::from_data_url(&url), Some(image));
    }

    #[test]
    fn data_url_rejects_non_base64_header() {
        assert_eq!(ReferenceImage::from_data_url("data:image/png,abc"), None);
        assert_eq!(ReferenceImage::from_data_url("https://example.com/a.png"), None);
    }

    #[test]
    fn outcome_serializes_with_status_tag() {
        let outcome = GenerationOutcome::Success { label: "Bob Cut".into(), result_url: "data:x".into() };
        assert_eq!(
            serde_json::to_value(&outcome).unwrap(),
            serde_json::json!({"status": "success", "label": "Bob Cut", "resultUrl": "data:x"})
        );
    }

    #[test]
    fn brand_attributes_read_camel_case_fields() {
        let attrs: BrandAttributes = serde_json::from_value(serde_json::json!({
            "colorPalette": [{"name": "Ink", "hex": "#111111", "description": "Primary text"}],
            "fontPairing": {"header": "Poppins", "body": "Inter"}
        }))
        .unwrap();
        assert_eq!(attrs.color_palette[0].hex, "#111111");
        assert_eq!(attrs.font_pairing.body, "Inter");
    }
}
