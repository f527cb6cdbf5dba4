use std::fmt;
use std::time::Duration;

use serde_json::{json, Value};
use thiserror::Error;
use tracing::{error, info};

use crate::deadline::with_deadline;
use crate::gemini::{GenerationClient, GenerationError};
use crate::models::{BrandAttributes, BrandIdentity};

pub const PALETTE_SIZE: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoVariant {
    Primary,
    Icon,
    Wordmark,
}

impl LogoVariant {
    fn framing(self) -> &'static str {
        match self {
            Self::Primary => "Primary logo, suitable for a website header.",
            Self::Icon => "A simple, recognizable icon version of the logo.",
            Self::Wordmark => "A text-only wordmark version of the logo.",
        }
    }
}

impl fmt::Display for LogoVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Primary => "primary logo",
            Self::Icon => "icon mark",
            Self::Wordmark => "wordmark",
        })
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum BrandError {
    #[error("Please enter a company mission.")]
    Validation,
    #[error("brand attribute generation failed: {0}")]
    Attributes(#[source] GenerationError),
    #[error("{variant} generation failed: {source}")]
    Logo { variant: LogoVariant, #[source] source: GenerationError },
}

/// Response schema for the palette and font pairing request.
pub fn brand_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "colorPalette": {
                "type": "ARRAY",
                "description": "An array of 5 color objects.",
                "minItems": PALETTE_SIZE,
                "maxItems": PALETTE_SIZE,
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "name": { "type": "STRING" },
                        "hex": { "type": "STRING" },
                        "description": { "type": "STRING" }
                    },
                    "required": ["name", "hex", "description"]
                }
            },
            "fontPairing": {
                "type": "OBJECT",
                "description": "A header and body font pairing.",
                "properties": {
                    "header": { "type": "STRING" },
                    "body": { "type": "STRING" }
                },
                "required": ["header", "body"]
            }
        },
        "required": ["colorPalette", "fontPairing"]
    })
}

pub fn attributes_prompt(mission: &str) -> String {
    format!(
        "Based on the company mission \"{mission}\", generate a brand identity. \
        Provide a color palette of 5 colors (name, hex, description) and a font pairing (header and body font from Google Fonts)."
    )
}

pub fn logo_prompt(variant: LogoVariant, mission: &str) -> String {
    format!(
        "{} A modern, minimalist logo for a company with the mission: \"{mission}\".",
        variant.framing()
    )
}

/// Builds a complete brand kit or fails as a whole. A failed attribute request
/// means no logo is ever requested.
pub async fn generate_brand_identity(
    client: &dyn GenerationClient,
    mission: &str,
    limit: Duration,
) -> Result<BrandIdentity, BrandError> {
    let mission = mission.trim();
    if mission.is_empty() {
        return Err(BrandError::Validation);
    }

    info!("🏷️ Generating brand attributes for mission ({} chars)", mission.len());
    let raw = client
        .generate_structured(&attributes_prompt(mission), &brand_schema())
        .await
        .map_err(BrandError::Attributes)?;
    let attributes: BrandAttributes = serde_json::from_value(raw)
        .map_err(|e| BrandError::Attributes(GenerationError::MalformedResponse(e.to_string())))?;
    if attributes.color_palette.len() != PALETTE_SIZE {
        return Err(BrandError::Attributes(GenerationError::MalformedResponse(format!(
            "expected {} palette colors, got {}",
            PALETTE_SIZE,
            attributes.color_palette.len()
        ))));
    }

    let logo = move |variant: LogoVariant| async move {
        with_deadline(limit, client.generate_image(&logo_prompt(variant, mission), &[]))
            .await
            .map_err(|source| {
                error!("❌ {} failed: {}", variant, source);
                BrandError::Logo { variant, source }
            })
    };

    let (primary_logo, secondary_mark_icon, secondary_mark_wordmark) = tokio::try_join!(
        logo(LogoVariant::Primary),
        logo(LogoVariant::Icon),
        logo(LogoVariant::Wordmark)
    )?;

    info!("✅ Brand identity ready: {}/{}", attributes.font_pairing.header, attributes.font_pairing.body);
    Ok(BrandIdentity {
        color_palette: attributes.color_palette,
        font_pairing: Some(attributes.font_pairing),
        primary_logo,
        secondary_mark_icon,
        secondary_mark_wordmark,
    })
}
