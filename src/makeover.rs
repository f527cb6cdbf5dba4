use bytes::Bytes;
use chrono::{DateTime, Utc};
use image::ImageFormat;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::batch::{all_failed, successes};
use crate::models::{
    Category, GenerationOutcome, GenerationRequest, Hairstyle, MakeoverView, Phase, ReferenceImage, ResultImage,
};

pub const MAX_STYLES: usize = 5;
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;
pub const NO_RESULTS_MESSAGE: &str = "Sorry, we couldn't generate any new hairstyles. This might be due to a safety policy violation or a network issue. Please try a different photo or hairstyle.";
const NOT_READY_MESSAGE: &str = "Please upload a photo and select at least one hairstyle.";
const STYLE_PLACEHOLDER: &str = "[desired hairstyle]";

const PROMPT_TEMPLATE: &str = "Change the hairstyle of the person in the photo to [desired hairstyle]. \
Keep the face, skin tone, and lighting consistent. \
Ensure the result looks natural and professionally styled. \
Maintain realistic hair texture, color, and shadows. \
Maintain the original aspect ratio of the photo. \
Do not alter facial features, expression, or background unless necessary for realism. \
Output in ultra-realistic photographic quality, 4K resolution, flattering studio lighting.";

const MALE_HAIRSTYLES: &[Hairstyle] = &[
    Hairstyle { name: "Crew Cut", description: "Short, tapered sides." },
    Hairstyle { name: "Undercut", description: "Long top, short sides." },
    Hairstyle { name: "Pompadour", description: "Voluminous swept-up front." },
    Hairstyle { name: "Quiff", description: "Messier than a pompadour." },
    Hairstyle { name: "Buzz Cut", description: "Ultra-short and uniform." },
    Hairstyle { name: "Slicked Back", description: "Classic and sophisticated." },
    Hairstyle { name: "Faux Hawk", description: "Spiky top, not a full mohawk." },
    Hairstyle { name: "Flowing Layered", description: "Full, airy layers with lift and bounce" },
];

const FEMALE_HAIRSTYLES: &[Hairstyle] = &[
    Hairstyle { name: "Bob Cut", description: "Classic chin-length style." },
    Hairstyle { name: "Pixie Cut", description: "Very short and chic." },
    Hairstyle { name: "Long Layers", description: "Adds volume and movement." },
    Hairstyle { name: "Shag Haircut", description: "Layered and textured." },
    Hairstyle { name: "Curtain Bangs", description: "Face-framing fringe." },
    Hairstyle { name: "Braids", description: "Intricate woven styles." },
    Hairstyle { name: "Ponytail", description: "Simple and versatile." },
    Hairstyle { name: "Wavy Lob", description: "Shoulder-length waves." },
    Hairstyle { name: "French Bob", description: "Short, sharp, with bangs." },
    Hairstyle { name: "Wolf Cut", description: "A wild, shaggy mullet." },
    Hairstyle { name: "Butterfly Cut", description: "Feathery, face-framing layers." },
    Hairstyle { name: "Cornrows", description: "Tight, raised braids." },
];

pub fn catalogue(category: Category) -> &'static [Hairstyle] {
    match category {
        Category::Male => MALE_HAIRSTYLES,
        Category::Female => FEMALE_HAIRSTYLES,
    }
}

pub fn style_prompt(style: &str) -> String {
    PROMPT_TEMPLATE.replace(STYLE_PLACEHOLDER, style)
}

/// `Bob Cut` becomes `hairstyle-ai-studio-bob-cut.png`.
pub fn download_file_name(style: &str) -> String {
    let slug = style.to_lowercase().split_whitespace().collect::<Vec<_>>().join("-");
    format!("hairstyle-ai-studio-{slug}.png")
}

#[derive(Debug, Error, PartialEq)]
pub enum MakeoverError {
    #[error("{0}")]
    Validation(String),
    #[error("cannot {action} during the {phase:?} phase")]
    WrongPhase { action: &'static str, phase: Phase },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Toggle {
    Added,
    Removed,
    CapReached,
}

/// Requests for one generation run, tagged with the session epoch they belong to.
#[derive(Debug)]
pub struct GenerationTicket {
    pub epoch: u64,
    pub requests: Vec<GenerationRequest>,
}

#[derive(Debug, Clone)]
pub struct MakeoverSession {
    id: Uuid,
    source_image: Option<ReferenceImage>,
    preview_url: Option<String>,
    category: Option<Category>,
    selected_styles: Vec<String>,
    outcomes: Vec<GenerationOutcome>,
    phase: Phase,
    error: Option<String>,
    epoch: u64,
    updated_at: DateTime<Utc>,
}

impl MakeoverSession {
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            source_image: None,
            preview_url: None,
            category: None,
            selected_styles: Vec::new(),
            outcomes: Vec::new(),
            phase: Phase::Upload,
            error: None,
            epoch: 0,
            updated_at: Utc::now(),
        }
    }

    pub fn phase(&self) -> Phase { self.phase }
    pub fn selected_styles(&self) -> &[String] { &self.selected_styles }
    pub fn outcomes(&self) -> &[GenerationOutcome] { &self.outcomes }
    pub fn updated_at(&self) -> DateTime<Utc> { self.updated_at }

    /// Accepts a new photo. Always a full reset, whatever phase the session is in.
    pub fn upload(&mut self, data: Bytes) -> Result<(), MakeoverError> {
        if data.len() > MAX_UPLOAD_BYTES {
            return Err(MakeoverError::Validation("Photos must be 10MB or smaller.".into()));
        }
        let format = image::guess_format(&data)
            .ok()
            .filter(|f| matches!(f, ImageFormat::Png | ImageFormat::Jpeg | ImageFormat::WebP | ImageFormat::Gif))
            .ok_or_else(|| MakeoverError::Validation("Please upload a PNG, JPG, WEBP or GIF image.".into()))?;

        self.reset();
        let image = ReferenceImage::new(data, format.to_mime_type());
        info!("📷 Session {} received a {} photo ({} bytes)", self.id, image.mime_type, image.data.len());
        self.preview_url = Some(image.to_data_url());
        self.source_image = Some(image);
        self.phase = Phase::CategorySelect;
        Ok(())
    }

    pub fn choose_category(&mut self, category: Category) -> Result<(), MakeoverError> {
        match self.phase {
            Phase::CategorySelect | Phase::StyleSelect => {}
            phase => return Err(MakeoverError::WrongPhase { action: "choose a category", phase }),
        }
        if self.category != Some(category) {
            self.selected_styles.clear();
        }
        self.category = Some(category);
        self.phase = Phase::StyleSelect;
        self.touch();
        Ok(())
    }

    /// Selecting a selected style removes it; a re-added style goes to the end.
    /// At the cap, adding is a no-op.
    pub fn toggle_style(&mut self, style: &str) -> Result<Toggle, MakeoverError> {
        if self.phase != Phase::StyleSelect {
            return Err(MakeoverError::WrongPhase { action: "select a style", phase: self.phase });
        }
        let known = self
            .category
            .map(|c| catalogue(c).iter().any(|h| h.name == style))
            .unwrap_or(false);
        if !known {
            return Err(MakeoverError::Validation(format!("Unknown hairstyle: {style}")));
        }

        let toggle = if let Some(pos) = self.selected_styles.iter().position(|s| s == style) {
            self.selected_styles.remove(pos);
            Toggle::Removed
        } else if self.selected_styles.len() < MAX_STYLES {
            self.selected_styles.push(style.to_string());
            Toggle::Added
        } else {
            Toggle::CapReached
        };
        self.touch();
        Ok(toggle)
    }

    pub fn can_generate(&self) -> bool {
        self.phase == Phase::StyleSelect && self.source_image.is_some() && !self.selected_styles.is_empty()
    }

    pub fn begin_generation(&mut self) -> Result<GenerationTicket, MakeoverError> {
        if self.phase == Phase::Generating {
            return Err(MakeoverError::WrongPhase { action: "start generating", phase: self.phase });
        }
        let source = match &self.source_image {
            Some(image) if self.can_generate() => image.clone(),
            _ => return Err(MakeoverError::Validation(NOT_READY_MESSAGE.into())),
        };

        let requests = self
            .selected_styles
            .iter()
            .map(|style| GenerationRequest {
                label: style.clone(),
                prompt: style_prompt(style),
                reference_images: vec![source.clone()],
            })
            .collect();

        self.phase = Phase::Generating;
        self.error = None;
        self.outcomes.clear();
        self.touch();
        info!("🎯 Session {} generating {} new look(s)", self.id, self.selected_styles.len());
        Ok(GenerationTicket { epoch: self.epoch, requests })
    }

    /// Stores batch outcomes. Returns `false` when the ticket predates a reset or
    /// re-upload, in which case the outcomes are dropped.
    pub fn complete_generation(&mut self, epoch: u64, outcomes: Vec<GenerationOutcome>) -> bool {
        if epoch != self.epoch || self.phase != Phase::Generating {
            warn!("⚠️ Session {} discarded {} stale outcome(s)", self.id, outcomes.len());
            return false;
        }
        if all_failed(&outcomes) {
            warn!("❌ Session {} produced no hairstyles", self.id);
            self.error = Some(NO_RESULTS_MESSAGE.to_string());
        }
        self.outcomes = outcomes;
        self.phase = Phase::Results;
        self.touch();
        true
    }

    /// Successful results only, in selection order.
    pub fn results(&self) -> Vec<ResultImage> {
        self.selected_styles
            .iter()
            .filter_map(|style| {
                self.result_url(style).map(|url| ResultImage {
                    style: style.clone(),
                    url: url.to_string(),
                    file_name: download_file_name(style),
                })
            })
            .collect()
    }

    pub fn result_url(&self, style: &str) -> Option<&str> {
        successes(self.outcomes()).find(|(label, _)| *label == style).map(|(_, url)| url)
    }

    pub fn reset(&mut self) {
        let id = self.id;
        let epoch = self.epoch + 1;
        *self = Self::new(id);
        self.epoch = epoch;
    }

    pub fn view(&self) -> MakeoverView {
        MakeoverView {
            id: self.id,
            phase: self.phase(),
            preview_url: self.preview_url.clone(),
            category: self.category,
            selected_styles: self.selected_styles().to_vec(),
            can_generate: self.can_generate(),
            results: self.results(),
            error: self.error.clone(),
            updated_at: self.updated_at,
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
