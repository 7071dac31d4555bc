use serde::{Deserialize, Serialize};

pub const QUALITY_SUFFIX: &str =
    "professional photography, high quality, sharp focus, detailed, realistic, accurate colors";

/// Shared by every style and product. Style-conditioned negatives were
/// considered and deliberately left out.
pub const NEGATIVE_PROMPT: &str = "blurry, low quality, distorted, ugly, bad composition, \
poor lighting, unprofessional, pixelated, cartoon, anime, drawing, watermark, wrong colors, \
inaccurate appearance, multiple items, duplicate, deformed, unrealistic";

pub const CONSERVATIVE_NEGATIVE_PROMPT: &str = "blurry, low quality";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Style {
    Promotional,
    Banner,
    Catalog,
    Instagram,
    Editorial,
    Ecommerce,
    Premium,
    Natural,
    Professional,
    Artistic,
    Minimalist,
    Playful,
}

impl Style {
    pub const ALL: [Style; 12] = [
        Style::Promotional,
        Style::Banner,
        Style::Catalog,
        Style::Instagram,
        Style::Editorial,
        Style::Ecommerce,
        Style::Premium,
        Style::Natural,
        Style::Professional,
        Style::Artistic,
        Style::Minimalist,
        Style::Playful,
    ];

    /// Style used when a requested name is not in the table.
    pub const FALLBACK: Style = Style::Promotional;

    pub fn name(&self) -> &'static str {
        match self {
            Style::Promotional => "promotional",
            Style::Banner => "banner",
            Style::Catalog => "catalog",
            Style::Instagram => "instagram",
            Style::Editorial => "editorial",
            Style::Ecommerce => "ecommerce",
            Style::Premium => "premium",
            Style::Natural => "natural",
            Style::Professional => "professional",
            Style::Artistic => "artistic",
            Style::Minimalist => "minimalist",
            Style::Playful => "playful",
        }
    }

    /// Case-insensitive lookup. The Spanish names sent by the web service are
    /// accepted as aliases.
    pub fn from_name(raw: &str) -> Option<Style> {
        let lowered = raw.trim().to_lowercase();
        let style = match lowered.as_str() {
            "promotional" | "promocional" => Style::Promotional,
            "banner" => Style::Banner,
            "catalog" | "catalogo" | "catálogo" => Style::Catalog,
            "instagram" => Style::Instagram,
            "editorial" => Style::Editorial,
            "ecommerce" | "e-commerce" => Style::Ecommerce,
            "premium" => Style::Premium,
            "natural" => Style::Natural,
            "professional" | "profesional" => Style::Professional,
            "artistic" | "artistico" | "artístico" => Style::Artistic,
            "minimalist" | "minimalista" => Style::Minimalist,
            "playful" | "divertido" => Style::Playful,
            _ => return None,
        };
        Some(style)
    }

    pub fn fragment(&self) -> &'static str {
        match self {
            Style::Promotional => {
                "advertising photo, commercial product photography, studio lighting"
            }
            Style::Banner => "social media banner, web advertisement, marketing visual",
            Style::Catalog => {
                "catalog photography, retail product photo, clean background, commercial style"
            }
            Style::Instagram => "Instagram post, social media content, trendy photography",
            Style::Editorial => "magazine photography, editorial style, artistic composition",
            Style::Ecommerce => {
                "e-commerce photo, white background, product listing, clean presentation"
            }
            Style::Premium => "luxury product photography, premium brand, elegant presentation",
            Style::Natural => "natural product photography, organic style, soft lighting",
            Style::Professional => {
                "professional product photography, studio lighting, commercial quality"
            }
            Style::Artistic => {
                "artistic product photography, creative composition, dramatic lighting"
            }
            Style::Minimalist => {
                "minimalist product photography, clean composition, simple background"
            }
            Style::Playful => "playful product photography, vibrant colors, fun presentation",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColorFamily {
    Light,
    Dark,
    Milk,
}

impl ColorFamily {
    /// Checked in this order; the first family with a matching keyword wins.
    const PRIORITY: [ColorFamily; 3] = [ColorFamily::Light, ColorFamily::Dark, ColorFamily::Milk];

    fn keywords(&self) -> &'static [&'static str] {
        match self {
            ColorFamily::Light => &["white", "blanco"],
            ColorFamily::Dark => &["dark", "oscuro", "negro"],
            ColorFamily::Milk => &["milk", "leche"],
        }
    }

    fn qualifiers(&self) -> &'static str {
        match self {
            ColorFamily::Light => "white color, creamy white texture, pale appearance",
            ColorFamily::Dark => "dark brown color, rich chocolate appearance, deep cocoa color",
            ColorFamily::Milk => "milk chocolate color, light brown appearance, creamy texture",
        }
    }

    fn detect(product_name: &str) -> Option<ColorFamily> {
        let lowered = product_name.to_lowercase();
        Self::PRIORITY.into_iter().find(|family| {
            family
                .keywords()
                .iter()
                .any(|keyword| lowered.contains(keyword))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prompts {
    pub positive: String,
    pub negative: String,
}

/// Builds the prompt pair for a product. Total over every input: unknown
/// styles use [`Style::FALLBACK`].
pub fn synthesize(name: &str, description: &str, style: &str) -> Prompts {
    let style = Style::from_name(style).unwrap_or(Style::FALLBACK);
    let mut parts: Vec<&str> = Vec::new();
    for text in [description.trim(), name.trim()] {
        if !text.is_empty() {
            parts.push(text);
        }
    }
    if let Some(family) = ColorFamily::detect(name) {
        parts.push(family.qualifiers());
    }
    parts.push(style.fragment());
    parts.push(QUALITY_SUFFIX);

    Prompts {
        positive: parts.join(", "),
        negative: NEGATIVE_PROMPT.to_string(),
    }
}

/// Minimal prompt pair used to re-run an attempt whose output was invalid.
pub fn conservative(name: &str, description: &str) -> Prompts {
    Prompts {
        positive: format!("{}, {}, photography", name.trim(), description.trim()),
        negative: CONSERVATIVE_NEGATIVE_PROMPT.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::{conservative, synthesize, Style, NEGATIVE_PROMPT, QUALITY_SUFFIX};

    #[test]
    fn positive_prompt_follows_fixed_order() {
        let prompts = synthesize("Truffle Bonbons", "cocoa dusted truffles", "Premium");
        assert_eq!(
            prompts.positive,
            format!(
                "cocoa dusted truffles, Truffle Bonbons, {}, {}",
                Style::Premium.fragment(),
                QUALITY_SUFFIX
            )
        );
        assert_eq!(prompts.negative, NEGATIVE_PROMPT);
    }

    #[test]
    fn unknown_style_falls_back_without_failing() {
        let prompts = synthesize("Gummies", "forest fruit gummies", "vaporwave");
        assert!(prompts.positive.contains(Style::Promotional.fragment()));
        assert!(!prompts.negative.is_empty());

        let empty = synthesize("", "", "");
        assert!(!empty.positive.is_empty());
        assert!(empty.positive.starts_with(Style::Promotional.fragment()));
    }

    #[test]
    fn color_family_priority_is_deterministic() {
        let both = synthesize("White and Dark Swirl", "marbled bar", "natural");
        assert!(both.positive.contains("creamy white texture"));
        assert!(!both.positive.contains("deep cocoa color"));

        let dark_milk = synthesize("Dark Milk Blend", "45% cacao", "natural");
        assert!(dark_milk.positive.contains("deep cocoa color"));
        assert!(!dark_milk.positive.contains("milk chocolate color"));

        let milk = synthesize("Chocolate con LECHE", "bar", "natural");
        assert!(milk.positive.contains("milk chocolate color"));

        let plain = synthesize("Caramel Nuts", "walnuts", "natural");
        assert!(!plain.positive.contains("color,"));
    }

    #[test]
    fn negative_prompt_ignores_style_and_product() {
        let first = synthesize("A", "a", "banner");
        let second = synthesize("Dark B", "b", "playful");
        assert_eq!(first.negative, second.negative);
    }

    #[test]
    fn style_lookup_accepts_aliases_and_case() {
        assert_eq!(Style::from_name("PROFESIONAL"), Some(Style::Professional));
        assert_eq!(Style::from_name(" catalogo "), Some(Style::Catalog));
        assert_eq!(Style::from_name("divertido"), Some(Style::Playful));
        assert_eq!(Style::from_name("nope"), None);
        for style in Style::ALL {
            assert_eq!(Style::from_name(style.name()), Some(style));
        }
    }

    #[test]
    fn conservative_prompt_is_minimal() {
        let prompts = conservative("Gummies", "forest fruit gummies");
        assert_eq!(prompts.positive, "Gummies, forest fruit gummies, photography");
        assert_eq!(prompts.negative, "blurry, low quality");
    }
}
