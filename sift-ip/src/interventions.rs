//! Named image transformations
//!
//! Closed catalogue of the transformations the pipeline can be asked to
//! generate. Names arrive as strings in job submissions; parsing them
//! into [`Intervention`] happens during request validation so an unknown
//! name fails fast instead of at dispatch time.
//!
//! Each intervention reduces to an instruction handed to the generation
//! capability together with the source image.

use crate::types::UserContext;
use std::fmt;
use std::str::FromStr;

/// Art style for stylization interventions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Style {
    Cubism,
    Impressionism,
    Ghibli,
    Pointillism,
}

impl Style {
    fn descriptor(self) -> &'static str {
        match self {
            Style::Cubism => "cubist painting with fragmented geometric forms",
            Style::Impressionism => "impressionist painting with soft, visible brushwork",
            Style::Ghibli => "hand-drawn animation style with gentle colors",
            Style::Pointillism => "pointillist painting built from small dots of color",
        }
    }
}

/// One named transformation the Candidate Generator can produce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intervention {
    /// Whole-image stylization, style chosen by the model (legacy name)
    Stylization,
    /// Whole-image stylization in a fixed style
    Stylize(Style),
    /// Stylize only regions matching the trigger (legacy name)
    SelectiveStylization,
    /// Stylize only regions matching the trigger, fixed style
    SelectiveStylize(Style),
    /// Replace the trigger object with a benign stand-in
    Replacement,
    /// Cover the trigger region with an opaque mask
    Occlusion,
    /// Blur the trigger region
    Blur,
    /// Shrink the trigger object's visual prominence
    Shrink,
    /// Remove the trigger object and fill the region
    Inpainting,
    /// Overlay a content warning treatment
    Warning,
}

/// Error for unrecognized transformation names
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown intervention: {0}")]
pub struct UnknownIntervention(pub String);

impl FromStr for Intervention {
    type Err = UnknownIntervention;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let intervention = match s {
            "stylization" => Intervention::Stylization,
            "stylize_cubism" => Intervention::Stylize(Style::Cubism),
            "stylize_impressionism" => Intervention::Stylize(Style::Impressionism),
            "stylize_ghibli" => Intervention::Stylize(Style::Ghibli),
            "stylize_pointillism" => Intervention::Stylize(Style::Pointillism),
            "selectivestylization" => Intervention::SelectiveStylization,
            "selective_stylize_cubism" => Intervention::SelectiveStylize(Style::Cubism),
            "selective_stylize_impressionism" => {
                Intervention::SelectiveStylize(Style::Impressionism)
            }
            "selective_stylize_ghibli" => Intervention::SelectiveStylize(Style::Ghibli),
            "selective_stylize_pointillism" => Intervention::SelectiveStylize(Style::Pointillism),
            "replacement" => Intervention::Replacement,
            "occlusion" => Intervention::Occlusion,
            "blur" => Intervention::Blur,
            "shrink" => Intervention::Shrink,
            "inpainting" => Intervention::Inpainting,
            "warning" => Intervention::Warning,
            other => return Err(UnknownIntervention(other.to_string())),
        };
        Ok(intervention)
    }
}

impl fmt::Display for Intervention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Intervention {
    /// Canonical wire name
    pub fn name(&self) -> &'static str {
        match self {
            Intervention::Stylization => "stylization",
            Intervention::Stylize(Style::Cubism) => "stylize_cubism",
            Intervention::Stylize(Style::Impressionism) => "stylize_impressionism",
            Intervention::Stylize(Style::Ghibli) => "stylize_ghibli",
            Intervention::Stylize(Style::Pointillism) => "stylize_pointillism",
            Intervention::SelectiveStylization => "selectivestylization",
            Intervention::SelectiveStylize(Style::Cubism) => "selective_stylize_cubism",
            Intervention::SelectiveStylize(Style::Impressionism) => {
                "selective_stylize_impressionism"
            }
            Intervention::SelectiveStylize(Style::Ghibli) => "selective_stylize_ghibli",
            Intervention::SelectiveStylize(Style::Pointillism) => "selective_stylize_pointillism",
            Intervention::Replacement => "replacement",
            Intervention::Occlusion => "occlusion",
            Intervention::Blur => "blur",
            Intervention::Shrink => "shrink",
            Intervention::Inpainting => "inpainting",
            Intervention::Warning => "warning",
        }
    }

    /// Whether this transformation targets detected regions
    ///
    /// Region-targeted interventions run the detection capability first
    /// and pass the resulting boxes along with the edit instruction.
    pub fn needs_detection(&self) -> bool {
        matches!(
            self,
            Intervention::Blur
                | Intervention::Occlusion
                | Intervention::Shrink
                | Intervention::Inpainting
        )
    }

    /// Build the generation instruction for this transformation
    ///
    /// The instruction names the user's trigger and sensitivity so the
    /// generation capability can scale the strength of the edit. Every
    /// instruction ends with the same output constraint: image only, no
    /// added text.
    pub fn instruction(&self, ctx: &UserContext) -> String {
        let trigger = if ctx.filter_text.is_empty() {
            "the distressing content".to_string()
        } else {
            format!("'{}'", ctx.filter_text)
        };

        let body = match self {
            Intervention::Stylization => format!(
                "Reinterpret the entire image in a softer artistic style that reduces \
                 the salience of {trigger} while preserving scene meaning and composition."
            ),
            Intervention::Stylize(style) => format!(
                "Redraw the entire image as a {}. Elements matching {trigger} should be \
                 simplified into benign shapes while remaining contextually present.",
                style.descriptor()
            ),
            Intervention::SelectiveStylization => format!(
                "Stylize only the regions of the image matching {trigger}; leave the rest \
                 of the image photographic and untouched."
            ),
            Intervention::SelectiveStylize(style) => format!(
                "Rerender only the regions matching {trigger} as a {}; leave the rest of \
                 the image untouched.",
                style.descriptor()
            ),
            Intervention::Replacement => format!(
                "Seamlessly replace objects matching {trigger} with a simple, benign \
                 stand-in object. Preserve background, lighting, and composition."
            ),
            Intervention::Occlusion => format!(
                "Cover every region matching {trigger} with a solid, unobtrusive mask \
                 that blends with the image palette."
            ),
            Intervention::Blur => format!(
                "Apply a strong gaussian blur to every region matching {trigger}, leaving \
                 the rest of the image sharp."
            ),
            Intervention::Shrink => format!(
                "Reduce the visual prominence of objects matching {trigger}, shrinking \
                 them within their context without breaking the scene's geometry."
            ),
            Intervention::Inpainting => format!(
                "Remove objects matching {trigger} entirely and fill the vacated regions \
                 with plausible background."
            ),
            Intervention::Warning => format!(
                "Dim and desaturate the image and overlay a subtle content-warning \
                 treatment over regions matching {trigger}."
            ),
        };

        let sensitivity = if ctx.sensitivity.is_empty() {
            String::new()
        } else {
            format!(
                " User sensitivity: {} (higher means a stronger intervention).",
                ctx.sensitivity
            )
        };

        format!(
            "{body}{sensitivity} Output only the transformed image, with no added text or commentary."
        )
    }
}

/// Parse a list of candidate names, rejecting the batch on the first
/// unknown name
pub fn parse_candidates(names: &[String]) -> Result<Vec<Intervention>, UnknownIntervention> {
    names.iter().map(|n| n.parse()).collect()
}
