//! Command interpreter
//!
//! Maps a finished utterance to a [`VoiceCommand`] using an ordered rule
//! table. The first rule whose pattern matches wins; nothing matching yields
//! [`VoiceCommand::Unknown`]. Interpretation is stateless.

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, LazyLock};

use super::numbers::parse_whole_number;
use crate::cooling::FoodCategory;
use crate::directory::{FoodPreset, PresetCatalog};

/// Minimum similarity for a spoken item to match a preset
const PRESET_MATCH_THRESHOLD: f64 = 0.6;

/// Highest fridge number accepted by voice
const MAX_FRIDGE_INDEX: u32 = 10;

/// Structured command produced from an utterance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VoiceCommand {
    Cancel,
    StartCooling {
        /// Preset name when matched, otherwise the spoken name
        item: Option<String>,
        category: FoodCategory,
    },
    StopCooling {
        item_ref: Option<String>,
    },
    Discard {
        item_ref: Option<String>,
    },
    LogFridgeTemp {
        fridge: Option<u32>,
    },
    Unknown {
        text: String,
    },
}

impl VoiceCommand {
    pub fn name(&self) -> &'static str {
        match self {
            VoiceCommand::Cancel => "cancel",
            VoiceCommand::StartCooling { .. } => "start_cooling",
            VoiceCommand::StopCooling { .. } => "stop_cooling",
            VoiceCommand::Discard { .. } => "discard",
            VoiceCommand::LogFridgeTemp { .. } => "log_fridge_temp",
            VoiceCommand::Unknown { .. } => "unknown",
        }
    }
}

/// Inputs available to a rule when building its command
struct RuleContext<'a> {
    text: &'a str,
    presets: &'a [FoodPreset],
}

/// One entry of the grammar
pub struct GrammarRule {
    name: &'static str,
    pattern: Regex,
    build: fn(&Captures, &RuleContext) -> VoiceCommand,
}

impl GrammarRule {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }
}

static RULES: LazyLock<Vec<GrammarRule>> = LazyLock::new(|| {
    vec![
        GrammarRule {
            name: "cancel",
            pattern: Regex::new(
                r"^(?:(?:oh|okay|ok|please)\s+)?(?:cancel|stop|exit|quit|abort|never\s*mind|forget\s+it)(?:\s+(?:it|that|this|please|now|thanks|thank\s+you))*$",
            )
            .unwrap(),
            build: |_, _| VoiceCommand::Cancel,
        },
        GrammarRule {
            name: "start_cooling",
            pattern: Regex::new(
                r"\b(?:start|begin|new)\s+(?:a\s+)?(?:cooling|cool\s*down)(?:\s+(?:session|log|timer))?\b(?P<item>.*)$",
            )
            .unwrap(),
            build: build_start,
        },
        GrammarRule {
            name: "stop_cooling",
            pattern: Regex::new(
                r"\b(?:stop|end|finish|close)(?:\s+(?:the\s+)?cooling(?:\s+(?:session|log|timer))?)?\b(?P<item>.*)$",
            )
            .unwrap(),
            build: |caps, _| VoiceCommand::StopCooling {
                item_ref: item_reference(caps),
            },
        },
        GrammarRule {
            name: "discard",
            pattern: Regex::new(r"\b(?:discard|bin|throw\s+(?:it\s+)?(?:out|away)|dump)\b(?P<item>.*)$")
                .unwrap(),
            build: |caps, _| VoiceCommand::Discard {
                item_ref: item_reference(caps),
            },
        },
        GrammarRule {
            name: "log_fridge_temp",
            pattern: Regex::new(
                r"\b(?:log|record|check|take)\b.*\bfridges?\b|\bfridges?\b.*\btemp(?:erature)?s?\b",
            )
            .unwrap(),
            build: |_, ctx| VoiceCommand::LogFridgeTemp {
                fridge: parse_whole_number(ctx.text)
                    .filter(|n| (1..=MAX_FRIDGE_INDEX).contains(n)),
            },
        },
    ]
});

/// The grammar, in match order
pub fn rules() -> &'static [GrammarRule] {
    &RULES
}

/// Lowercase, collapse whitespace, drop punctuation other than apostrophes
/// and decimal points inside numbers
fn normalise(text: &str) -> String {
    let cleaned: String = text
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '\'' || c == '.' || c == '-' {
                c.to_ascii_lowercase()
            } else {
                ' '
            }
        })
        .collect();
    cleaned
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| c == '.' || c == '-'))
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Filler words allowed between the verb and the item
const LEADING_FILLERS: &[&str] = &["for", "of", "on", "the", "a", "an", "some", "my", "please"];

fn item_reference(caps: &Captures) -> Option<String> {
    let raw = caps.name("item")?.as_str();
    let words: Vec<&str> = raw
        .split_whitespace()
        .skip_while(|w| LEADING_FILLERS.contains(w))
        .filter(|w| *w != "please")
        .collect();
    if words.is_empty() {
        None
    } else {
        Some(words.join(" "))
    }
}

fn build_start(caps: &Captures, ctx: &RuleContext) -> VoiceCommand {
    let Some(spoken) = item_reference(caps) else {
        return VoiceCommand::StartCooling {
            item: None,
            category: FoodCategory::Other,
        };
    };

    match match_preset(&spoken, ctx.presets) {
        Some(preset) => VoiceCommand::StartCooling {
            item: Some(preset.name.clone()),
            category: preset.category,
        },
        None => VoiceCommand::StartCooling {
            item: Some(title_case(&spoken)),
            category: FoodCategory::Other,
        },
    }
}

fn title_case(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

// =============================================================================
// Fuzzy preset matching
// =============================================================================

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            current[j + 1] = (previous[j] + cost)
                .min(previous[j + 1] + 1)
                .min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

/// Similarity in `0.0..=1.0` between a spoken item and a preset name
fn similarity(spoken: &str, preset: &str) -> f64 {
    if spoken == preset {
        return 1.0;
    }

    let max_len = spoken.chars().count().max(preset.chars().count());
    let edit = if max_len == 0 {
        0.0
    } else {
        1.0 - levenshtein(spoken, preset) as f64 / max_len as f64
    };

    let spoken_tokens: Vec<&str> = spoken.split_whitespace().collect();
    let preset_tokens: Vec<&str> = preset.split_whitespace().collect();
    let shared = spoken_tokens
        .iter()
        .filter(|t| preset_tokens.contains(t))
        .count();
    let overlap = if preset_tokens.is_empty() {
        0.0
    } else {
        shared as f64 / spoken_tokens.len().max(preset_tokens.len()) as f64
    };

    edit.max(overlap)
}

/// Best preset for a spoken item name, if any is close enough
pub fn match_preset<'a>(spoken: &str, presets: &'a [FoodPreset]) -> Option<&'a FoodPreset> {
    let spoken = normalise(spoken);
    if spoken.is_empty() {
        return None;
    }

    presets
        .iter()
        .map(|preset| (preset, similarity(&spoken, &normalise(&preset.name))))
        .filter(|(_, score)| *score >= PRESET_MATCH_THRESHOLD)
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(preset, _)| preset)
}

// =============================================================================
// Interpreter
// =============================================================================

pub struct CommandInterpreter {
    presets: Arc<dyn PresetCatalog>,
}

impl CommandInterpreter {
    pub fn new(presets: Arc<dyn PresetCatalog>) -> Self {
        Self { presets }
    }

    /// Interprets a finished utterance
    pub fn interpret(&self, text: &str) -> VoiceCommand {
        let normalised = normalise(text);
        let presets = self.presets.presets();
        let ctx = RuleContext {
            text: &normalised,
            presets: &presets,
        };

        for rule in rules() {
            if let Some(caps) = rule.pattern.captures(&normalised) {
                let command = (rule.build)(&caps, &ctx);
                tracing::debug!("Interpreted {:?} as {} ({})", text, command.name(), rule.name);
                return command;
            }
        }

        tracing::debug!("No command matched {:?}", text);
        VoiceCommand::Unknown {
            text: text.trim().to_string(),
        }
    }
}
