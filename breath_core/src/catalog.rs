//! Default catalog of breathing techniques.
//!
//! This module provides the built-in techniques and the lookup helpers the
//! engine and the CLI use to resolve phases, instructions and display names.

use crate::types::*;
use once_cell::sync::Lazy;
use std::collections::BTreeMap;

/// Technique returned for unknown ids
pub const DEFAULT_TECHNIQUE: &str = "box";

/// Cached default catalog - built once and reused across all operations
static DEFAULT_CATALOG: Lazy<Catalog> = Lazy::new(build_default_catalog);

/// The complete, ordered set of techniques
#[derive(Clone, Debug)]
pub struct Catalog {
    techniques: Vec<Technique>,
}

/// Get a reference to the cached default catalog
pub fn get_default_catalog() -> &'static Catalog {
    &DEFAULT_CATALOG
}

/// Look up a technique in the default catalog, falling back to box breathing
pub fn lookup(id: &str) -> &'static Technique {
    get_default_catalog().lookup(id)
}

/// All techniques of the default catalog, in presentation order
pub fn list_all() -> &'static [Technique] {
    get_default_catalog().list_all()
}

/// Phase that follows `phase` in the technique's cycle
///
/// Unknown phases restart the cycle.
pub fn next_phase<'a>(technique: &'a Technique, phase: &str) -> &'a str {
    match technique.phase_index(phase) {
        Some(idx) => &technique.phases[(idx + 1) % technique.phases.len()],
        None => technique.first_phase(),
    }
}

/// Human-readable name of a phase
pub fn phase_display_name(phase: &str) -> String {
    let known = match phase {
        "inhale" => Some("Inhale"),
        "exhale" => Some("Exhale"),
        "hold" | "hold1" | "hold2" => Some("Hold"),
        "left-inhale" => Some("Left Inhale"),
        "right-inhale" => Some("Right Inhale"),
        "left-exhale" => Some("Left Exhale"),
        "right-exhale" => Some("Right Exhale"),
        "power-breath" => Some("Power Breath"),
        "retention" => Some("Retain"),
        "recovery" => Some("Recovery"),
        "rapid-breath" => Some("Rapid Breath"),
        _ => None,
    };

    match known {
        Some(name) => name.to_string(),
        None => {
            let mut chars = phase.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        }
    }
}

/// Instruction text for a phase, with a generic fallback
pub fn phase_instruction(technique: &Technique, phase: &str) -> String {
    technique
        .instructions
        .get(phase)
        .cloned()
        .unwrap_or_else(|| format!("{} phase", phase_display_name(phase)))
}

impl Catalog {
    /// Build a catalog from an explicit technique list
    pub fn new(techniques: Vec<Technique>) -> Self {
        Self { techniques }
    }

    /// Find a technique by id without any fallback
    pub fn get(&self, id: &str) -> Option<&Technique> {
        self.techniques.iter().find(|t| t.id == id)
    }

    /// Find a technique by id, falling back to the default technique
    ///
    /// Never fails for the built-in catalog. A custom catalog without the
    /// default technique falls back to its first entry.
    pub fn lookup(&self, id: &str) -> &Technique {
        if let Some(technique) = self.get(id) {
            return technique;
        }
        tracing::debug!("Unknown technique '{}', using '{}'", id, DEFAULT_TECHNIQUE);
        self.get(DEFAULT_TECHNIQUE)
            .or_else(|| self.techniques.first())
            .unwrap_or_else(|| &DEFAULT_CATALOG.techniques[0])
    }

    /// Every technique in presentation order
    pub fn list_all(&self) -> &[Technique] {
        &self.techniques
    }

    pub fn len(&self) -> usize {
        self.techniques.len()
    }

    pub fn is_empty(&self) -> bool {
        self.techniques.is_empty()
    }

    /// Validate the catalog for consistency and completeness
    ///
    /// Returns a list of validation errors, or empty Vec if valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.get(DEFAULT_TECHNIQUE).is_none() {
            errors.push(format!(
                "Catalog is missing the default technique '{}'",
                DEFAULT_TECHNIQUE
            ));
        }

        for (idx, technique) in self.techniques.iter().enumerate() {
            let id = &technique.id;
            if id.is_empty() {
                errors.push("Technique has empty ID".to_string());
            }
            if self.techniques[..idx].iter().any(|t| &t.id == id) {
                errors.push(format!("Duplicate technique ID '{}'", id));
            }
            if technique.name.is_empty() {
                errors.push(format!("Technique '{}' has empty name", id));
            }
            if technique.phases.is_empty() {
                errors.push(format!("Technique '{}' has no phases", id));
            }
            if technique.special != (technique.protocol != PhaseProtocol::Timed) {
                errors.push(format!(
                    "Technique '{}': special flag disagrees with protocol {:?}",
                    id, technique.protocol
                ));
            }

            for phase in &technique.phases {
                let (Some(default), Some(min), Some(max)) = (
                    technique.default_timing.get(phase),
                    technique.min_timing.get(phase),
                    technique.max_timing.get(phase),
                ) else {
                    errors.push(format!(
                        "Technique '{}': phase '{}' is missing timing bounds",
                        id, phase
                    ));
                    continue;
                };

                if *min <= 0.0 {
                    errors.push(format!(
                        "Technique '{}': phase '{}' min {} is not positive",
                        id, phase, min
                    ));
                }
                if default < min {
                    errors.push(format!(
                        "Technique '{}': phase '{}' default {} < min {}",
                        id, phase, default, min
                    ));
                }
                if default > max {
                    errors.push(format!(
                        "Technique '{}': phase '{}' default {} > max {}",
                        id, phase, default, max
                    ));
                }
                if !technique.instructions.contains_key(phase) {
                    errors.push(format!(
                        "Technique '{}': phase '{}' has no instruction",
                        id, phase
                    ));
                }
            }
        }

        errors
    }
}

/// Per-phase data used to assemble a technique: name, default, min, max, instruction
type PhaseSpec = (&'static str, f64, f64, f64, &'static str);

fn technique(
    id: &str,
    name: &str,
    description: &str,
    benefits: &str,
    protocol: PhaseProtocol,
    phases: &[PhaseSpec],
) -> Technique {
    let mut default_timing = TimingMap::new();
    let mut min_timing = TimingMap::new();
    let mut max_timing = TimingMap::new();
    let mut instructions = BTreeMap::new();

    for (phase, default, min, max, instruction) in phases {
        default_timing.insert(phase.to_string(), *default);
        min_timing.insert(phase.to_string(), *min);
        max_timing.insert(phase.to_string(), *max);
        instructions.insert(phase.to_string(), instruction.to_string());
    }

    Technique {
        id: id.into(),
        name: name.into(),
        description: description.into(),
        benefits: benefits.into(),
        phases: phases.iter().map(|p| p.0.to_string()).collect(),
        default_timing,
        min_timing,
        max_timing,
        instructions,
        special: protocol != PhaseProtocol::Timed,
        protocol,
    }
}

/// Builds the default catalog with the built-in techniques
pub fn build_default_catalog() -> Catalog {
    let techniques = vec![
        technique(
            "box",
            "Box Breathing",
            "4-4-4-4 pattern. Equal inhale, hold, exhale, hold.",
            "Reduces stress, improves focus, balances nervous system",
            PhaseProtocol::Timed,
            &[
                ("inhale", 4.0, 2.0, 8.0, "Breathe in slowly through your nose"),
                ("hold1", 4.0, 1.0, 8.0, "Hold your breath gently"),
                ("exhale", 4.0, 2.0, 8.0, "Exhale slowly through your mouth"),
                ("hold2", 4.0, 1.0, 8.0, "Hold empty lungs gently"),
            ],
        ),
        technique(
            "478",
            "4-7-8 Breathing",
            "Inhale 4, hold 7, exhale 8. Natural relaxant for sleep.",
            "Promotes sleep, reduces anxiety, calms nervous system",
            PhaseProtocol::Timed,
            &[
                ("inhale", 4.0, 3.0, 6.0, "Inhale quietly through your nose"),
                ("hold1", 7.0, 5.0, 10.0, "Hold your breath completely"),
                (
                    "exhale",
                    8.0,
                    6.0,
                    12.0,
                    "Exhale completely through your mouth with a whoosh sound",
                ),
            ],
        ),
        technique(
            "triangle",
            "Triangle Breathing",
            "Equal inhale, hold, exhale in triangular pattern.",
            "Balances nervous system, improves concentration",
            PhaseProtocol::Timed,
            &[
                ("inhale", 4.0, 3.0, 8.0, "Breathe in steadily through your nose"),
                ("hold1", 4.0, 3.0, 8.0, "Hold with gentle awareness"),
                ("exhale", 4.0, 3.0, 8.0, "Release breath slowly and completely"),
            ],
        ),
        technique(
            "wim-hof",
            "Wim Hof Method",
            "30 power breaths followed by retention and recovery.",
            "Increases energy, cold resistance, immune function",
            PhaseProtocol::WimHof,
            &[
                (
                    "power-breath",
                    30.0,
                    20.0,
                    40.0,
                    "Take 30 deep, powerful breaths - in through nose, out through mouth",
                ),
                ("retention", 60.0, 30.0, 120.0, "Hold your breath after the last exhale"),
                ("recovery", 15.0, 10.0, 30.0, "Take a deep breath and hold for 15 seconds"),
            ],
        ),
        technique(
            "coherent",
            "Coherent Breathing",
            "5 seconds inhale, 5 seconds exhale for heart coherence.",
            "Improves heart rate variability, reduces stress",
            PhaseProtocol::Timed,
            &[
                ("inhale", 5.0, 4.0, 7.0, "Breathe in smoothly for 5 seconds"),
                ("exhale", 5.0, 4.0, 7.0, "Breathe out smoothly for 5 seconds"),
            ],
        ),
        technique(
            "bellows",
            "Bellows Breathing",
            "Rapid, energizing breath work to increase alertness.",
            "Increases alertness, energy, mental clarity",
            PhaseProtocol::Bellows,
            &[(
                "rapid-breath",
                60.0,
                30.0,
                120.0,
                "Breathe rapidly in and out through your nose - like a bellows",
            )],
        ),
        technique(
            "alternate",
            "Alternate Nostril Breathing",
            "Balanced breathing through alternating nostrils.",
            "Mental clarity, balance, focus enhancement",
            PhaseProtocol::AlternateNostril,
            &[
                ("left-inhale", 4.0, 3.0, 8.0, "Block right nostril, inhale through left"),
                ("hold1", 2.0, 1.0, 4.0, "Block both nostrils gently"),
                ("right-exhale", 4.0, 3.0, 8.0, "Block left nostril, exhale through right"),
                ("right-inhale", 4.0, 3.0, 8.0, "Keep left blocked, inhale through right"),
                ("hold2", 2.0, 1.0, 4.0, "Block both nostrils gently"),
                ("left-exhale", 4.0, 3.0, 8.0, "Block right nostril, exhale through left"),
            ],
        ),
        technique(
            "extended",
            "Extended Exhale",
            "Longer exhale than inhale for deep relaxation.",
            "Activates parasympathetic system, promotes relaxation",
            PhaseProtocol::Timed,
            &[
                ("inhale", 4.0, 3.0, 6.0, "Inhale naturally through your nose"),
                (
                    "exhale",
                    8.0,
                    6.0,
                    12.0,
                    "Exhale slowly and completely, twice as long as inhale",
                ),
            ],
        ),
    ];

    Catalog::new(techniques)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_loads() {
        let catalog = build_default_catalog();
        assert_eq!(catalog.len(), 8);
        assert_eq!(catalog.list_all()[0].id, "box");
    }

    #[test]
    fn test_default_catalog_validates() {
        let catalog = build_default_catalog();
        let errors = catalog.validate();
        assert!(
            errors.is_empty(),
            "Default catalog has validation errors: {:?}",
            errors
        );
    }

    #[test]
    fn test_unknown_id_falls_back_to_box() {
        assert_eq!(lookup("no-such-technique").id, "box");
        assert_eq!(lookup("").id, "box");
        assert_eq!(lookup("478").id, "478");
    }

    #[test]
    fn test_every_phase_has_timing() {
        for technique in list_all() {
            for phase in &technique.phases {
                assert!(
                    technique.default_timing.contains_key(phase),
                    "{} phase {} has no default timing",
                    technique.id,
                    phase
                );
            }
        }
    }

    #[test]
    fn test_special_techniques() {
        assert!(lookup("wim-hof").special);
        assert!(lookup("bellows").special);
        assert!(lookup("alternate").special);
        assert!(!lookup("box").special);
        assert!(!lookup("unknown").special);
    }

    #[test]
    fn test_next_phase_wraps_and_recovers() {
        let box_breathing = lookup("box");
        assert_eq!(next_phase(box_breathing, "inhale"), "hold1");
        assert_eq!(next_phase(box_breathing, "hold2"), "inhale");
        assert_eq!(next_phase(box_breathing, "retention"), "inhale");
    }

    #[test]
    fn test_phase_display_names() {
        assert_eq!(phase_display_name("hold2"), "Hold");
        assert_eq!(phase_display_name("power-breath"), "Power Breath");
        assert_eq!(phase_display_name("sigh"), "Sigh");
    }

    #[test]
    fn test_phase_instruction_fallback() {
        let coherent = lookup("coherent");
        assert_eq!(
            phase_instruction(coherent, "inhale"),
            "Breathe in smoothly for 5 seconds"
        );
        assert_eq!(phase_instruction(coherent, "retention"), "Retain phase");
    }

    #[test]
    fn test_validate_reports_bad_bounds() {
        let mut broken = lookup("box").clone();
        broken.default_timing.insert("inhale".into(), 20.0);
        broken.instructions.remove("exhale");
        let catalog = Catalog::new(vec![broken]);

        let errors = catalog.validate();
        assert!(errors.iter().any(|e| e.contains("default 20 > max 8")));
        assert!(errors.iter().any(|e| e.contains("no instruction")));
    }

    #[test]
    fn test_custom_catalog_without_default_falls_back_to_first() {
        let catalog = Catalog::new(vec![lookup("coherent").clone()]);
        assert_eq!(catalog.lookup("missing").id, "coherent");
        assert!(!catalog.validate().is_empty());
    }
}
