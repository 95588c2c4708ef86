//! Pathology rule engine
//!
//! A pure function of the current heart rate, the rolling FHR history and the
//! retained contraction-peak count. Warm-up tags come first, then the
//! physiological rules in a fixed order.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::RuleThresholds;
use crate::history::{population_std, HistoryBuffer};
use crate::simulator::WarmupPhase;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Condition {
    FetalBradycardia,
    FetalTachycardia,
    ReducedVariability,
    UterineTachysystole,
}

impl Condition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Condition::FetalBradycardia => "fetal bradycardia",
            Condition::FetalTachycardia => "fetal tachycardia",
            Condition::ReducedVariability => "reduced variability",
            Condition::UterineTachysystole => "uterine tachysystole",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "fetal bradycardia" => Some(Condition::FetalBradycardia),
            "fetal tachycardia" => Some(Condition::FetalTachycardia),
            "reduced variability" => Some(Condition::ReducedVariability),
            "uterine tachysystole" => Some(Condition::UterineTachysystole),
            _ => None,
        }
    }
}

const FORCED_SUFFIX: &str = " (test)";

/// A named condition attached to a sample. `forced` marks warm-up tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct PathologyTag {
    pub condition: Condition,
    pub forced: bool,
}

impl PathologyTag {
    pub fn detected(condition: Condition) -> Self {
        Self {
            condition,
            forced: false,
        }
    }

    pub fn forced(condition: Condition) -> Self {
        Self {
            condition,
            forced: true,
        }
    }
}

impl fmt::Display for PathologyTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.condition.as_str())?;
        if self.forced {
            f.write_str(FORCED_SUFFIX)?;
        }
        Ok(())
    }
}

impl From<PathologyTag> for String {
    fn from(tag: PathologyTag) -> Self {
        tag.to_string()
    }
}

impl TryFrom<String> for PathologyTag {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let (name, forced) = match value.strip_suffix(FORCED_SUFFIX) {
            Some(name) => (name, true),
            None => (value.as_str(), false),
        };
        Condition::from_name(name)
            .map(|condition| PathologyTag { condition, forced })
            .ok_or_else(|| format!("unknown pathology tag: {}", value))
    }
}

/// Everything the rules look at for one sample
#[derive(Debug, Clone, Copy)]
pub struct RuleInput<'a> {
    pub fhr_bpm: u32,
    pub warmup: Option<WarmupPhase>,
    pub fhr_history: &'a HistoryBuffer<u32>,
    pub peak_count: usize,
}

/// Evaluate all rules. Output order: warm-up tag, bradycardia, tachycardia,
/// reduced variability, tachysystole.
pub fn evaluate(input: &RuleInput<'_>, thresholds: &RuleThresholds) -> Vec<PathologyTag> {
    let mut tags = Vec::new();

    if let Some(phase) = input.warmup {
        tags.push(PathologyTag::forced(phase.condition()));
    }
    if input.fhr_bpm < thresholds.bradycardia_bpm {
        tags.push(PathologyTag::detected(Condition::FetalBradycardia));
    }
    if input.fhr_bpm > thresholds.tachycardia_bpm {
        tags.push(PathologyTag::detected(Condition::FetalTachycardia));
    }

    let points = input.fhr_history.len();
    if points >= thresholds.min_variability_points {
        let std = population_std(input.fhr_history.values().map(|&v| v as f64));
        if std < thresholds.min_variability_std {
            tags.push(PathologyTag::detected(Condition::ReducedVariability));
        }
    }

    if input.peak_count > thresholds.max_peaks_in_window {
        tags.push(PathologyTag::detected(Condition::UterineTachysystole));
    }

    tags
}

/// First tag in emission order, or an empty string
pub fn primary_description(tags: &[PathologyTag]) -> String {
    tags.first().map(|t| t.to_string()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn history_of(values: &[u32]) -> HistoryBuffer<u32> {
        let mut buf = HistoryBuffer::new(60_000);
        for (i, v) in values.iter().enumerate() {
            buf.push(i as u64 * 100, *v);
        }
        buf
    }

    fn input<'a>(fhr: u32, history: &'a HistoryBuffer<u32>, peaks: usize) -> RuleInput<'a> {
        RuleInput {
            fhr_bpm: fhr,
            warmup: None,
            fhr_history: history,
            peak_count: peaks,
        }
    }

    #[test]
    fn test_normal_sample_has_no_tags() {
        let history = history_of(&[130, 140, 150, 135, 145]);
        let tags = evaluate(&input(140, &history, 0), &RuleThresholds::default());
        assert!(tags.is_empty());
        assert_eq!(primary_description(&tags), "");
    }

    #[test]
    fn test_bradycardia_and_tachycardia() {
        let history = history_of(&[]);
        let rules = RuleThresholds::default();

        let tags = evaluate(&input(105, &history, 0), &rules);
        assert_eq!(tags, vec![PathologyTag::detected(Condition::FetalBradycardia)]);

        let tags = evaluate(&input(165, &history, 0), &rules);
        assert_eq!(tags, vec![PathologyTag::detected(Condition::FetalTachycardia)]);

        // Boundaries are exclusive
        assert!(evaluate(&input(110, &history, 0), &rules).is_empty());
        assert!(evaluate(&input(160, &history, 0), &rules).is_empty());
    }

    #[test]
    fn test_reduced_variability_needs_enough_points() {
        let rules = RuleThresholds::default();

        let flat_short = history_of(&[140; 49]);
        assert!(evaluate(&input(140, &flat_short, 0), &rules).is_empty());

        let flat = history_of(&[140; 50]);
        let tags = evaluate(&input(140, &flat, 0), &rules);
        assert_eq!(tags, vec![PathologyTag::detected(Condition::ReducedVariability)]);
    }

    #[test]
    fn test_tachysystole_more_than_five_peaks() {
        let history = history_of(&[]);
        let rules = RuleThresholds::default();
        assert!(evaluate(&input(140, &history, 5), &rules).is_empty());
        let tags = evaluate(&input(140, &history, 6), &rules);
        assert_eq!(tags, vec![PathologyTag::detected(Condition::UterineTachysystole)]);
    }

    #[test]
    fn test_warmup_tag_comes_first() {
        let history = history_of(&[]);
        let mut inp = input(95, &history, 0);
        inp.warmup = Some(WarmupPhase::Bradycardia);
        let tags = evaluate(&inp, &RuleThresholds::default());
        assert_eq!(tags.len(), 2);
        assert_eq!(tags[0].to_string(), "fetal bradycardia (test)");
        assert_eq!(tags[1].to_string(), "fetal bradycardia");
        assert_eq!(primary_description(&tags), "fetal bradycardia (test)");
    }

    #[test]
    fn test_tag_order_with_multiple_conditions() {
        let flat = history_of(&[100; 60]);
        let tags = evaluate(&input(100, &flat, 8), &RuleThresholds::default());
        let names: Vec<String> = tags.iter().map(|t| t.to_string()).collect();
        assert_eq!(
            names,
            vec!["fetal bradycardia", "reduced variability", "uterine tachysystole"]
        );
    }

    #[test]
    fn test_tag_serde_as_string() {
        let tag = PathologyTag::forced(Condition::UterineTachysystole);
        let json = serde_json::to_string(&tag).unwrap();
        assert_eq!(json, "\"uterine tachysystole (test)\"");
        let back: PathologyTag = serde_json::from_str(&json).unwrap();
        assert_eq!(back, tag);
        assert!(serde_json::from_str::<PathologyTag>("\"hypoxia\"").is_err());
    }

    proptest! {
        #[test]
        fn prop_rules_are_pure(
            fhr in 50u32..=210,
            values in proptest::collection::vec(50u32..=210, 0..120),
            peaks in 0usize..12,
        ) {
            let history = history_of(&values);
            let rules = RuleThresholds::default();
            let a = evaluate(&input(fhr, &history, peaks), &rules);
            let b = evaluate(&input(fhr, &history, peaks), &rules);
            prop_assert_eq!(a, b);
        }
    }
}
