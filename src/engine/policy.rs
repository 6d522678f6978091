use std::str::FromStr;

/// XP formula applied to a qualifying message. Pure and total: the same text
/// always yields the same value, never negative, never failing.
///
/// Two incompatible formulas exist across deployments, so both are kept as
/// named policies and the operator picks one via `XP_POLICY` rather than the
/// bot silently merging their semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScoringPolicy {
    /// Every complete block of 4 non-blank lines earns 20 XP; the remainder
    /// is discarded. The dominant variant, hence the default.
    #[default]
    LineBlock,

    /// Lines are weighted by word density, with URLs and sub-2-character
    /// lines excluded, then scaled and clamped into [1, 50].
    WeightedLineDensity,
}

const LINES_PER_BLOCK: i64 = 4;
const XP_PER_BLOCK: i64 = 20;

const DENSITY_SCALE: f64 = 2.5;
const DENSITY_MIN_XP: i64 = 1;
const DENSITY_MAX_XP: i64 = 50;

impl ScoringPolicy {
    pub fn compute(&self, text: &str) -> i64 {
        match self {
            ScoringPolicy::LineBlock => line_block(text),
            ScoringPolicy::WeightedLineDensity => weighted_line_density(text),
        }
    }
}

fn line_block(text: &str) -> i64 {
    let non_blank = text.lines().filter(|line| !line.trim().is_empty()).count() as i64;
    non_blank / LINES_PER_BLOCK * XP_PER_BLOCK
}

fn weighted_line_density(text: &str) -> i64 {
    let mut half_line_units = 0.0_f64;

    for line in text.lines() {
        let line = line.trim();
        if line.chars().count() < 2 {
            continue;
        }
        if line.starts_with("http://") || line.starts_with("https://") {
            continue;
        }

        half_line_units += match line.split_whitespace().count() {
            0..=3 => 0.5,
            4..=5 => 1.0,
            _ => 2.0,
        };
    }

    let raw = half_line_units * DENSITY_SCALE;
    if raw > 0.0 {
        (raw.round() as i64).clamp(DENSITY_MIN_XP, DENSITY_MAX_XP)
    } else {
        0
    }
}

impl FromStr for ScoringPolicy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "line-block" => Ok(ScoringPolicy::LineBlock),
            "weighted-density" => Ok(ScoringPolicy::WeightedLineDensity),
            _ => Err(()),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_line_block_vectors() {
        let policy = ScoringPolicy::LineBlock;

        assert_eq!(policy.compute(""), 0);
        assert_eq!(policy.compute("a"), 0);
        assert_eq!(policy.compute("a\nb\nc\nd"), 20);
        // remainder lines past a complete block are discarded
        assert_eq!(policy.compute("a\nb\nc\nd\ne\nf\ng"), 20);
        assert_eq!(policy.compute("a\nb\nc\nd\ne\nf\ng\nh"), 40);
    }

    #[test]
    fn test_line_block_ignores_blank_lines() {
        let policy = ScoringPolicy::LineBlock;

        assert_eq!(policy.compute("a\n\n\nb\n  \nc"), 0);
        assert_eq!(policy.compute("a\n\nb\n\nc\n\nd"), 20);
    }

    #[test]
    fn test_weighted_density_short_lines() {
        let policy = ScoringPolicy::WeightedLineDensity;

        // four 1-word lines: 4 x 0.5 x 2.5 = 5
        assert_eq!(policy.compute("one\ntwo\nthree\nfour"), 5);
        assert_eq!(policy.compute(""), 0);
    }

    #[test]
    fn test_weighted_density_exclusions() {
        let policy = ScoringPolicy::WeightedLineDensity;

        // URLs and single-character lines never count
        assert_eq!(policy.compute("https://example.com/some/long/path"), 0);
        assert_eq!(policy.compute("a\nb\nc\nd"), 0);
    }

    #[test]
    fn test_weighted_density_clamping() {
        let policy = ScoringPolicy::WeightedLineDensity;

        // one short line: 0.5 x 2.5 = 1.25, positive so floor-clamped to 1
        assert_eq!(policy.compute("hi there"), 1);

        // 30 dense lines: 30 x 2 x 2.5 = 150, clamped to 50
        let dense_line = "quite a long line with far more than five words in it\n";
        let wall = dense_line.repeat(30);
        assert_eq!(policy.compute(&wall), 50);
    }

    #[test]
    fn test_never_negative_and_deterministic() {
        for policy in [ScoringPolicy::LineBlock, ScoringPolicy::WeightedLineDensity] {
            for text in ["", "\n\n\n", "a", "some words here\nand here", "🦀\n🦀"] {
                let first = policy.compute(text);
                assert!(first >= 0);
                assert_eq!(first, policy.compute(text));
            }
        }
    }

    #[test]
    fn test_parse_policy_names() {
        assert_eq!(
            "line-block".parse::<ScoringPolicy>(),
            Ok(ScoringPolicy::LineBlock)
        );
        assert_eq!(
            "weighted-density".parse::<ScoringPolicy>(),
            Ok(ScoringPolicy::WeightedLineDensity)
        );
        assert!("per-word".parse::<ScoringPolicy>().is_err());
    }
}
