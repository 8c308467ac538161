//! Decayed success/failure scoring for proxy ranking.
//!
//! Every observation bumps a tally and stamps a wall-clock timestamp; the
//! score applies exponential time decay to each tally independently, so a
//! proxy that worked well yesterday outranks one that worked well last
//! week. Failures weigh three times as much as successes, and proxies
//! with only a handful of observations are damped so one lucky result
//! cannot dominate the ranking.

use std::collections::HashMap;

use crate::storage::ProxyScoreRecord;

/// Decay constant: an observation loses ~63% of its weight per day.
pub(crate) const DECAY_MS: f64 = 86_400_000.0;

const SUCCESS_WEIGHT: f64 = 1.0;
const FAIL_WEIGHT: f64 = 3.0;

/// Below this many total observations the score is damped.
const MIN_SAMPLES: f64 = 4.0;
const LOW_CONFIDENCE_FACTOR: f64 = 0.25;

/// Scores are re-seeded on this cadence so a long-idle proxy cannot keep
/// a stale advantage (or disadvantage) forever.
pub(crate) const REBASE_INTERVAL_MS: i64 = 30 * 86_400_000;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProxyStat {
    pub success: f64,
    pub fail: f64,
    pub last_success_ms: i64,
    pub last_fail_ms: i64,
    pub score: f64,
}

impl ProxyStat {
    pub fn record(&mut self, ok: bool, now_ms: i64) {
        if ok {
            self.success += 1.0;
            self.last_success_ms = now_ms;
        } else {
            self.fail += 1.0;
            self.last_fail_ms = now_ms;
        }
        self.recalc(now_ms);
    }

    /// Recomputes the score. Negative elapsed time (clock skew) clamps to
    /// zero so a backwards NTP step cannot inflate old observations.
    pub fn recalc(&mut self, now_ms: i64) {
        let decayed_success = self.success * decay_factor(now_ms - self.last_success_ms);
        let decayed_fail = self.fail * decay_factor(now_ms - self.last_fail_ms);
        let raw = decayed_success * SUCCESS_WEIGHT - decayed_fail * FAIL_WEIGHT;
        self.score = if self.success + self.fail < MIN_SAMPLES {
            raw * LOW_CONFIDENCE_FACTOR
        } else {
            raw
        };
    }

    pub fn from_record(record: &ProxyScoreRecord) -> Self {
        Self {
            success: record.success,
            fail: record.fail,
            last_success_ms: record.last_success,
            last_fail_ms: record.last_fail,
            score: record.score,
        }
    }

    pub fn to_record(self) -> ProxyScoreRecord {
        ProxyScoreRecord {
            success: self.success,
            fail: self.fail,
            last_success: self.last_success_ms,
            last_fail: self.last_fail_ms,
            score: self.score,
        }
    }
}

fn decay_factor(elapsed_ms: i64) -> f64 {
    let elapsed = elapsed_ms.max(0) as f64;
    (-elapsed / DECAY_MS).exp()
}

/// Re-seeds every stat with synthetic successes in descending rank order:
/// with k proxies the current best gets k successes, the worst gets one.
/// Relative ranking survives, accumulated magnitude does not, which bounds
/// score drift over long uptimes.
pub(crate) fn rebase(stats: &mut HashMap<String, ProxyStat>, now_ms: i64) {
    let mut ranked: Vec<(String, f64)> = stats
        .iter()
        .map(|(name, stat)| (name.clone(), stat.score))
        .collect();
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let count = ranked.len();
    for (rank, (name, _)) in ranked.into_iter().enumerate() {
        if let Some(stat) = stats.get_mut(&name) {
            stat.success = (count - rank) as f64;
            stat.fail = 0.0;
            stat.last_success_ms = now_ms;
            stat.last_fail_ms = 0;
            stat.recalc(now_ms);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const NOW: i64 = 1_700_000_000_000;

    #[test]
    fn test_success_raises_score() {
        let mut stat = ProxyStat::default();
        stat.record(true, NOW);
        let after_one = stat.score;
        stat.record(true, NOW + 1_000);
        assert!(stat.score >= after_one);
    }

    #[test]
    fn test_failure_outweighs_success() {
        let mut stat = ProxyStat::default();
        stat.record(true, NOW);
        stat.record(false, NOW + 1_000);
        assert!(stat.score < 0.0, "one failure should sink one success");
    }

    #[test]
    fn test_decay_prefers_recent_observations() {
        // Identical tallies; one proxy's successes are two days older.
        let mut recent = ProxyStat {
            success: 10.0,
            last_success_ms: NOW - 1_000,
            ..Default::default()
        };
        let mut old = ProxyStat {
            success: 10.0,
            last_success_ms: NOW - 2 * 86_400_000,
            ..Default::default()
        };
        recent.recalc(NOW);
        old.recalc(NOW);
        assert!(recent.score > old.score);
    }

    #[test]
    fn test_negative_elapsed_clamps() {
        // Timestamp in the future must not amplify the tally.
        let mut stat = ProxyStat {
            success: 5.0,
            last_success_ms: NOW + 60_000,
            ..Default::default()
        };
        stat.recalc(NOW);
        assert!(stat.score <= 5.0 * SUCCESS_WEIGHT + f64::EPSILON);
    }

    #[test]
    fn test_low_sample_damping() {
        let mut sparse = ProxyStat::default();
        sparse.record(true, NOW);

        let mut established = ProxyStat::default();
        for i in 0..5 {
            established.record(true, NOW + i);
        }
        // One lucky success scores well below an established record.
        assert!(sparse.score < established.score / 2.0);
    }

    #[test]
    fn test_rebase_preserves_ranking() {
        let mut stats = HashMap::new();
        stats.insert(
            "good".to_string(),
            ProxyStat {
                success: 50.0,
                last_success_ms: NOW,
                score: 50.0,
                ..Default::default()
            },
        );
        stats.insert(
            "bad".to_string(),
            ProxyStat {
                fail: 50.0,
                last_fail_ms: NOW,
                score: -150.0,
                ..Default::default()
            },
        );

        rebase(&mut stats, NOW);

        let good = stats["good"];
        let bad = stats["bad"];
        assert!(good.score > bad.score);
        assert_eq!(good.success, 2.0);
        assert_eq!(bad.success, 1.0);
        assert_eq!(good.fail, 0.0);
        assert_eq!(bad.fail, 0.0);
    }

    #[test]
    fn test_record_round_trip() {
        let mut stat = ProxyStat::default();
        stat.record(true, NOW);
        stat.record(false, NOW + 10);
        let restored = ProxyStat::from_record(&stat.to_record());
        assert_eq!(stat, restored);
    }

    proptest! {
        /// With no failures, each additional success within the decay
        /// window never lowers the score.
        #[test]
        fn prop_score_monotonic_under_successes(steps in 1usize..50) {
            let mut stat = ProxyStat::default();
            let mut previous = f64::MIN;
            for i in 0..steps {
                stat.record(true, NOW + i as i64 * 1_000);
                prop_assert!(stat.score >= previous);
                previous = stat.score;
            }
        }
    }
}
