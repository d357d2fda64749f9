// =============================================================================
// Signal Scorer — five-component integer score in [0, 15]
// =============================================================================
//
// A pure function of the trigger's window stats and volume ratio. Component
// scores are retained on the evaluation record so a rejected signal can be
// audited after the fact.
//
// Thresholds:
//   volume ratio          1 / 3 / 5  at  >= 5 / 10 / 20
//   call concentration    2 / 3      at  >  0.70 / 0.85
//   sweep share           2 / 3      at  >  0.30 / 0.50
//   strike concentration  3 at <= 3 unique strikes, 1 at <= 5
//   notional              1 / 3      at  >= $50K / $200K
//
// The three concentration components (call, sweep, strike) only award points
// once the window holds at least `MIN_CONCENTRATION_CONTRACTS` contracts;
// ratios over a handful of prints carry no information.
// =============================================================================

use serde::Serialize;

use crate::aggregator::WindowStats;

/// Contracts floor for the concentration components.
const MIN_CONCENTRATION_CONTRACTS: u64 = 50;

/// Per-component points plus the total.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScoreBreakdown {
    pub volume_ratio: u8,
    pub call_pct: u8,
    pub sweep_pct: u8,
    pub strike_concentration: u8,
    pub notional: u8,
}

impl ScoreBreakdown {
    pub fn total(&self) -> u8 {
        self.volume_ratio
            + self.call_pct
            + self.sweep_pct
            + self.strike_concentration
            + self.notional
    }
}

/// Score a trigger's window. Same input always yields the same output.
pub fn score(stats: &WindowStats, volume_ratio: f64) -> ScoreBreakdown {
    let volume_ratio_pts = if volume_ratio >= 20.0 {
        5
    } else if volume_ratio >= 10.0 {
        3
    } else if volume_ratio >= 5.0 {
        1
    } else {
        0
    };

    let concentrated = stats.contracts_total >= MIN_CONCENTRATION_CONTRACTS;

    let call_pct_pts = if !concentrated {
        0
    } else if stats.call_pct > 0.85 {
        3
    } else if stats.call_pct > 0.70 {
        2
    } else {
        0
    };

    let sweep_pct_pts = if !concentrated {
        0
    } else if stats.sweep_pct > 0.50 {
        3
    } else if stats.sweep_pct > 0.30 {
        2
    } else {
        0
    };

    let strike_pts = if !concentrated {
        0
    } else if stats.unique_strikes <= 3 {
        3
    } else if stats.unique_strikes <= 5 {
        1
    } else {
        0
    };

    let notional_pts = if stats.notional_total >= 200_000.0 {
        3
    } else if stats.notional_total >= 50_000.0 {
        1
    } else {
        0
    };

    ScoreBreakdown {
        volume_ratio: volume_ratio_pts,
        call_pct: call_pct_pts,
        sweep_pct: sweep_pct_pts,
        strike_concentration: strike_pts,
        notional: notional_pts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(
        notional: f64,
        contracts: u64,
        call_pct: f64,
        sweep_pct: f64,
        strikes: usize,
    ) -> WindowStats {
        WindowStats {
            notional_total: notional,
            contracts_total: contracts,
            call_pct,
            sweep_pct,
            unique_strikes: strikes,
            ..WindowStats::default()
        }
    }

    #[test]
    fn boundary_trigger_scores_zero() {
        // Every component exactly at its failing boundary.
        let s = stats(49_999.0, 40, 0.85, 0.50, 4);
        let b = score(&s, 4.99);
        assert_eq!(b, ScoreBreakdown::default());
        assert_eq!(b.total(), 0);
    }

    #[test]
    fn max_score() {
        let s = stats(500_000.0, 300, 0.95, 0.80, 2);
        let b = score(&s, 25.0);
        assert_eq!(b.volume_ratio, 5);
        assert_eq!(b.call_pct, 3);
        assert_eq!(b.sweep_pct, 3);
        assert_eq!(b.strike_concentration, 3);
        assert_eq!(b.notional, 3);
        assert_eq!(b.total(), 15);
    }

    #[test]
    fn s2_scenario_scores_thirteen() {
        // ratio 8.0, 90% calls, 60% sweeps, 2 strikes, 200 contracts, $400K.
        let s = stats(400_000.0, 200, 0.90, 0.60, 2);
        let b = score(&s, 8.0);
        assert_eq!(b.volume_ratio, 1);
        assert_eq!(b.call_pct, 3);
        assert_eq!(b.sweep_pct, 3);
        assert_eq!(b.strike_concentration, 3);
        assert_eq!(b.notional, 3);
        assert_eq!(b.total(), 13);
    }

    #[test]
    fn volume_ratio_tiers() {
        let s = stats(0.0, 0, 0.0, 0.0, 0);
        assert_eq!(score(&s, 4.99).volume_ratio, 0);
        assert_eq!(score(&s, 5.0).volume_ratio, 1);
        assert_eq!(score(&s, 10.0).volume_ratio, 3);
        assert_eq!(score(&s, 20.0).volume_ratio, 5);
    }

    #[test]
    fn call_pct_strictly_greater() {
        assert_eq!(score(&stats(0.0, 100, 0.70, 0.0, 6), 0.0).call_pct, 0);
        assert_eq!(score(&stats(0.0, 100, 0.71, 0.0, 6), 0.0).call_pct, 2);
        assert_eq!(score(&stats(0.0, 100, 0.85, 0.0, 6), 0.0).call_pct, 2);
        assert_eq!(score(&stats(0.0, 100, 0.86, 0.0, 6), 0.0).call_pct, 3);
    }

    #[test]
    fn sweep_pct_strictly_greater() {
        assert_eq!(score(&stats(0.0, 100, 0.0, 0.30, 6), 0.0).sweep_pct, 0);
        assert_eq!(score(&stats(0.0, 100, 0.0, 0.31, 6), 0.0).sweep_pct, 2);
        assert_eq!(score(&stats(0.0, 100, 0.0, 0.50, 6), 0.0).sweep_pct, 2);
        assert_eq!(score(&stats(0.0, 100, 0.0, 0.51, 6), 0.0).sweep_pct, 3);
    }

    #[test]
    fn concentration_components_need_contracts() {
        // Strong ratios over thin flow score nothing.
        let thin = stats(0.0, 49, 0.95, 0.80, 2);
        let b = score(&thin, 0.0);
        assert_eq!(b.call_pct, 0);
        assert_eq!(b.sweep_pct, 0);
        assert_eq!(b.strike_concentration, 0);
    }

    #[test]
    fn strike_concentration_tiers() {
        assert_eq!(score(&stats(0.0, 50, 0.0, 0.0, 3), 0.0).strike_concentration, 3);
        assert_eq!(score(&stats(0.0, 50, 0.0, 0.0, 4), 0.0).strike_concentration, 1);
        assert_eq!(score(&stats(0.0, 50, 0.0, 0.0, 5), 0.0).strike_concentration, 1);
        assert_eq!(score(&stats(0.0, 50, 0.0, 0.0, 6), 0.0).strike_concentration, 0);
    }

    #[test]
    fn notional_tiers() {
        assert_eq!(score(&stats(49_999.0, 0, 0.0, 0.0, 0), 0.0).notional, 0);
        assert_eq!(score(&stats(50_000.0, 0, 0.0, 0.0, 0), 0.0).notional, 1);
        assert_eq!(score(&stats(200_000.0, 0, 0.0, 0.0, 0), 0.0).notional, 3);
    }

    #[test]
    fn deterministic() {
        let s = stats(400_000.0, 200, 0.90, 0.60, 2);
        assert_eq!(score(&s, 8.0), score(&s, 8.0));
    }
}
