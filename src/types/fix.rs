//! Fix-quality classification.
//!
//! The receiver reports several overlapping indicators: a raw fix-type code,
//! an RTK carrier-solution code, a differential flag, and validity bits.
//! [`FixStateTracker`] collapses them into one [`FixState`] per update, in a
//! fixed precedence order. RTK states are checked before the generic 2D/3D
//! classification because a receiver in RTK mode still reports "3D" validity;
//! classifying on fix type first would never surface RTK at all.

use serde::Serialize;

use crate::types::solution::{CarrierSolution, NavigationSolution, fix_code};

/// Minimum satellites before any solution counts as a fix.
pub const DEFAULT_MIN_SATELLITES: u8 = 4;

/// Normalized fix quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FixState {
    NoFix,
    Fix2D,
    Fix3D,
    Dgps,
    RtkFloat,
    RtkFixed,
    /// Inertial-only navigation, no usable satellite signal.
    DeadReckoning,
    /// Combined GNSS + inertial solution.
    Combined,
}

impl FixState {
    /// Whether any position is usable at all.
    pub fn has_position(self) -> bool {
        self != FixState::NoFix
    }
}

impl std::fmt::Display for FixState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FixState::NoFix => "No Fix",
            FixState::Fix2D => "2D Fix",
            FixState::Fix3D => "3D Fix",
            FixState::Dgps => "DGPS",
            FixState::RtkFloat => "RTK Float",
            FixState::RtkFixed => "RTK Fixed",
            FixState::DeadReckoning => "Dead Reckoning",
            FixState::Combined => "GNSS + Dead Reckoning",
        };
        f.write_str(name)
    }
}

/// A classified fix with its headline accuracy number.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FixAssessment {
    pub state: FixState,
    /// Horizontal accuracy estimate, meters.
    pub accuracy_m: f64,
}

/// Maps navigation solutions to [`FixState`], tracking acquisition and loss
/// transitions for diagnostics. No other state is retained between calls;
/// identical input always yields identical output.
#[derive(Debug)]
pub struct FixStateTracker {
    min_satellites: u8,
    last: Option<FixState>,
    acquired: u64,
    lost: u64,
}

impl Default for FixStateTracker {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_SATELLITES)
    }
}

impl FixStateTracker {
    pub fn new(min_satellites: u8) -> Self {
        Self { min_satellites, last: None, acquired: 0, lost: 0 }
    }

    /// Classify one solution.
    ///
    /// Precedence: NoFix, RTK fixed, RTK float, DGPS, dead-reckoning states,
    /// 3D, 2D. Satellite-based RTK states deliberately outrank the combined
    /// GNSS+DR code: when the receiver reports both, the carrier solution is
    /// the stronger statement about accuracy.
    pub fn update(&mut self, solution: &NavigationSolution) -> FixAssessment {
        let state = self.classify(solution);

        match (self.last, state) {
            (Some(FixState::NoFix) | None, s) if s.has_position() => self.acquired += 1,
            (Some(prev), FixState::NoFix) if prev.has_position() => self.lost += 1,
            _ => {}
        }
        self.last = Some(state);

        FixAssessment { state, accuracy_m: solution.h_acc_m }
    }

    fn classify(&self, solution: &NavigationSolution) -> FixState {
        let no_position =
            matches!(solution.fix_type, fix_code::NO_FIX | fix_code::TIME_ONLY);
        let dead_reckoning_only = solution.fix_type == fix_code::DEAD_RECKONING_ONLY;

        // Dead reckoning runs on inertial sensors and is exempt from the
        // satellite-count floor.
        if no_position || (!dead_reckoning_only && solution.satellites < self.min_satellites) {
            return FixState::NoFix;
        }

        match solution.carrier {
            CarrierSolution::Fixed => return FixState::RtkFixed,
            CarrierSolution::Float => return FixState::RtkFloat,
            CarrierSolution::None => {}
        }

        if solution.diff_applied {
            return FixState::Dgps;
        }

        match solution.fix_type {
            fix_code::DEAD_RECKONING_ONLY => FixState::DeadReckoning,
            fix_code::GNSS_PLUS_DEAD_RECKONING => FixState::Combined,
            fix_code::FIX_3D => FixState::Fix3D,
            _ => FixState::Fix2D,
        }
    }

    /// Number of NoFix -> fix transitions observed.
    pub fn fixes_acquired(&self) -> u64 {
        self.acquired
    }

    /// Number of fix -> NoFix transitions observed.
    pub fn fixes_lost(&self) -> u64 {
        self.lost
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::solution::CarrierSolution;

    fn solution(fix_type: u8, carrier: CarrierSolution, satellites: u8) -> NavigationSolution {
        NavigationSolution {
            itow_ms: 0,
            timestamp: None,
            lat_deg: 47.37,
            lon_deg: 8.54,
            height_m: 450.0,
            height_msl_m: 402.0,
            h_acc_m: 0.014,
            v_acc_m: 0.021,
            ground_speed_mps: 0.0,
            heading_deg: 0.0,
            satellites,
            fix_type,
            carrier,
            diff_applied: false,
            gnss_fix_ok: true,
            fusion: None,
        }
    }

    #[test]
    fn no_fix_wins_regardless_of_other_fields() {
        let mut tracker = FixStateTracker::default();

        let mut s = solution(fix_code::NO_FIX, CarrierSolution::Fixed, 0);
        s.diff_applied = true;
        assert_eq!(tracker.update(&s).state, FixState::NoFix);

        // Plenty of flags set, but zero satellites on a GNSS fix type.
        let s = solution(fix_code::FIX_3D, CarrierSolution::None, 0);
        assert_eq!(tracker.update(&s).state, FixState::NoFix);
    }

    #[test]
    fn rtk_fixed_outranks_simultaneous_3d_validity() {
        let mut tracker = FixStateTracker::default();
        let s = solution(fix_code::FIX_3D, CarrierSolution::Fixed, 20);
        assert!(s.has_valid_altitude());
        assert_eq!(tracker.update(&s).state, FixState::RtkFixed);
    }

    #[test]
    fn rtk_outranks_combined_dead_reckoning() {
        let mut tracker = FixStateTracker::default();
        let s = solution(fix_code::GNSS_PLUS_DEAD_RECKONING, CarrierSolution::Fixed, 15);
        assert_eq!(tracker.update(&s).state, FixState::RtkFixed);

        let s = solution(fix_code::GNSS_PLUS_DEAD_RECKONING, CarrierSolution::Float, 15);
        assert_eq!(tracker.update(&s).state, FixState::RtkFloat);
    }

    #[test]
    fn precedence_ladder_below_rtk() {
        let mut tracker = FixStateTracker::default();

        let mut s = solution(fix_code::FIX_3D, CarrierSolution::None, 12);
        s.diff_applied = true;
        assert_eq!(tracker.update(&s).state, FixState::Dgps);

        let s = solution(fix_code::FIX_3D, CarrierSolution::None, 12);
        assert_eq!(tracker.update(&s).state, FixState::Fix3D);

        let s = solution(fix_code::FIX_2D, CarrierSolution::None, 5);
        assert_eq!(tracker.update(&s).state, FixState::Fix2D);

        let s = solution(fix_code::GNSS_PLUS_DEAD_RECKONING, CarrierSolution::None, 9);
        assert_eq!(tracker.update(&s).state, FixState::Combined);
    }

    #[test]
    fn dead_reckoning_survives_low_satellite_count() {
        let mut tracker = FixStateTracker::default();
        let s = solution(fix_code::DEAD_RECKONING_ONLY, CarrierSolution::None, 0);
        assert_eq!(tracker.update(&s).state, FixState::DeadReckoning);
    }

    #[test]
    fn classification_is_deterministic() {
        let mut a = FixStateTracker::default();
        let mut b = FixStateTracker::default();
        let s = solution(fix_code::FIX_3D, CarrierSolution::Float, 11);
        assert_eq!(a.update(&s), b.update(&s));
        assert_eq!(a.update(&s), b.update(&s));
    }

    #[test]
    fn transitions_are_counted() {
        let mut tracker = FixStateTracker::default();

        tracker.update(&solution(fix_code::NO_FIX, CarrierSolution::None, 0));
        assert_eq!(tracker.fixes_acquired(), 0);

        tracker.update(&solution(fix_code::FIX_3D, CarrierSolution::None, 10));
        assert_eq!(tracker.fixes_acquired(), 1);

        tracker.update(&solution(fix_code::FIX_3D, CarrierSolution::Fixed, 10));
        assert_eq!(tracker.fixes_acquired(), 1); // fix-to-fix is not an acquisition

        tracker.update(&solution(fix_code::NO_FIX, CarrierSolution::None, 0));
        assert_eq!(tracker.fixes_lost(), 1);

        tracker.update(&solution(fix_code::FIX_2D, CarrierSolution::None, 6));
        assert_eq!(tracker.fixes_acquired(), 2);
    }

    #[test]
    fn assessment_carries_horizontal_accuracy() {
        let mut tracker = FixStateTracker::default();
        let s = solution(fix_code::FIX_3D, CarrierSolution::Fixed, 20);
        let assessment = tracker.update(&s);
        assert!((assessment.accuracy_m - 0.014).abs() < 1e-12);
    }
}
