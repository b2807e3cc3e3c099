// Rep counter - pure state machine over checkpoint positions. Knows nothing
// about rendering, media time, or where positions come from.

use crate::models::exercise::{Position, RepCountResult, RepCriteria};
use std::collections::HashSet;

pub struct RepCounter {
    criteria: RepCriteria,
    rep_count: u32,
    detected: HashSet<Position>,
    last_position: Option<Position>,
    /// Timestamp the current rep is measured from. Seeded by the first
    /// processed position so the first rep has a duration too.
    rep_started_ms: Option<i64>,
}

impl RepCounter {
    pub fn new(criteria: RepCriteria) -> Self {
        Self {
            criteria,
            rep_count: 0,
            detected: HashSet::new(),
            last_position: None,
            rep_started_ms: None,
        }
    }

    /// Feed one detected position. A rep completes on the configured
    /// start -> end position transition, once every required position has
    /// been seen and at least `min_rep_duration_ms` has elapsed since the
    /// last counted rep (or since the first position, for the first rep).
    pub fn process_position(&mut self, position: Position, timestamp_ms: i64) -> RepCountResult {
        let rep_started_ms = *self.rep_started_ms.get_or_insert(timestamp_ms);
        self.detected.insert(position);

        let elapsed_ms = timestamp_ms - rep_started_ms;
        let on_completion_edge = self.last_position == Some(self.criteria.completion_start)
            && position == self.criteria.completion_end;
        let all_required = self
            .criteria
            .required_positions
            .iter()
            .all(|p| self.detected.contains(p));

        let rep_completed =
            on_completion_edge && all_required && elapsed_ms >= self.criteria.min_rep_duration_ms;
        // Slow reps still count; overrun is a quality signal only
        let duration_exceeded = rep_completed && elapsed_ms > self.criteria.max_rep_duration_ms;

        if rep_completed {
            self.rep_count += 1;
            self.detected.clear();
            self.detected.insert(position);
            self.rep_started_ms = Some(timestamp_ms);
            log::info!("rep {} counted ({elapsed_ms} ms)", self.rep_count);
        }
        self.last_position = Some(position);

        RepCountResult {
            rep_count: self.rep_count,
            rep_completed,
            detected_positions: self.detected_positions(),
            missing_positions: self.missing_positions(),
            last_position: self.last_position,
            duration_exceeded,
        }
    }

    pub fn reset(&mut self) {
        self.rep_count = 0;
        self.detected.clear();
        self.last_position = None;
        self.rep_started_ms = None;
    }

    pub fn rep_count(&self) -> u32 {
        self.rep_count
    }

    /// Required positions seen so far, in criteria order
    pub fn detected_positions(&self) -> Vec<Position> {
        self.criteria
            .required_positions
            .iter()
            .copied()
            .filter(|p| self.detected.contains(p))
            .collect()
    }

    /// Required positions not yet seen, in criteria order
    pub fn missing_positions(&self) -> Vec<Position> {
        self.criteria
            .required_positions
            .iter()
            .copied()
            .filter(|p| !self.detected.contains(p))
            .collect()
    }

    /// Fraction of required positions detected, 0-100. For progress bars.
    pub fn rep_progress_percent(&self) -> f32 {
        let total = self.criteria.required_positions.len();
        if total == 0 {
            return 0.0;
        }
        (self.detected_positions().len() as f32 / total as f32) * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::exercise::ExerciseDefinition;

    // Criteria matching the canonical four-position cycle: required
    // {Top, MidDescent, Bottom, MidAscent}, completing on MidAscent -> Top
    fn criteria() -> RepCriteria {
        ExerciseDefinition::leg_raise().criteria
    }

    #[test]
    fn test_full_sequence_with_valid_timing_counts_one_rep() {
        let mut counter = RepCounter::new(criteria());
        let sequence = [
            (Position::Top, 0),
            (Position::MidDescent, 100),
            (Position::Bottom, 200),
            (Position::MidAscent, 300),
            (Position::Top, 900),
        ];
        let mut last = None;
        for (position, ts) in sequence {
            last = Some(counter.process_position(position, ts));
        }
        let result = last.unwrap();
        assert_eq!(result.rep_count, 1);
        assert!(result.rep_completed);
        assert!(!result.duration_exceeded);
    }

    #[test]
    fn test_too_fast_sequence_counts_nothing() {
        let mut counter = RepCounter::new(criteria());
        counter.process_position(Position::Top, 0);
        counter.process_position(Position::MidDescent, 100);
        counter.process_position(Position::Bottom, 200);
        counter.process_position(Position::MidAscent, 300);
        // 300 ms since the first position, under the 500 ms floor
        let result = counter.process_position(Position::Top, 300);
        assert_eq!(result.rep_count, 0);
        assert!(!result.rep_completed);
    }

    #[test]
    fn test_missing_required_position_blocks_the_count() {
        let mut counter = RepCounter::new(criteria());
        counter.process_position(Position::Top, 0);
        counter.process_position(Position::Bottom, 300);
        counter.process_position(Position::MidAscent, 600);
        let result = counter.process_position(Position::Top, 900);
        assert_eq!(result.rep_count, 0);
        assert_eq!(result.missing_positions, vec![Position::MidDescent]);
    }

    #[test]
    fn test_completion_requires_the_configured_transition() {
        let mut counter = RepCounter::new(criteria());
        counter.process_position(Position::Top, 0);
        counter.process_position(Position::MidDescent, 200);
        counter.process_position(Position::MidAscent, 400);
        counter.process_position(Position::Bottom, 600);
        // All four seen and enough time elapsed, but the last transition is
        // Bottom -> Top, not MidAscent -> Top
        let result = counter.process_position(Position::Top, 1000);
        assert_eq!(result.rep_count, 0);
    }

    #[test]
    fn test_second_rep_measures_from_the_first() {
        let mut counter = RepCounter::new(criteria());
        let cycle = [
            Position::Top,
            Position::MidDescent,
            Position::Bottom,
            Position::MidAscent,
        ];
        let mut ts = 0;
        for position in cycle {
            counter.process_position(position, ts);
            ts += 200;
        }
        assert_eq!(counter.process_position(Position::Top, 800).rep_count, 1);

        // Re-complete instantly: blocked by min duration from rep 1
        for position in [Position::MidDescent, Position::Bottom, Position::MidAscent] {
            counter.process_position(position, 850);
        }
        assert_eq!(counter.process_position(Position::Top, 900).rep_count, 1);

        // Same closing transition later succeeds
        for position in [Position::MidDescent, Position::Bottom, Position::MidAscent] {
            counter.process_position(position, 1200);
        }
        assert_eq!(counter.process_position(Position::Top, 1400).rep_count, 2);
    }

    #[test]
    fn test_slow_rep_counts_but_flags_duration() {
        let mut counter = RepCounter::new(criteria());
        counter.process_position(Position::Top, 0);
        counter.process_position(Position::MidDescent, 4_000);
        counter.process_position(Position::Bottom, 8_000);
        counter.process_position(Position::MidAscent, 12_000);
        let result = counter.process_position(Position::Top, 15_000);
        assert_eq!(result.rep_count, 1);
        assert!(result.duration_exceeded);
    }

    #[test]
    fn test_progress_tracks_detected_required_positions() {
        let mut counter = RepCounter::new(criteria());
        assert_eq!(counter.rep_progress_percent(), 0.0);
        counter.process_position(Position::Top, 0);
        assert_eq!(counter.rep_progress_percent(), 25.0);
        counter.process_position(Position::MidDescent, 100);
        counter.process_position(Position::Bottom, 200);
        assert_eq!(counter.rep_progress_percent(), 75.0);
        assert_eq!(
            counter.detected_positions(),
            vec![Position::Top, Position::MidDescent, Position::Bottom]
        );
    }

    #[test]
    fn test_reset_returns_to_initial_state() {
        let mut counter = RepCounter::new(criteria());
        counter.process_position(Position::Top, 0);
        counter.reset();
        assert_eq!(counter.rep_count(), 0);
        assert!(counter.detected_positions().is_empty());
        assert_eq!(counter.rep_progress_percent(), 0.0);
    }
}
