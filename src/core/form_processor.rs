// Form processor - turns the per-frame skeleton stream into discrete
// checkpoint events, one best candidate per configured position per motion
// cycle.

use crate::models::exercise::{ExerciseDefinition, Position, SwingDirection};
use crate::models::pose::SkeletonSnapshot;
use std::collections::HashMap;

/// The best frame seen so far for one position within the current cycle
#[derive(Debug, Clone)]
pub struct PositionCandidate {
    pub snapshot: SkeletonSnapshot,
    pub timestamp_ms: i64,
    pub spine_angle: f32,
    pub arm_angle: Option<f32>,
    /// Absolute distance to the position's ideal spine angle, degrees
    pub angular_distance: f32,
}

/// Emitted once per configured position when a cycle completes
#[derive(Debug, Clone)]
pub struct CheckpointEvent {
    pub position: Position,
    pub candidate: PositionCandidate,
}

/// Best-candidate-per-cycle checkpoint detector.
///
/// A cycle completes when the maximum spine angle since the last reset has
/// exceeded the excursion threshold and the current angle has fallen back
/// below the reset threshold. On completion the best candidate for each
/// configured position is emitted in definition order and all cycle state
/// clears for the next rep.
pub struct FormProcessor {
    definition: ExerciseDefinition,
    candidates: HashMap<Position, PositionCandidate>,
    prev_spine_angle: Option<f32>,
    direction: Option<SwingDirection>,
    max_angle_since_reset: f32,
}

impl FormProcessor {
    pub fn new(definition: ExerciseDefinition) -> Self {
        Self {
            definition,
            candidates: HashMap::new(),
            prev_spine_angle: None,
            direction: None,
            max_angle_since_reset: 0.0,
        }
    }

    pub fn definition(&self) -> &ExerciseDefinition {
        &self.definition
    }

    pub fn direction(&self) -> Option<SwingDirection> {
        self.direction
    }

    /// Feed one skeleton observation. Returns the cycle's checkpoint events
    /// when this frame completes a cycle, otherwise an empty vec.
    pub fn process(&mut self, snapshot: &SkeletonSnapshot, timestamp_ms: i64) -> Vec<CheckpointEvent> {
        let spine = snapshot.spine_angle;

        // Swing direction only flips on deltas above the noise threshold
        if let Some(prev) = self.prev_spine_angle {
            let delta = spine - prev;
            if delta.abs() > self.definition.cycle.noise_threshold_degrees {
                self.direction = Some(if delta > 0.0 {
                    SwingDirection::Descending
                } else {
                    SwingDirection::Ascending
                });
            }
        }
        self.prev_spine_angle = Some(spine);

        if spine > self.max_angle_since_reset {
            self.max_angle_since_reset = spine;
        }

        for spec in &self.definition.positions {
            if let Some(required) = spec.swing {
                if self.direction != Some(required) {
                    continue;
                }
            }
            let distance = (spine - spec.ideal_spine_angle).abs();
            let better = match self.candidates.get(&spec.position) {
                // Ties keep the earlier candidate
                Some(existing) => distance < existing.angular_distance,
                None => true,
            };
            if better {
                self.candidates.insert(
                    spec.position,
                    PositionCandidate {
                        snapshot: snapshot.clone(),
                        timestamp_ms,
                        spine_angle: spine,
                        arm_angle: snapshot.arm_angle,
                        angular_distance: distance,
                    },
                );
            }
        }

        let cycle = &self.definition.cycle;
        if self.max_angle_since_reset > cycle.min_excursion_degrees && spine < cycle.reset_degrees {
            let events: Vec<CheckpointEvent> = self
                .definition
                .positions
                .iter()
                .filter_map(|spec| {
                    self.candidates.remove(&spec.position).map(|candidate| CheckpointEvent {
                        position: spec.position,
                        candidate,
                    })
                })
                .collect();
            log::debug!(
                "cycle complete: max {:.1} deg, {} checkpoints",
                self.max_angle_since_reset,
                events.len()
            );
            self.candidates.clear();
            self.max_angle_since_reset = spine;
            return events;
        }

        Vec::new()
    }

    /// Drop all cycle state (candidates, direction, excursion tracker).
    /// Used after seeks, where frame continuity is broken.
    pub fn reset(&mut self) {
        self.candidates.clear();
        self.prev_spine_angle = None;
        self.direction = None;
        self.max_angle_since_reset = 0.0;
    }

    #[cfg(test)]
    fn candidate(&self, position: Position) -> Option<&PositionCandidate> {
        self.candidates.get(&position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::exercise::CycleConfig;

    fn snapshot(spine_angle: f32) -> SkeletonSnapshot {
        SkeletonSnapshot {
            keypoints: vec![],
            spine_angle,
            arm_angle: None,
            hip_angle: None,
            knee_angle: None,
            has_required_visibility: true,
        }
    }

    fn processor() -> FormProcessor {
        FormProcessor::new(ExerciseDefinition::leg_raise())
    }

    /// Feed one full swing: vertical to past the bottom and back
    fn run_swing(proc: &mut FormProcessor, base_ms: i64, angles: &[f32]) -> Vec<CheckpointEvent> {
        let mut all = Vec::new();
        for (i, angle) in angles.iter().enumerate() {
            all.extend(proc.process(&snapshot(*angle), base_ms + i as i64 * 100));
        }
        all
    }

    #[test]
    fn test_full_swing_emits_checkpoints_in_definition_order() {
        let mut proc = processor();
        let events = run_swing(
            &mut proc,
            0,
            &[5.0, 20.0, 45.0, 70.0, 85.0, 70.0, 45.0, 20.0, 10.0],
        );

        let order: Vec<Position> = events.iter().map(|e| e.position).collect();
        assert_eq!(
            order,
            vec![
                Position::Top,
                Position::MidDescent,
                Position::Bottom,
                Position::MidAscent
            ]
        );
        // Bottom checkpoint picked the frame closest to 85 degrees
        let bottom = &events[2];
        assert_eq!(bottom.candidate.spine_angle, 85.0);
    }

    #[test]
    fn test_candidates_keep_the_earlier_frame_on_ties() {
        let mut proc = processor();
        proc.process(&snapshot(40.0), 0);
        proc.process(&snapshot(50.0), 100);
        // Both are 5 degrees from the mid ideal of 45; descending gate is
        // active after the second frame, and the tie keeps nothing newer
        proc.process(&snapshot(50.0), 200);
        let candidate = proc.candidate(Position::MidDescent).unwrap();
        assert_eq!(candidate.timestamp_ms, 100);
    }

    #[test]
    fn test_direction_gated_positions_only_update_in_their_swing() {
        let mut proc = processor();
        // Descend through 45 then ascend through 45
        run_swing(&mut proc, 0, &[5.0, 45.0, 85.0]);
        let descent = proc.candidate(Position::MidDescent).unwrap().timestamp_ms;
        run_swing(&mut proc, 1000, &[45.0]);
        // MidDescent did not move while ascending
        assert_eq!(
            proc.candidate(Position::MidDescent).unwrap().timestamp_ms,
            descent
        );
        assert!(proc.candidate(Position::MidAscent).is_some());
    }

    #[test]
    fn test_noise_below_threshold_never_flips_direction() {
        let mut proc = processor();
        proc.process(&snapshot(5.0), 0);
        proc.process(&snapshot(45.0), 100);
        assert_eq!(proc.direction(), Some(SwingDirection::Descending));
        // 2-degree jitter is below the 3-degree noise threshold
        proc.process(&snapshot(43.5), 200);
        proc.process(&snapshot(44.5), 300);
        assert_eq!(proc.direction(), Some(SwingDirection::Descending));
    }

    #[test]
    fn test_no_cycle_without_minimum_excursion() {
        let mut proc = FormProcessor::new(ExerciseDefinition {
            cycle: CycleConfig {
                min_excursion_degrees: 35.0,
                reset_degrees: 15.0,
                noise_threshold_degrees: 3.0,
            },
            ..ExerciseDefinition::leg_raise()
        });
        // Shallow swing peaks at 30 degrees, under the excursion floor
        let events = run_swing(&mut proc, 0, &[5.0, 20.0, 30.0, 20.0, 10.0]);
        assert!(events.is_empty());
    }

    #[test]
    fn test_reset_clears_cycle_state() {
        let mut proc = processor();
        run_swing(&mut proc, 0, &[5.0, 45.0, 85.0]);
        proc.reset();
        assert!(proc.candidate(Position::Bottom).is_none());
        assert_eq!(proc.direction(), None);
        // A fresh shallow return below reset does not complete a cycle
        let events = run_swing(&mut proc, 1000, &[10.0]);
        assert!(events.is_empty());
    }

    #[test]
    fn test_second_cycle_starts_clean() {
        let mut proc = processor();
        let first = run_swing(&mut proc, 0, &[5.0, 45.0, 85.0, 45.0, 10.0]);
        assert_eq!(first.len(), 4);
        let second = run_swing(&mut proc, 1000, &[5.0, 45.0, 85.0, 45.0, 10.0]);
        assert_eq!(second.len(), 4);
        // Second cycle's bottom candidate comes from the second swing
        assert!(second[2].candidate.timestamp_ms > first[2].candidate.timestamp_ms);
    }
}
