// Exercise definitions: checkpoint positions, cycle thresholds, and rep
// criteria, all carried as data so new exercises are configuration, not code

use serde::{Deserialize, Serialize};

/// A named, recognizable pose state within one repetition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Position {
    Top,
    MidDescent,
    Bottom,
    MidAscent,
}

impl Position {
    pub fn label(&self) -> &'static str {
        match self {
            Position::Top => "top",
            Position::MidDescent => "mid_descent",
            Position::Bottom => "bottom",
            Position::MidAscent => "mid_ascent",
        }
    }
}

/// Direction of the current swing, derived from the spine-angle delta
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwingDirection {
    /// Spine angle increasing (moving away from vertical, toward the bottom)
    Descending,
    /// Spine angle decreasing (returning toward vertical)
    Ascending,
}

/// One checkpoint position an exercise tracks within a cycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PositionSpec {
    pub position: Position,
    /// Ideal spine angle for this checkpoint, degrees from vertical
    pub ideal_spine_angle: f32,
    /// When set, candidates only update while swinging in this direction
    pub swing: Option<SwingDirection>,
}

/// Cycle detection thresholds, degrees. Values are tuned per exercise and
/// treated as configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CycleConfig {
    /// Minimum spine-angle excursion before a cycle can complete
    pub min_excursion_degrees: f32,
    /// Angle the spine must fall back below to close the cycle
    pub reset_degrees: f32,
    /// Deltas smaller than this never flip the swing direction
    pub noise_threshold_degrees: f32,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            min_excursion_degrees: 35.0,
            reset_degrees: 15.0,
            noise_threshold_degrees: 3.0,
        }
    }
}

/// Criteria for counting one completed repetition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepCriteria {
    /// Positions that must all have been detected since the last counted rep
    pub required_positions: Vec<Position>,
    /// A rep completes on this position transition
    pub completion_start: Position,
    pub completion_end: Position,
    /// Reps faster than this are rejected
    pub min_rep_duration_ms: i64,
    /// Reps slower than this are counted but flagged as a quality signal
    pub max_rep_duration_ms: i64,
}

/// Full exercise description: the configured positions, cycle thresholds,
/// and rep criteria
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExerciseDefinition {
    pub name: String,
    /// Checkpoint positions in emission order
    pub positions: Vec<PositionSpec>,
    pub criteria: RepCriteria,
    pub cycle: CycleConfig,
}

impl ExerciseDefinition {
    /// Reference exercise: a hanging leg raise counted over a full
    /// top -> bottom -> top swing
    pub fn leg_raise() -> Self {
        Self {
            name: "leg_raise".to_string(),
            positions: vec![
                PositionSpec {
                    position: Position::Top,
                    ideal_spine_angle: 5.0,
                    swing: None,
                },
                PositionSpec {
                    position: Position::MidDescent,
                    ideal_spine_angle: 45.0,
                    swing: Some(SwingDirection::Descending),
                },
                PositionSpec {
                    position: Position::Bottom,
                    ideal_spine_angle: 85.0,
                    swing: None,
                },
                PositionSpec {
                    position: Position::MidAscent,
                    ideal_spine_angle: 45.0,
                    swing: Some(SwingDirection::Ascending),
                },
            ],
            criteria: RepCriteria {
                required_positions: vec![
                    Position::Top,
                    Position::MidDescent,
                    Position::Bottom,
                    Position::MidAscent,
                ],
                completion_start: Position::MidAscent,
                completion_end: Position::Top,
                min_rep_duration_ms: 500,
                max_rep_duration_ms: 10_000,
            },
            cycle: CycleConfig::default(),
        }
    }

    pub fn position_spec(&self, position: Position) -> Option<&PositionSpec> {
        self.positions.iter().find(|p| p.position == position)
    }
}

/// Result returned by the rep counter after each processed position
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepCountResult {
    pub rep_count: u32,
    pub rep_completed: bool,
    pub detected_positions: Vec<Position>,
    pub missing_positions: Vec<Position>,
    pub last_position: Option<Position>,
    /// Set when the completed rep exceeded `max_rep_duration_ms`
    pub duration_exceeded: bool,
}
