// Turn direction: the predicate and arithmetic that let one control loop serve both ways

use serde::{Deserialize, Serialize};

/// Headings grow clockwise, so a right turn counts up and a left turn counts down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Left,
    Right,
}

impl Direction {
    /// True while `current` has not yet reached `target` in this direction
    pub fn should_continue(self, current: f64, target: f64) -> bool {
        match self {
            Direction::Right => current < target,
            Direction::Left => current > target,
        }
    }

    /// Move `a` by `b` degrees in this direction
    pub fn combine(self, a: f64, b: f64) -> f64 {
        match self {
            Direction::Right => a + b,
            Direction::Left => a - b,
        }
    }

    /// The point `fraction` of the remaining arc past `current`, toward `target`
    pub fn partial_target(self, current: f64, target: f64, fraction: f64) -> f64 {
        self.combine(current, (target - current).abs() * fraction)
    }

    /// Spin signs as (left wheel, right wheel); turning right drives the left wheel forward
    pub fn wheel_signs(self) -> (f64, f64) {
        match self {
            Direction::Right => (1.0, -1.0),
            Direction::Left => (-1.0, 1.0),
        }
    }
}
