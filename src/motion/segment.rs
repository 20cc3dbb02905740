// src/motion/segment.rs - Trapezoidal segment builder for single-axis actuator moves

/// A single-axis move with its symmetric accel/cruise/decel time profile.
///
/// The profile is fully determined at construction. A move with
/// `total_t == 0` has nothing to schedule and is dropped by the queue.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Move {
    pub start_pos: f64,
    pub end_pos: f64,
    pub speed: f64,
    pub accel: f64,
    /// Direction of travel, `1.0` or `-1.0`.
    pub axis_r: f64,
    pub accel_t: f64,
    pub cruise_t: f64,
    pub decel_t: f64,
    pub cruise_v: f64,
    pub total_t: f64,
}

/// Computes `(axis_r, accel_t, cruise_t, cruise_v)` for a move of `dist`.
///
/// With `accel == 0` the move is constant velocity. When the distance is too
/// short to reach `speed`, the cruise velocity is lowered so the move is a
/// triangle profile.
pub fn calc_move_time(dist: f64, speed: f64, accel: f64) -> (f64, f64, f64, f64) {
    let (axis_r, dist) = if dist < 0.0 { (-1.0, -dist) } else { (1.0, dist) };
    if accel <= 0.0 || dist == 0.0 || speed <= 0.0 {
        let cruise_t = if speed > 0.0 { dist / speed } else { 0.0 };
        return (axis_r, 0.0, cruise_t, speed.max(0.0));
    }
    let mut cruise_v = speed;
    let max_cruise_v2 = dist * accel;
    if max_cruise_v2 < cruise_v * cruise_v {
        cruise_v = max_cruise_v2.sqrt();
    }
    let accel_t = cruise_v / accel;
    let accel_decel_d = accel_t * cruise_v;
    let cruise_t = ((dist - accel_decel_d) / cruise_v).max(0.0);
    (axis_r, accel_t, cruise_t, cruise_v)
}

impl Move {
    pub fn new(start_pos: f64, end_pos: f64, speed: f64, accel: f64) -> Self {
        let (axis_r, accel_t, cruise_t, cruise_v) = calc_move_time(end_pos - start_pos, speed, accel);
        let accel_t = accel_t.max(0.0);
        Self {
            start_pos,
            end_pos,
            speed,
            accel,
            axis_r,
            accel_t,
            cruise_t,
            decel_t: accel_t,
            cruise_v,
            total_t: accel_t + cruise_t + accel_t,
        }
    }

    pub fn distance(&self) -> f64 {
        (self.end_pos - self.start_pos).abs()
    }

    pub fn is_empty(&self) -> bool {
        self.total_t <= 0.0
    }

    /// Distance travelled `t` seconds into the move, clamped to the move.
    pub fn distance_at(&self, t: f64) -> f64 {
        let t = t.clamp(0.0, self.total_t);
        let accel = if self.accel_t > 0.0 { self.cruise_v / self.accel_t } else { 0.0 };
        if t <= self.accel_t {
            return 0.5 * accel * t * t;
        }
        let accel_d = 0.5 * self.cruise_v * self.accel_t;
        let after_accel = t - self.accel_t;
        if after_accel <= self.cruise_t {
            return accel_d + self.cruise_v * after_accel;
        }
        let decel = after_accel - self.cruise_t;
        accel_d + self.cruise_v * self.cruise_t + self.cruise_v * decel - 0.5 * accel * decel * decel
    }

    /// Position `t` seconds into the move.
    pub fn position_at(&self, t: f64) -> f64 {
        self.start_pos + self.axis_r * self.distance_at(t)
    }
}
