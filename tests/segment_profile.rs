// Integration tests for trapezoid segment building

#[cfg(test)]
mod tests {
    use krusty_aux::motion::{Move, calc_move_time};

    const CASES: [(f64, f64, f64, f64); 8] = [
        (0.0, 10.0, 5.0, 100.0),
        (0.0, 0.1, 5.0, 100.0),
        (3.0, -2.0, 20.0, 50.0),
        (0.0, 1e-4, 5.0, 1000.0),
        (-5.0, 5.0, 1.0, 0.5),
        (0.0, 250.0, 80.0, 3000.0),
        (1.0, 2.0, 5.0, 0.0),
        (10.0, 0.0, 7.5, 0.0),
    ];

    #[test]
    fn test_velocity_integral_equals_distance() {
        for (start, end, speed, accel) in CASES {
            let mv = Move::new(start, end, speed, accel);
            let ramps = mv.accel_t * mv.cruise_v;
            let integral = ramps + mv.cruise_v * mv.cruise_t;
            let dist = (end - start).abs();
            assert!(
                (integral - dist).abs() < 1e-9 * dist.max(1.0),
                "{} -> {} at {}/{}: integral {} != {}",
                start,
                end,
                speed,
                accel,
                integral,
                dist
            );
            assert!((mv.position_at(mv.total_t) - end).abs() < 1e-9 * dist.max(1.0));
            assert!(mv.cruise_v <= speed + 1e-12);
        }
    }

    #[test]
    fn test_zero_length_move_has_no_duration() {
        for pos in [0.0, 12.5, -3.0] {
            let mv = Move::new(pos, pos, 5.0, 100.0);
            assert_eq!(mv.total_t, 0.0);
            assert!(mv.is_empty());
        }
    }

    #[test]
    fn test_profile_is_symmetric() {
        let mv = Move::new(0.0, 0.5, 10.0, 100.0);
        assert_eq!(mv.accel_t, mv.decel_t);
        assert!(mv.cruise_t >= 0.0);
        let half = mv.total_t / 2.0;
        assert!((mv.position_at(half) - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_calc_move_time_direction() {
        let (axis_r, _, cruise_t, cruise_v) = calc_move_time(-4.0, 2.0, 0.0);
        assert_eq!(axis_r, -1.0);
        assert_eq!(cruise_t, 2.0);
        assert_eq!(cruise_v, 2.0);
    }
}
