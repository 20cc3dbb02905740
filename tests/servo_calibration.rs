// Integration tests for servo flap autotune, power-off and shutdown escalation

#[cfg(test)]
mod tests {
    use krusty_aux::CalibrationError;
    use krusty_aux::config::{Config, ServoFlapConfig};
    use krusty_aux::flap::{AutotuneOverrides, CalibrationState, HINT_SERVO_FLAP, ServoFlap};
    use krusty_aux::hardware::ShutdownSignal;
    use krusty_aux::host::HostEvent;
    use krusty_aux::motion::PrimaryScheduler;
    use krusty_aux::simulator::{SimClock, SimFlapMechanism, SimRig, SimScheduler, SimServo};
    use tokio::sync::mpsc;
    use tokio::task::LocalSet;

    const STEP: f64 = 0.000005;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-12
    }

    fn flap(config: ServoFlapConfig) -> (ServoFlap, SimServo) {
        let servo = SimServo::default();
        (ServoFlap::new("vent", config, Box::new(servo.clone())), servo)
    }

    /// Feeds noiseless end-stop feedback until the session ends.
    fn drive(
        flap: &mut ServoFlap,
        mechanism: &SimFlapMechanism,
        sched: &mut SimScheduler,
    ) -> Result<(), CalibrationError> {
        for k in 0..2_000 {
            let feedback = mechanism.level(flap.width());
            flap.handle_sample(feedback, 2.0 * k as f64, sched)?;
            if !flap.is_calibrating() {
                return Ok(());
            }
        }
        panic!("autotune did not terminate");
    }

    fn quiet_mechanism() -> SimFlapMechanism {
        SimFlapMechanism {
            noise: 0.0,
            ..SimFlapMechanism::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_autotune_discovers_end_stops() {
        let mut sched = SimScheduler::new(SimClock::new());
        let (mut flap, servo) = flap(ServoFlapConfig::default());
        flap.start_autotune(AutotuneOverrides::default()).unwrap();
        assert_eq!(flap.tuning_state(), CalibrationState::TuningStart);

        drive(&mut flap, &quiet_mechanism(), &mut sched).unwrap();

        let status = flap.status();
        assert_eq!(status.tuning_state, CalibrationState::Done);
        assert!((status.max_width - 0.0018).abs() <= STEP + 1e-12, "{:?}", status);
        assert!((status.min_width - 0.0012).abs() <= STEP + 1e-12, "{:?}", status);
        // Armed at the start value, which is the closed end of the new range.
        assert_eq!(status.width, status.min_width);

        let log = servo.log();
        assert!(log.commands.len() > 100);
        for pair in log.commands.windows(2) {
            assert!(pair[1].0 - pair[0].0 >= 0.1 - 1e-9);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_samples_wait_for_settle_time() {
        let mut sched = SimScheduler::new(SimClock::new());
        let (mut flap, _servo) = flap(ServoFlapConfig::default());
        flap.start_autotune(AutotuneOverrides::default()).unwrap();

        flap.handle_sample(0.0, 0.0, &mut sched).unwrap();
        assert!(close(flap.width(), 0.0015));
        assert!(!flap.move_done(1.0));

        // Still settling after the move to the start width.
        flap.handle_sample(0.0, 1.0, &mut sched).unwrap();
        assert!(close(flap.width(), 0.0015));

        flap.handle_sample(0.0, 1.3, &mut sched).unwrap();
        assert!(close(flap.width(), 0.0015 + STEP));
        assert_eq!(flap.tuning_state(), CalibrationState::TuningUpper);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deferred_width_blocks_decisions() {
        let mut sched = SimScheduler::new(SimClock::new());
        let (mut flap, _servo) = flap(ServoFlapConfig::default());
        flap.start_autotune(AutotuneOverrides::default()).unwrap();

        sched.queue_move(1.0);
        flap.handle_sample(0.0, 0.0, &mut sched).unwrap();
        assert_eq!(flap.width(), 0.0);
        assert!(!flap.move_done(100.0));
        flap.handle_sample(0.0, 100.0, &mut sched).unwrap();
        let current = flap.session().map_or(0.0, |s| s.current_width());
        assert!(close(current, 0.0015));

        sched.flush_lookahead();
        for fired in sched.take_fired() {
            flap.dispatch(&fired.ticket.command, fired.print_time);
        }
        assert!(close(flap.width(), 0.0015));
        assert!(!flap.move_done(2.0));
        assert!(flap.move_done(2.25));
    }

    #[tokio::test(start_paused = true)]
    async fn test_validation_failure_reports_bound() {
        let mut sched = SimScheduler::new(SimClock::new());
        let config = ServoFlapConfig {
            validate_range_min: Some(0.001),
            ..ServoFlapConfig::default()
        };
        let (mut flap, _servo) = flap(config);
        flap.start_autotune(AutotuneOverrides::default()).unwrap();

        let err = drive(&mut flap, &quiet_mechanism(), &mut sched).unwrap_err();
        assert!(matches!(err, CalibrationError::Validation { .. }));
        assert!(err.to_string().contains("validate_range_min"));
        assert_eq!(flap.tuning_state(), CalibrationState::Error);
        assert!(!flap.is_calibrating());

        // The failure is reported once; later samples are ignored.
        flap.handle_sample(0.9, 10_000.0, &mut sched).unwrap();
        assert_eq!(flap.tuning_state(), CalibrationState::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn test_upper_limit_not_found() {
        let mut sched = SimScheduler::new(SimClock::new());
        let (mut flap, _servo) = flap(ServoFlapConfig::default());
        flap.start_autotune(AutotuneOverrides::default()).unwrap();
        let mechanism = SimFlapMechanism {
            upper_stop: 1.0,
            ..quiet_mechanism()
        };
        let err = drive(&mut flap, &mechanism, &mut sched).unwrap_err();
        assert_eq!(
            err,
            CalibrationError::UpperLimitNotFound {
                flap: "vent".to_string()
            }
        );
        assert!(flap.width() <= 0.0025);
    }

    #[tokio::test(start_paused = true)]
    async fn test_autotune_overrides() {
        let (mut flap, _servo) = flap(ServoFlapConfig::default());
        let overrides = AutotuneOverrides {
            min_pw: Some(0.0008),
            max_pw: Some(0.0022),
            ..AutotuneOverrides::default()
        };
        flap.start_autotune(overrides).unwrap();
        let params = *flap.session().unwrap().params();
        assert!(close(params.start_width, 0.0015));

        let bad = AutotuneOverrides {
            min_pw: Some(0.002),
            max_pw: Some(0.001),
            ..AutotuneOverrides::default()
        };
        assert!(flap.start_autotune(bad).is_err());

        let outside = AutotuneOverrides {
            start_pw: Some(0.01),
            ..AutotuneOverrides::default()
        };
        assert!(flap.start_autotune(outside).is_err());
        // A rejected request leaves the previous session in place.
        let params = *flap.session().unwrap().params();
        assert!(close(params.start_width, 0.0015));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_flap_powers_off_once() {
        let mut sched = SimScheduler::new(SimClock::new());
        let config = ServoFlapConfig {
            power_off_time: 2.0,
            ..ServoFlapConfig::default()
        };
        let (mut flap, servo) = flap(config);

        flap.set_value(0.5, &mut sched);
        assert!(close(flap.width(), 0.0015));
        assert_eq!(flap.state().power_off_deadline, Some(2.25));

        flap.handle_sample(0.02, 2.0, &mut sched).unwrap();
        assert_eq!(servo.log().power_offs, 0);

        flap.handle_sample(0.02, 2.3, &mut sched).unwrap();
        assert_eq!(servo.log().power_offs, 1);
        assert_eq!(flap.width(), 0.0);
        assert_eq!(flap.status().value, 0.0);
        assert!(!flap.status().powered);

        for t in [2.4, 5.0, 50.0] {
            flap.handle_sample(0.02, t, &mut sched).unwrap();
        }
        assert_eq!(servo.log().power_offs, 1);

        // Commanding the same value again re-arms the deadline.
        flap.set_value(0.5, &mut sched);
        assert!(close(flap.width(), 0.0015));
        assert!(flap.state().power_off_deadline.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_at_sp_inverts_opening() {
        let mut sched = SimScheduler::new(SimClock::new());
        let config = ServoFlapConfig {
            open_at_sp: true,
            ..ServoFlapConfig::default()
        };
        let (mut flap, _servo) = flap(config);
        flap.set_value(1.0, &mut sched);
        assert_eq!(flap.width(), 0.001);
        flap.set_value(0.0, &mut sched);
        assert_eq!(flap.width(), 0.002);
        assert!(flap.set_width(0.01, &mut sched).is_err());
        flap.set_width(0.0, &mut sched).unwrap();
        assert_eq!(flap.width(), 0.0);
        assert!(sched.last_move_time() >= 0.25);
    }

    fn rig_config(vent: ServoFlapConfig) -> Config {
        let mut config = Config::default();
        config.flaps.insert("vent".to_string(), vent);
        config
    }

    /// Runs the rig until it stops itself or `limit` seconds have passed.
    async fn run_rig(rig: SimRig, limit: f64) -> krusty_aux::HostStatus {
        let local = LocalSet::new();
        let (tx, rx) = mpsc::channel::<HostEvent>(4);
        local.spawn_local(async move {
            tokio::time::sleep(tokio::time::Duration::from_secs_f64(limit)).await;
            let _ = tx.send(HostEvent::Stop).await;
        });
        local.run_until(rig.run(rx)).await
    }

    #[tokio::test(start_paused = true)]
    async fn test_rig_autotune_on_connect() {
        let config = rig_config(ServoFlapConfig {
            perform_range_tune: true,
            ..ServoFlapConfig::default()
        });
        let shutdown = ShutdownSignal::new();
        let rig = SimRig::build(&config, shutdown.clone());
        let status = run_rig(rig, 300.0).await;

        assert_eq!(status.shutdown, None);
        let vent = &status.flaps[0];
        assert_eq!(vent.tuning_state, CalibrationState::Done);
        assert!((vent.max_width - 0.0018).abs() <= STEP + 1e-12, "{:?}", vent);
        assert!((vent.min_width - 0.0012).abs() <= STEP + 1e-12, "{:?}", vent);
        assert_eq!(shutdown.invocations(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rig_validation_failure_shuts_down_once() {
        let config = rig_config(ServoFlapConfig {
            perform_range_tune: true,
            validate_upper_max: Some(0.0020),
            tuning_spring_back: 0.00005,
            ..ServoFlapConfig::default()
        });
        let shutdown = ShutdownSignal::new();
        let rig = SimRig::build_with(&config, shutdown.clone(), |_, _| SimFlapMechanism {
            lower_stop: 0.0011,
            upper_stop: 0.0021,
            ..SimFlapMechanism::default()
        });
        let status = run_rig(rig, 300.0).await;

        let message = status.shutdown.expect("rig should shut down");
        assert!(message.contains("validate_upper_max"), "{}", message);
        assert!(message.ends_with(HINT_SERVO_FLAP));
        assert_eq!(status.flaps[0].tuning_state, CalibrationState::Error);
        assert_eq!(shutdown.invocations(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rig_missing_end_stop_shuts_down() {
        let config = rig_config(ServoFlapConfig {
            perform_range_tune: true,
            ..ServoFlapConfig::default()
        });
        let shutdown = ShutdownSignal::new();
        let rig = SimRig::build_with(&config, shutdown.clone(), |_, _| SimFlapMechanism {
            upper_stop: 1.0,
            ..SimFlapMechanism::default()
        });
        let status = run_rig(rig, 600.0).await;

        let message = status.shutdown.expect("rig should shut down");
        assert!(message.contains("cannot find upper limit"), "{}", message);
        assert_eq!(shutdown.invocations(), 1);
    }
}
