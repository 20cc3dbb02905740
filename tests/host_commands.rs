// Integration tests for console commands routed through the host

#[cfg(test)]
mod tests {
    use krusty_aux::config::{Config, ServoFlapConfig, StepperConfig, StepperFlapConfig};
    use krusty_aux::flap::CalibrationState;
    use krusty_aux::hardware::ShutdownSignal;
    use krusty_aux::host::HostEvent;
    use krusty_aux::simulator::SimRig;
    use krusty_aux::HostError;
    use tokio::sync::{mpsc, oneshot};
    use tokio::task::LocalSet;

    fn config() -> Config {
        let mut config = Config::default();
        config.steppers.insert("spool".to_string(), StepperConfig::default());
        config.flaps.insert(
            "fan".to_string(),
            ServoFlapConfig {
                is_print_fan: true,
                ..ServoFlapConfig::default()
            },
        );
        config
            .stepper_flaps
            .insert("vent".to_string(), StepperFlapConfig::default());
        config
    }

    fn rig() -> SimRig {
        let mut rig = SimRig::build(&config(), ShutdownSignal::new());
        rig.host.connect();
        rig
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-12
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_moves_flap_to_start_value() {
        let rig = rig();
        let fan = rig.host.flap("fan").unwrap();
        assert_eq!(fan.width(), 0.001);
        assert_eq!(rig.servos["fan"].log().commands.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_print_fan_commands() {
        let mut rig = rig();
        rig.host.execute("M106 S127.5").await.unwrap();
        assert!(close(rig.host.flap("fan").unwrap().width(), 0.0015));

        rig.host.execute("M107").await.unwrap();
        assert_eq!(rig.host.flap("fan").unwrap().width(), 0.001);

        rig.host.execute("M106").await.unwrap();
        assert_eq!(rig.host.flap("fan").unwrap().width(), 0.002);
        assert_eq!(rig.host.flap("fan").unwrap().status().value, 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flap_set_routes_by_flap_kind() {
        let mut rig = rig();
        rig.host.execute("FLAP_SET FLAP=vent VALUE=1").await.unwrap();
        let vent = rig.host.stepper_flap("vent").unwrap().status();
        assert_eq!(vent.value, 1.0);
        assert_eq!(vent.position, 1.0);

        // Fan style values are on the 0..255 scale.
        rig.host.execute("FLAP_SET FLAP=vent VALUE=51").await.unwrap();
        let vent = rig.host.stepper_flap("vent").unwrap().status();
        assert!(close(vent.value, 0.2));

        rig.host.execute("FLAP_SET FLAP=fan WIDTH=0").await.unwrap();
        let fan = rig.host.flap("fan").unwrap();
        assert_eq!(fan.width(), 0.0);
        assert_eq!(rig.servos["fan"].log().power_offs, 1);

        let err = rig.host.execute("FLAP_SET FLAP=nope VALUE=0.5").await.unwrap_err();
        assert!(matches!(err, HostError::Command(_)));
        assert!(err.to_string().contains("Unknown flap 'nope'"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_flap_set_width_checks_absolute_range() {
        let mut rig = rig();
        let err = rig.host.execute("FLAP_SET FLAP=fan WIDTH=0.00001").await.unwrap_err();
        assert!(err.to_string().contains("WIDTH"));
        rig.host.execute("FLAP_SET FLAP=fan WIDTH=0.0012").await.unwrap();
        assert_eq!(rig.host.flap("fan").unwrap().width(), 0.0012);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flap_debug_reports_state() {
        let mut rig = rig();
        let text = rig.host.execute("FLAP_DEBUG FLAP=fan").await.unwrap();
        assert!(text.starts_with("Current feedback reading: none"), "{}", text);
        assert!(text.contains("min pulse width: 0.001"));
        assert!(text.ends_with("servo state machine: NotTuned"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_flap_autotune_command() {
        let mut rig = rig();
        let text = rig
            .host
            .execute("FLAP_AUTOTUNE FLAP=fan MIN_PW=0.0009 MAX_PW=0.0021 SPRINGBACK=0.00005")
            .await
            .unwrap();
        assert_eq!(text, "Autotune of fan started");
        let fan = rig.host.flap("fan").unwrap();
        assert!(fan.is_calibrating());
        assert_eq!(fan.tuning_state(), CalibrationState::TuningStart);
        let params = fan.session().unwrap().params();
        assert!(close(params.start_width, 0.0015));
        assert_eq!(params.spring_back, 0.00005);

        assert!(rig.host.execute("FLAP_AUTOTUNE FLAP=fan MIN_PW=0.002 MAX_PW=0.001").await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_independent_stepper_command() {
        let mut rig = rig();
        rig.host
            .execute("INDEPENDENT_STEPPER STEPPER=spool ENABLE=1 MOVE=10 SPEED=2")
            .await
            .unwrap();
        let spool = rig.host.stepper("spool").unwrap();
        assert_eq!(spool.commanded_position(), 10.0);
        assert!(spool.status().energized);
        assert_eq!(rig.pulses["spool"].log().enable_events.len(), 1);

        rig.host
            .execute("INDEPENDENT_STEPPER STEPPER=spool SET_POSITION=0")
            .await
            .unwrap();
        let spool = rig.host.stepper("spool").unwrap();
        assert_eq!(spool.commanded_position(), 0.0);
        // The 10mm move at 2mm/s had to finish first.
        assert!(rig.host.scheduler().clock().now() >= spool.next_cmd_time() - 1e-6);
        assert!(spool.next_cmd_time() > 5.0);

        let err = rig.host.execute("INDEPENDENT_STEPPER STEPPER=spool ENABLE=2").await.unwrap_err();
        assert!(matches!(err, HostError::Command(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deferred_width_applies_when_lookahead_commits() {
        let mut rig = rig();
        rig.host.scheduler_mut().queue_move(1.0);
        rig.host.execute("SET_FAN_SPEED FAN=fan SPEED=255").await.unwrap();
        assert_eq!(rig.host.flap("fan").unwrap().width(), 0.001);

        tokio::time::sleep(tokio::time::Duration::from_millis(300)).await;
        rig.host.flush();
        let fan = rig.host.flap("fan").unwrap();
        assert_eq!(fan.width(), 0.002);
        let (time, width) = *rig.servos["fan"].log().commands.last().unwrap();
        assert_eq!(width, 0.002);
        assert!(time >= 1.25);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_rejects_commands() {
        let mut rig = rig();
        rig.host.shutdown_signal().invoke_shutdown("test shutdown");
        let err = rig.host.execute("M107").await.unwrap_err();
        assert!(matches!(err, HostError::Shutdown(_)));
        assert!(rig.host.move_stepper("spool", 1.0, None, None).is_err());
        // Diagnostics stay available.
        assert!(rig.host.execute("FLAP_DEBUG FLAP=fan").await.is_ok());
        assert_eq!(rig.host.status().shutdown, Some("test shutdown".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_loop_answers_commands() {
        let rig = SimRig::build(&config(), ShutdownSignal::new());
        let (tx, rx) = mpsc::channel::<HostEvent>(4);
        let local = LocalSet::new();
        let client = local.spawn_local(async move {
            let mut responses = Vec::new();
            for line in ["M106 S255", "FLAP_SET FLAP=missing VALUE=1"] {
                let (respond_to, response) = oneshot::channel();
                tx.send(HostEvent::Command {
                    line: line.to_string(),
                    respond_to,
                })
                .await
                .unwrap();
                responses.push(response.await.unwrap());
            }
            tx.send(HostEvent::Stop).await.unwrap();
            responses
        });
        let status = local.run_until(rig.run(rx)).await;
        let responses = local.run_until(client).await.unwrap();

        assert_eq!(responses[0], Ok(String::new()));
        assert!(responses[1].is_err());
        assert_eq!(status.flaps[0].width, 0.002);
        assert_eq!(status.shutdown, None);
        assert_eq!(status.steppers.len(), 1);
        assert_eq!(status.stepper_flaps.len(), 1);
    }
}
