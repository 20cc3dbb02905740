// Integration tests for loading and saving configuration files

#[cfg(test)]
mod tests {
    use krusty_aux::config::{Config, ServoFlapConfig};
    use krusty_aux::{ConfigError, load_config};
    use std::io::Write;
    use tempfile::NamedTempFile;
    use tokio_test::{assert_err, assert_ok};

    const AUX_TOML: &str = r#"
[host]
report_time = 0.2
range_check_count = 6

[steppers.spool]
velocity = 12.0
accel = 250.0

[flaps.part_cooling]
is_print_fan = true
power_off_time = 5.0
validate_upper_max = 0.0022
validate_lower_min = 0.0008

[stepper_flaps.vent]
invert = true
start_value = 0.25
"#;

    fn write_temp(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_config_file() {
        let file = write_temp(AUX_TOML);
        let config = assert_ok!(load_config(file.path()));
        assert_eq!(config.host.report_time, 0.2);
        assert_eq!(config.host.range_check_count, 6);
        assert_eq!(config.steppers["spool"].accel, 250.0);
        let flap = &config.flaps["part_cooling"];
        assert!(flap.is_print_fan);
        assert_eq!(flap.validate_upper_max, Some(0.0022));
        assert_eq!(flap.validate_range_min, None);
        assert_eq!(flap.tuning_step_time, 0.5);
        assert_eq!(config.stepper_flaps["vent"].start_value, 0.25);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_config(dir.path().join("absent.toml"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let file = write_temp("[steppers.spool]\nvelocity = -1.0\n");
        let err = assert_err!(load_config(file.path()));
        assert!(matches!(err, ConfigError::Invalid { key: "velocity", .. }));
        assert!(err.to_string().contains("steppers.spool"));

        let file = write_temp("[flaps.a]\nis_print_fan = true\n[flaps.b]\nis_print_fan = true\n");
        assert!(matches!(
            load_config(file.path()),
            Err(ConfigError::Invalid { key: "is_print_fan", .. })
        ));

        let file = write_temp("[host\nreport_time = 1");
        assert!(matches!(load_config(file.path()), Err(ConfigError::Toml(_))));
    }

    #[test]
    fn test_save_and_reload() {
        let mut config = Config::default();
        config.flaps.insert(
            "vent".to_string(),
            ServoFlapConfig {
                tuning_start_width: Some(0.0014),
                validate_range_min: Some(0.0004),
                ..ServoFlapConfig::default()
            },
        );
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aux.toml");
        config.save_config(&path).unwrap();

        let reloaded = load_config(&path).unwrap();
        let vent = &reloaded.flaps["vent"];
        assert_eq!(vent.tuning_start_width, Some(0.0014));
        assert_eq!(vent.validate_range_min, Some(0.0004));
        assert_eq!(vent.validate_range_max, None);
        assert_eq!(vent.maximum_pulse_width, 0.002);
    }
}
