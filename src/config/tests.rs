use super::settings::{PartialServerSettings, PartialSettings, Settings};
use super::load_config;
use serial_test::serial;
use std::env;
use std::fs;
use tempfile::TempDir;

/// Run `f` with the working directory switched to a fresh temp dir.
fn in_temp_dir<F: FnOnce()>(f: F) {
    let tmp = TempDir::new().expect("create tempdir");
    let orig = env::current_dir().expect("current_dir");
    env::set_current_dir(tmp.path()).expect("set current dir");
    f();
    env::set_current_dir(orig).expect("restore cwd");
}

#[test]
fn test_default_settings() {
    let settings = Settings::default();
    assert_eq!(settings.server.host, "0.0.0.0");
    assert_eq!(settings.server.nt4_port, 5810);
    assert_eq!(settings.server.nt3_port, 1735);
    assert_eq!(settings.server.identity, "ntables");
    assert_eq!(settings.session.outbound_queue_capacity, 1024);
    assert_eq!(settings.session.handshake_timeout_ms, 5000);
    assert_eq!(settings.client.timesync_interval_ms, 3000);
    assert_eq!(settings.log.level, "info");
    assert_eq!(settings.server.nt4_addr(), "0.0.0.0:5810");
}

#[test]
fn test_partial_merge_keeps_unset_defaults() {
    let partial = PartialSettings {
        server: Some(PartialServerSettings {
            nt4_port: Some(6000),
            ..Default::default()
        }),
        ..Default::default()
    };
    let merged = partial.merge(Settings::default());
    assert_eq!(merged.server.nt4_port, 6000);
    assert_eq!(merged.server.nt3_port, 1735);
    assert_eq!(merged.session, Settings::default().session);
}

#[test]
#[serial]
fn test_load_config_without_sources_is_default() {
    in_temp_dir(|| {
        let cfg = load_config().expect("load_config failed");
        assert_eq!(cfg, Settings::default());
    });
}

#[test]
#[serial]
fn test_load_config_from_file_overrides_defaults() {
    in_temp_dir(|| {
        fs::create_dir_all("config").expect("create config dir");
        let toml = r#"
            [server]
            host = "127.0.0.1"
            nt4_port = 5900
            identity = "bench"

            [session]
            outbound_queue_capacity = 8

            [log]
            level = "debug"
        "#;
        fs::write("config/default.toml", toml).expect("write config file");

        let cfg = load_config().expect("load_config failed");
        assert_eq!(cfg.server.host, "127.0.0.1");
        assert_eq!(cfg.server.nt4_port, 5900);
        assert_eq!(cfg.server.nt3_port, 1735);
        assert_eq!(cfg.server.identity, "bench");
        assert_eq!(cfg.session.outbound_queue_capacity, 8);
        assert_eq!(cfg.session.handshake_timeout_ms, 5000);
        assert_eq!(cfg.log.level, "debug");
    });
}

#[test]
#[serial]
fn test_environment_overrides_file() {
    in_temp_dir(|| {
        fs::create_dir_all("config").expect("create config dir");
        fs::write("config/default.toml", "[server]\nnt3_port = 1800\n").expect("write config");

        // SAFETY: serialized with every other test touching the environment.
        unsafe { env::set_var("NT_SERVER__NT3_PORT", "1900") };
        let cfg = load_config();
        unsafe { env::remove_var("NT_SERVER__NT3_PORT") };

        assert_eq!(cfg.expect("load_config failed").server.nt3_port, 1900);
    });
}
