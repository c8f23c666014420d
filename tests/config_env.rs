// Environment overrides, with and without a config file
#[cfg(test)]
mod test {
    use std::{io::Write, sync::Mutex, time::Duration};

    use kiln::config::{KilnConfigValidator, load_config_from_env, load_config_sync};
    use tempfile::NamedTempFile;

    // Tests in this binary share the process environment.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_env_overrides_file_values() {
        let _env = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let mut file = NamedTempFile::with_suffix(".toml").unwrap();
        write!(
            file,
            r#"
[registry]
active_poll_interval = "50ms"
active_wait_timeout = "10s"
"#
        )
        .unwrap();

        // SAFETY: environment access in this binary is serialized by ENV_LOCK.
        unsafe {
            std::env::set_var("KILN__REGISTRY__ACTIVE_WAIT_TIMEOUT", "2s");
            std::env::set_var("KILN__REGISTRY__STRICT_ADMIN_THREAD", "false");
        }

        let config = load_config_sync(file.path().to_str().unwrap());

        unsafe {
            std::env::remove_var("KILN__REGISTRY__ACTIVE_WAIT_TIMEOUT");
            std::env::remove_var("KILN__REGISTRY__STRICT_ADMIN_THREAD");
        }

        let config = config.unwrap();
        assert_eq!(
            config.registry.active_poll_interval(),
            Duration::from_millis(50)
        );
        assert_eq!(config.registry.active_wait_timeout(), Duration::from_secs(2));
        assert!(!config.registry.strict_admin_thread);
        assert!(KilnConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn test_env_only_config_parses_filter_list() {
        let _env = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());

        // SAFETY: environment access in this binary is serialized by ENV_LOCK.
        unsafe {
            std::env::set_var("KILN__FILTERS__BUILTIN", "gzip esi");
            std::env::set_var("KILN__REGISTRY__ACTIVE_POLL_INTERVAL", "20ms");
        }

        let config = load_config_from_env();

        unsafe {
            std::env::remove_var("KILN__FILTERS__BUILTIN");
            std::env::remove_var("KILN__REGISTRY__ACTIVE_POLL_INTERVAL");
        }

        let config = config.unwrap();
        assert_eq!(config.filters.builtin, vec!["gzip", "esi"]);
        assert_eq!(
            config.registry.active_poll_interval(),
            Duration::from_millis(20)
        );
        assert_eq!(config.registry.active_wait_timeout, "30s");
        assert!(KilnConfigValidator::validate(&config).is_ok());
    }
}
