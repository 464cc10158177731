use super::*;

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.server.port = Some(4000);
    raw.logging.level = Some("info".to_string());

    let overrides = ServeOverrides {
        server_port: Some(4321),
        log_level: Some("debug".to_string()),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.server.addr.port(), 4321);
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
}

#[test]
fn defaults_match_cache_config() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.store.backend, StoreBackend::Memory);
    assert_eq!(settings.store.port, 6379);
    assert_eq!(settings.store.key_prefix, "storefront:");
    assert!(settings.admin.token.is_none());
    assert!(settings.origin.base_url.is_none());
    assert_eq!(
        CacheConfig::from(&settings.cache),
        CacheConfig::default()
    );
}

#[test]
fn cache_section_is_resolved() {
    let mut raw = RawSettings::default();
    raw.cache.default_ttl_seconds = Some(120);
    raw.cache.lock_max_attempts = Some(3);
    raw.cache.l1_capacity = Some(16);
    raw.cache.write_behind_flush_ms = Some(250);

    let settings = Settings::from_raw(raw).expect("valid settings");
    let cache = CacheConfig::from(&settings.cache);

    assert_eq!(cache.default_ttl(), Duration::from_secs(120));
    assert_eq!(cache.lock_max_attempts(), 3);
    assert_eq!(cache.l1_capacity_non_zero().get(), 16);
    assert_eq!(cache.write_behind_flush_interval(), Duration::from_millis(250));
}

#[test]
fn zero_values_are_rejected() {
    let mut raw = RawSettings::default();
    raw.cache.warmup_concurrency = Some(0);

    let error = Settings::from_raw(raw).unwrap_err();
    assert!(matches!(
        error,
        LoadError::Invalid {
            key: "cache.warmup_concurrency",
            ..
        }
    ));
}

#[test]
fn inverted_lock_retry_window_is_rejected() {
    let mut raw = RawSettings::default();
    raw.cache.lock_retry_min_ms = Some(500);
    raw.cache.lock_retry_max_ms = Some(100);

    let error = Settings::from_raw(raw).unwrap_err();
    assert!(matches!(
        error,
        LoadError::Invalid {
            key: "cache.lock_retry_min_ms",
            ..
        }
    ));
}

#[test]
fn blank_secrets_are_treated_as_unset() {
    let mut raw = RawSettings::default();
    raw.admin.token = Some("   ".to_string());
    raw.store.password = Some(String::new());

    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(settings.admin.token.is_none());
    assert!(settings.store.password.is_none());
}

#[test]
fn secrets_are_redacted_in_debug_output() {
    let mut raw = RawSettings::default();
    raw.admin.token = Some("s3cret".to_string());
    raw.store.password = Some("hunter2".to_string());

    let settings = Settings::from_raw(raw).expect("valid settings");
    let rendered = format!("{settings:?}");

    assert!(!rendered.contains("s3cret"));
    assert!(!rendered.contains("hunter2"));
    assert!(rendered.contains("<redacted>"));
}

#[test]
fn invalid_origin_url_is_rejected() {
    let mut raw = RawSettings::default();
    raw.origin.base_url = Some("not a url".to_string());

    let error = Settings::from_raw(raw).unwrap_err();
    assert!(matches!(
        error,
        LoadError::Invalid {
            key: "origin.base_url",
            ..
        }
    ));
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    let overrides = ServeOverrides {
        log_json: Some(true),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn default_to_serve_command() {
    let args = CliArgs::parse_from(["storefront-cache"]);
    let command = args
        .command
        .unwrap_or(Command::Serve(Box::<ServeArgs>::default()));
    assert!(matches!(command, Command::Serve(_)));
}

#[test]
fn parse_invalidate_arguments() {
    let args = CliArgs::parse_from([
        "storefront-cache",
        "invalidate",
        "tag",
        "products",
        "--key",
        "page:/",
        "--store-backend",
        "redis",
    ]);

    match args.command.expect("invalidate command") {
        Command::Invalidate(invalidate) => {
            assert_eq!(invalidate.kind, InvalidateKindArg::Tag);
            assert_eq!(invalidate.target.as_deref(), Some("products"));
            assert_eq!(invalidate.keys, vec!["page:/".to_string()]);
            assert!(invalidate.tags.is_empty());
            assert_eq!(invalidate.store.store_backend, Some(StoreBackend::Redis));
            assert_eq!(
                InvalidationKind::from(invalidate.kind),
                InvalidationKind::Tag
            );
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn store_overrides_apply_to_maintenance_commands() {
    let mut raw = RawSettings::default();
    raw.apply_store_overrides(&StoreOverrides {
        store_host: Some("cache.internal".to_string()),
        store_db: Some(2),
        ..Default::default()
    });

    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.store.host, "cache.internal");
    assert_eq!(settings.store.db, 2);
}

#[test]
fn parse_serve_arguments() {
    let args = CliArgs::parse_from([
        "storefront-cache",
        "serve",
        "--server-host",
        "0.0.0.0",
        "--origin-base-url",
        "https://shop.example",
    ]);

    match args.command.expect("serve command") {
        Command::Serve(serve) => {
            assert_eq!(serve.overrides.server_host.as_deref(), Some("0.0.0.0"));
            assert_eq!(
                serve.overrides.origin_base_url.as_deref(),
                Some("https://shop.example")
            );
        }
        _ => panic!("wrong command parsed"),
    }
}
