use std::env;
use std::sync::{Mutex, OnceLock};

use cswflow_cli::commands::{migrate, seed, smoke};
use serde_json::Value;

#[test]
fn migrate_returns_success_with_valid_env() {
    with_env(&[("CSWFLOW_DATABASE_URL", "sqlite::memory:")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
    });
}

#[test]
fn migrate_returns_config_failure_with_invalid_database_url() {
    with_env(&[("CSWFLOW_DATABASE_URL", "postgres://nope/nope")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn seed_reports_loaded_fixture_counts() {
    with_env(&[("CSWFLOW_DATABASE_URL", "sqlite::memory:")], || {
        let result = seed::run();
        assert_eq!(result.exit_code, 0, "expected seed success");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "seed");
        assert_eq!(payload["status"], "ok");

        let message = payload["message"].as_str().unwrap_or("");
        assert!(message.contains("2 division flows"));
        assert!(message.contains("3 requests"));
    });
}

#[test]
fn smoke_returns_pass_report_with_valid_env() {
    with_env(&[("CSWFLOW_DATABASE_URL", "sqlite::memory:")], || {
        let result = smoke::run();
        assert_eq!(result.exit_code, 0, "expected successful smoke report");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "smoke");
        assert_eq!(payload["status"], "pass");

        let checks = payload["checks"].as_array().expect("checks array");
        assert!(checks
            .iter()
            .any(|check| check["name"] == "approval_chain_walk" && check["status"] == "pass"));
        assert!(checks
            .iter()
            .any(|check| check["name"] == "ledger_verification" && check["status"] == "pass"));
    });
}

#[test]
fn smoke_returns_failure_when_config_invalid() {
    with_env(&[("CSWFLOW_DATABASE_URL", "postgres://nope/nope")], || {
        let result = smoke::run();
        assert_eq!(result.exit_code, 1, "expected smoke failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "smoke");
        assert_eq!(payload["status"], "fail");
    });
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "CSWFLOW_CONFIG",
        "CSWFLOW_DATABASE_URL",
        "CSWFLOW_DATABASE_MAX_CONNECTIONS",
        "CSWFLOW_DATABASE_TIMEOUT_SECS",
        "CSWFLOW_SERVER_BIND_ADDRESS",
        "CSWFLOW_SERVER_PORT",
        "CSWFLOW_SERVER_HEALTH_CHECK_PORT",
        "CSWFLOW_SERVER_GRACEFUL_SHUTDOWN_SECS",
        "CSWFLOW_GATEWAY_SECRET",
        "CSWFLOW_LIMITS_SITUATION_MAX_WORDS",
        "CSWFLOW_LIMITS_INFORMATION_MAX_WORDS",
        "CSWFLOW_LIMITS_SOLUTION_MAX_WORDS",
        "CSWFLOW_LOGGING_LEVEL",
        "CSWFLOW_LOGGING_FORMAT",
        "CSWFLOW_LOG_LEVEL",
        "CSWFLOW_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
