//! Tests for the error system.

use roci_voice::error::unified::*;
use roci_voice::error::*;

#[test]
fn error_helper_mappings_are_stable_for_major_variants() {
    struct Case {
        error: VoiceError,
        expected_category: ErrorCategory,
        expected_fatal: bool,
        expected_recovery: RecoverySuggestion,
    }

    let io_error = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
    let serde_error = serde_json::from_str::<serde_json::Value>("{not-json}").unwrap_err();

    let cases = vec![
        Case {
            error: VoiceError::Authentication("bad-key".to_string()),
            expected_category: ErrorCategory::Authentication,
            expected_fatal: true,
            expected_recovery: RecoverySuggestion::CheckCredentials,
        },
        Case {
            error: VoiceError::Io(io_error),
            expected_category: ErrorCategory::Connectivity,
            expected_fatal: true,
            expected_recovery: RecoverySuggestion::CheckNetwork,
        },
        Case {
            error: VoiceError::Timeout(5000),
            expected_category: ErrorCategory::Timeout,
            expected_fatal: true,
            expected_recovery: RecoverySuggestion::CheckNetwork,
        },
        Case {
            error: VoiceError::service("server_error", "upstream failed"),
            expected_category: ErrorCategory::Service,
            expected_fatal: true,
            expected_recovery: RecoverySuggestion::RetryLater,
        },
        Case {
            error: VoiceError::service("invalid_api_key", "Incorrect API key"),
            expected_category: ErrorCategory::Authentication,
            expected_fatal: true,
            expected_recovery: RecoverySuggestion::CheckCredentials,
        },
        Case {
            error: VoiceError::PermissionDenied,
            expected_category: ErrorCategory::Device,
            expected_fatal: false,
            expected_recovery: RecoverySuggestion::GrantMicrophoneAccess,
        },
        Case {
            error: VoiceError::Serialization(serde_error),
            expected_category: ErrorCategory::Protocol,
            expected_fatal: false,
            expected_recovery: RecoverySuggestion::Ignore,
        },
        Case {
            error: VoiceError::Configuration("missing key".to_string()),
            expected_category: ErrorCategory::Configuration,
            expected_fatal: false,
            expected_recovery: RecoverySuggestion::CheckConfiguration,
        },
    ];

    for case in cases {
        assert_eq!(case.error.category(), case.expected_category, "{}", case.error);
        assert_eq!(case.error.is_connection_fatal(), case.expected_fatal, "{}", case.error);
        assert_eq!(
            case.error.recovery_suggestion(),
            case.expected_recovery,
            "{}",
            case.error
        );
    }
}

#[test]
fn display_formats_are_stable() {
    assert_eq!(VoiceError::Timeout(5000).to_string(), "Timeout after 5000ms");
    assert_eq!(
        VoiceError::service("rate_limit_exceeded", "slow down").to_string(),
        "Service error (rate_limit_exceeded): slow down"
    );
}

#[test]
fn peer_error_codes_are_classified() {
    for code in [
        "invalid_api_key",
        "authentication_error",
        "invalid_authentication",
        "unauthorized",
        "permission_denied",
    ] {
        assert_eq!(
            classify_server_error(Some(code), None),
            ErrorCategory::Authentication,
            "{code}"
        );
    }
    for code in ["insufficient_quota", "rate_limit_exceeded", "server_error", "invalid_value"] {
        assert_eq!(classify_server_error(Some(code), None), ErrorCategory::Service, "{code}");
    }
    assert_eq!(
        classify_server_error(None, Some("authentication_error")),
        ErrorCategory::Authentication
    );
    assert_eq!(classify_server_error(None, None), ErrorCategory::Service);
}

#[test]
fn handshake_statuses_are_classified() {
    assert_eq!(classify_http_status(401), ErrorCategory::Authentication);
    assert_eq!(classify_http_status(403), ErrorCategory::Authentication);
    assert_eq!(classify_http_status(503), ErrorCategory::Service);
    assert_eq!(classify_http_status(404), ErrorCategory::Connectivity);
}

#[test]
fn user_messages_distinguish_causes() {
    let auth = VoiceError::Authentication("handshake rejected".into()).user_message();
    let network = VoiceError::Connection("refused".into()).user_message();
    let service = VoiceError::service("server_error", "oops").user_message();
    assert!(auth.contains("API key"));
    assert!(network.contains("network"));
    assert!(service.contains("service reported an error"));
    assert_ne!(auth, network);
}
