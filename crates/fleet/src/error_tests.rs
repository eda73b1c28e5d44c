// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[yare::parameterized(
    engine = { FleetError::EngineUnavailable("boom".into()), ErrorCode::EngineUnavailable },
    none_found = { FleetError::NoCredentialsFound, ErrorCode::NoCredentialsFound },
    all_expired = { FleetError::AllCredentialsExpired { latest: "x".into() }, ErrorCode::AllCredentialsExpired },
    propagation = { FleetError::PropagationFailed { attempted: 2 }, ErrorCode::PropagationFailed },
    selection = { FleetError::InvalidSelection("9".into()), ErrorCode::InvalidSelection },
    not_running = { FleetError::SandboxNotRunning("mcl-a".into()), ErrorCode::SandboxNotRunning },
)]
fn code_matches_variant(err: FleetError, expected: ErrorCode) {
    assert_eq!(err.code(), expected);
}

#[test]
fn credential_outcomes_carry_reauth_hint() {
    assert!(FleetError::NoCredentialsFound.hint().is_some_and(|h| h.contains("re-authenticate")));
    let expired = FleetError::AllCredentialsExpired { latest: "EXPIRED 2.0h ago".into() };
    assert!(expired.hint().is_some_and(|h| h.contains("re-authenticate")));
    assert!(FleetError::InvalidDomain("a b".into()).hint().is_none());
}

#[test]
fn display_includes_context() {
    let err = FleetError::ReadError { path: "/tmp/creds.json".into(), reason: "missing".into() };
    let msg = err.to_string();
    assert!(msg.contains("/tmp/creds.json"));
    assert!(msg.contains("missing"));

    let err = FleetError::operation("stop", "mcl-a", "exit 1");
    assert_eq!(err.to_string(), "failed to stop mcl-a: exit 1");
}

#[test]
fn code_display_is_screaming_snake() {
    assert_eq!(ErrorCode::AllCredentialsExpired.to_string(), "ALL_CREDENTIALS_EXPIRED");
    assert_eq!(ErrorCode::EngineUnavailable.as_str(), "ENGINE_UNAVAILABLE");
}
