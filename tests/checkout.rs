//! Checkout orchestrator tests: eligibility, duplicate-pending protection,
//! and stale-session self-healing.

mod common;

use axum::http::StatusCode;
use common::*;

#[tokio::test]
async fn test_checkout_unknown_course_returns_404() {
    let (state, _provider) = create_test_state();
    let app = app(state);

    let (status, body) = send(&app, checkout_request("user-1", "cp_crs_missing")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_checkout_unpurchasable_course_rejected() {
    let (state, _provider) = create_test_state();
    let course = {
        let conn = state.db.get().unwrap();
        create_unpurchasable_course(&conn, "Retired Course")
    };
    let app = app(state);

    let (status, body) = send(&app, checkout_request("user-1", &course.id)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_COURSE");
}

#[tokio::test]
async fn test_checkout_requires_authenticated_user() {
    let (state, _provider) = create_test_state();
    let course = {
        let conn = state.db.get().unwrap();
        create_test_course(&conn, "Auth Required", 9999)
    };
    let app = app(state);

    let request = axum::http::Request::builder()
        .method("POST")
        .uri(format!("/checkout/{}", course.id))
        .body(axum::body::Body::empty())
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHORIZED");
}

/// A paid enrollment blocks a second purchase with a targeted reason code.
#[tokio::test]
async fn test_checkout_already_enrolled_rejected() {
    let (state, _provider) = create_test_state();
    let course = {
        let conn = state.db.get().unwrap();
        create_test_course(&conn, "Popular Course", 9999)
    };
    let app = app(state.clone());
    complete_purchase(&app, &state, "user-1", &course.id).await;

    let (status, body) = send(&app, checkout_request("user-1", &course.id)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "ALREADY_ENROLLED");
}

/// While the provider session is still open, a duplicate checkout attempt
/// for the same (user, course) gets a conflict; exactly one pending intent
/// exists.
#[tokio::test]
async fn test_duplicate_checkout_conflicts_while_session_open() {
    let (state, _provider) = create_test_state();
    let course = {
        let conn = state.db.get().unwrap();
        create_test_course(&conn, "One at a Time", 9999)
    };
    let app = app(state.clone());

    let (status, body) = send(&app, checkout_request("user-1", &course.id)).await;
    assert_eq!(status, StatusCode::OK);
    let first_session = body["session_id"].as_str().unwrap().to_string();

    let (status, body) = send(&app, checkout_request("user-1", &course.id)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "PENDING_PAYMENT");

    // Still exactly one pending intent for the pair.
    let conn = state.db.get().unwrap();
    let pending = queries::get_pending_payment(&conn, "user-1", &course.id)
        .unwrap()
        .unwrap();
    assert_eq!(pending.provider_session_id, first_session);
}

/// Different users (or different courses) are never serialized against each
/// other.
#[tokio::test]
async fn test_pending_scope_is_per_user_and_course() {
    let (state, _provider) = create_test_state();
    let (course_a, course_b) = {
        let conn = state.db.get().unwrap();
        (
            create_test_course(&conn, "Course A", 9999),
            create_test_course(&conn, "Course B", 5999),
        )
    };
    let app = app(state);

    let (status, _) = send(&app, checkout_request("user-1", &course_a.id)).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&app, checkout_request("user-2", &course_a.id)).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&app, checkout_request("user-1", &course_b.id)).await;
    assert_eq!(status, StatusCode::OK);
}

/// A pending intent whose provider session expired is canceled in place and
/// checkout proceeds with a fresh session (self-healing).
#[tokio::test]
async fn test_expired_provider_session_self_heals() {
    let (state, provider) = create_test_state();
    let course = {
        let conn = state.db.get().unwrap();
        create_test_course(&conn, "Abandoned Cart", 9999)
    };
    let app = app(state.clone());

    let (_, body) = send(&app, checkout_request("user-1", &course.id)).await;
    let first_session = body["session_id"].as_str().unwrap().to_string();
    let first_intent = get_payment_by_session(&state, &first_session);

    provider.set_session(
        &first_session,
        SessionSnapshot {
            state: SessionState::Expired,
            charge_id: None,
            amount_refunded: None,
        },
    );

    let (status, body) = send(&app, checkout_request("user-1", &course.id)).await;
    assert_eq!(status, StatusCode::OK);
    let second_session = body["session_id"].as_str().unwrap().to_string();
    assert_ne!(second_session, first_session);

    assert_eq!(
        get_payment(&state, &first_intent.id).status,
        PaymentStatus::Canceled
    );
    assert_eq!(
        get_payment_by_session(&state, &second_session).status,
        PaymentStatus::Pending
    );
}

/// A pending intent older than the TTL is canceled without consulting the
/// provider.
#[tokio::test]
async fn test_stale_pending_past_ttl_is_canceled() {
    let (state, provider) = create_test_state();
    let course = {
        let conn = state.db.get().unwrap();
        create_test_course(&conn, "Slow Shopper", 9999)
    };
    let app = app(state.clone());

    let (_, body) = send(&app, checkout_request("user-1", &course.id)).await;
    let first_session = body["session_id"].as_str().unwrap().to_string();
    let first_intent = get_payment_by_session(&state, &first_session);

    backdate_created_at(&state, &first_intent.id, state.checkout_ttl_secs + 60);
    // Even an open provider session doesn't matter past the TTL.
    provider.set_session(
        &first_session,
        SessionSnapshot {
            state: SessionState::Open,
            charge_id: None,
            amount_refunded: None,
        },
    );

    let (status, _) = send(&app, checkout_request("user-1", &course.id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        get_payment(&state, &first_intent.id).status,
        PaymentStatus::Canceled
    );
}

/// A pending session the provider reports complete is settled on the spot;
/// the checkout answers ALREADY_ENROLLED rather than double-charging.
#[tokio::test]
async fn test_completed_provider_session_settles_during_checkout() {
    let (state, provider) = create_test_state();
    let course = {
        let conn = state.db.get().unwrap();
        create_test_course(&conn, "Webhook Was Late", 9999)
    };
    let app = app(state.clone());

    let (_, body) = send(&app, checkout_request("user-1", &course.id)).await;
    let session_id = body["session_id"].as_str().unwrap().to_string();
    let intent = get_payment_by_session(&state, &session_id);

    let charge_id = unique_id("pi");
    provider.set_session(
        &session_id,
        SessionSnapshot {
            state: SessionState::Complete,
            charge_id: Some(charge_id.clone()),
            amount_refunded: None,
        },
    );

    let (status, body) = send(&app, checkout_request("user-1", &course.id)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "ALREADY_ENROLLED");

    let settled = get_payment(&state, &intent.id);
    assert_eq!(settled.status, PaymentStatus::Succeeded);
    assert_eq!(settled.provider_charge_id.as_deref(), Some(charge_id.as_str()));
    assert!(get_enrollment(&state, "user-1", &course.id).is_some());
}

/// Owner-only status reads; other users see 404, not 403.
#[tokio::test]
async fn test_status_is_owner_only() {
    let (state, _provider) = create_test_state();
    let course = {
        let conn = state.db.get().unwrap();
        create_test_course(&conn, "Private Status", 9999)
    };
    let app = app(state.clone());

    let (_, body) = send(&app, checkout_request("user-1", &course.id)).await;
    let session_id = body["session_id"].as_str().unwrap().to_string();

    let (status, body) = send(&app, status_request("user-1", &session_id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "pending");

    let (status, _) = send(&app, status_request("user-2", &session_id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_history_is_scoped_and_paginated() {
    let (state, _provider) = create_test_state();
    let courses = {
        let conn = state.db.get().unwrap();
        (0..3i64)
            .map(|i| create_test_course(&conn, &format!("Course {}", i), 1000 + i))
            .collect::<Vec<_>>()
    };
    let app = app(state.clone());

    for course in &courses {
        complete_purchase(&app, &state, "user-1", &course.id).await;
    }
    complete_purchase(&app, &state, "user-2", &courses[0].id).await;

    let (status, body) = send(&app, history_request("user-1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 3);
    assert_eq!(body["items"].as_array().unwrap().len(), 3);

    let request = axum::http::Request::builder()
        .method("GET")
        .uri("/history?limit=2&offset=2")
        .header("x-user-id", "user-1")
        .body(axum::body::Body::empty())
        .unwrap();
    let (_, body) = send(&app, request).await;
    assert_eq!(body["total"], 3);
    assert_eq!(body["items"].as_array().unwrap().len(), 1);

    let (_, body) = send(&app, history_request("user-2")).await;
    assert_eq!(body["total"], 1);
}
