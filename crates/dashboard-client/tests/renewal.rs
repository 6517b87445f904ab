mod common;

use std::time::Duration;

use anyhow::Result;
use dashboard_client::{ApiClientError, RefreshError, RenewalOutcome, RenewalTimer, Resource};
use dashboard_session::{TokenStore, now_unix_ms};
use reqwest::StatusCode;

use common::{Backend, RefreshReply, USERNAME, spawn_backend, token};

async fn expiring_store(backend: &Backend) -> Result<TokenStore> {
    let tokens = TokenStore::in_memory();
    let refresh = backend.current_pair().await.refresh;
    tokens.set_tokens(&token(USERNAME, 60, "expiring"), &refresh, None)?;
    Ok(tokens)
}

#[tokio::test]
async fn timer_renews_a_token_close_to_expiry() -> Result<()> {
    let mock = spawn_backend().await?;
    let backend = mock.backend.clone();
    let (client, redirect) = mock.client(expiring_store(&backend).await?)?;
    let renewed = backend.next_pair().await;

    let timer = RenewalTimer::spawn_with(client.clone(), Duration::from_millis(20), 5);
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while client.tokens().credentials().as_ref() != Some(&renewed)
        && tokio::time::Instant::now() < deadline
    {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    timer.stop();

    assert_eq!(client.tokens().credentials(), Some(renewed));
    assert!(redirect.targets().is_empty());

    // The renewed token is an hour away from expiry, so later ticks are no-ops.
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(backend.refresh_calls(), 1);

    mock.stop().await;
    Ok(())
}

#[tokio::test]
async fn failed_renewal_keeps_the_session() -> Result<()> {
    let mock = spawn_backend().await?;
    let backend = mock.backend.clone();
    backend
        .set_refresh_reply(RefreshReply::Fail(StatusCode::BAD_GATEWAY))
        .await;
    let tokens = expiring_store(&backend).await?;
    let before = tokens.credentials();
    let (client, redirect) = mock.client(tokens)?;

    let error = client
        .renew_if_expiring(5, now_unix_ms())
        .await
        .expect_err("refresh fails");

    assert!(matches!(
        error,
        RefreshError::Http { status, .. } if status == StatusCode::BAD_GATEWAY
    ));
    assert_eq!(client.tokens().credentials(), before);
    assert!(redirect.targets().is_empty());
    assert!(!client.is_refreshing());

    mock.stop().await;
    Ok(())
}

#[tokio::test]
async fn renewal_and_unauthorized_request_share_one_refresh() -> Result<()> {
    let mock = spawn_backend().await?;
    let backend = mock.backend.clone();
    backend.hold_refresh_until_unauthorized(1);
    let (client, redirect) = mock.client(expiring_store(&backend).await?)?;

    let (renewal, projects) = tokio::join!(
        client.renew_if_expiring(5, now_unix_ms()),
        client.list(Resource::Projects),
    );

    assert_eq!(renewal, Ok(RenewalOutcome::Renewed));
    assert_eq!(projects?.as_array().map(Vec::len), Some(2));
    assert_eq!(backend.refresh_calls(), 1);
    assert_eq!(client.tokens().credentials(), Some(backend.next_pair().await));
    assert!(redirect.targets().is_empty());

    mock.stop().await;
    Ok(())
}

#[tokio::test]
async fn failed_renewal_logs_out_the_requests_waiting_on_it() -> Result<()> {
    let mock = spawn_backend().await?;
    let backend = mock.backend.clone();
    backend.hold_refresh_until_unauthorized(1);
    backend
        .set_refresh_reply(RefreshReply::Fail(StatusCode::INTERNAL_SERVER_ERROR))
        .await;
    let (client, redirect) = mock.client(expiring_store(&backend).await?)?;

    let (renewal, projects) = tokio::join!(
        client.renew_if_expiring(5, now_unix_ms()),
        client.list(Resource::Projects),
    );

    assert!(matches!(
        renewal,
        Err(RefreshError::Http { status, .. }) if status == StatusCode::INTERNAL_SERVER_ERROR
    ));
    assert!(matches!(
        projects,
        Err(ApiClientError::RefreshFailed(RefreshError::Http { status, .. }))
            if status == StatusCode::INTERNAL_SERVER_ERROR
    ));
    assert_eq!(backend.refresh_calls(), 1);
    assert_eq!(client.tokens().credentials(), None);
    assert_eq!(client.tokens().session_data(), None);
    assert_eq!(redirect.targets(), vec!["/auth".to_string()]);

    mock.stop().await;
    Ok(())
}
