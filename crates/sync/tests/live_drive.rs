//! Live round trip against Google Drive.
//! Run with: cargo test -p lifeboat-sync --test live_drive -- --ignored --nocapture

use std::sync::Arc;

use lifeboat_core::{RemoteCredential, RetentionPolicy};
use lifeboat_sync::{HttpDriveApi, OAuthClient, OAuthConfig, RemoteSyncClient, DEFAULT_TOKEN_URL};

#[tokio::test]
#[ignore] // requires LIFEBOAT_CLIENT_ID, LIFEBOAT_CLIENT_SECRET and LIFEBOAT_REFRESH_TOKEN
async fn test_live_upload_and_rotate() {
    let oauth = OAuthClient::new(OAuthConfig {
        client_id: std::env::var("LIFEBOAT_CLIENT_ID").expect("LIFEBOAT_CLIENT_ID"),
        client_secret: std::env::var("LIFEBOAT_CLIENT_SECRET").expect("LIFEBOAT_CLIENT_SECRET"),
        token_url: DEFAULT_TOKEN_URL.to_owned(),
    });
    let client = RemoteSyncClient::new(
        Arc::new(HttpDriveApi::default()),
        Arc::new(oauth),
        "lifeboat-live-test",
    );
    // Deliberately stale access token: the first call must go through a refresh.
    client
        .set_credentials(RemoteCredential {
            access_token: "expired".into(),
            refresh_token: Some(std::env::var("LIFEBOAT_REFRESH_TOKEN").expect("LIFEBOAT_REFRESH_TOKEN")),
            expiry: None,
        })
        .await
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("live.db");
    std::fs::write(&path, b"lifeboat live test").unwrap();

    let artifact = client.upload(&path, "live.db").await.unwrap();
    println!("uploaded {} as {}", artifact.name, artifact.remote_id);

    client.rotate(RetentionPolicy::new(1).unwrap()).await.unwrap();
    assert!(client.list().await.unwrap().len() <= 1);
}
