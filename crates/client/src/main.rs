//! `storefront-session`: restores (or opens) a session against the configured
//! backend and prints realtime messages for one topic until Ctrl-C.

use std::sync::Arc;

use anyhow::Context;

use storefront_auth::{FileStorage, KeyValueStore, LoginRequest, MemoryStorage, NoopNavigator};
use storefront_client::ApiClient;
use storefront_core::{ClientConfig, RuntimeCapabilities, UserProfile};
use storefront_realtime::{SubscriptionRegistry, TokenSource};

const DEFAULT_TOPIC: &str = "/user/queue/notifications";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    storefront_observability::init();

    let config = ClientConfig::from_env().context("invalid STOREFRONT_* configuration")?;

    let storage: Arc<dyn KeyValueStore> = match &config.storage_path {
        Some(path) => Arc::new(
            FileStorage::open(path)
                .with_context(|| format!("opening credential storage at {}", path.display()))?,
        ),
        None => {
            tracing::warn!("STOREFRONT_STORAGE_PATH not set; credentials are kept in memory only");
            Arc::new(MemoryStorage::new())
        }
    };

    let client = ApiClient::from_config(
        &config,
        storage,
        RuntimeCapabilities::ui(),
        Arc::new(NoopNavigator),
    )
    .context("building http client")?;
    let session = client.session().clone();

    let mut authenticated = session.restore_from_storage().await;
    if !authenticated {
        if let (Ok(username), Ok(password)) = (
            std::env::var("STOREFRONT_USERNAME"),
            std::env::var("STOREFRONT_PASSWORD"),
        ) {
            session
                .login(&LoginRequest::new(username, password))
                .await
                .context("login failed")?;
            authenticated = true;
        }
    }

    if authenticated {
        let profile: UserProfile = client
            .get_json(&config.profile_path)
            .await
            .context("fetching profile")?;
        tracing::info!(user = %profile.username, admin = profile.is_admin(), "session ready");
    } else {
        tracing::info!("no stored session and no credentials given; continuing anonymously");
    }

    let token: TokenSource = {
        let session = session.clone();
        Arc::new(move || session.access_token())
    };
    let registry = SubscriptionRegistry::from_config(&config, RuntimeCapabilities::ui(), Some(token));

    let topic = std::env::var("STOREFRONT_TOPIC").unwrap_or_else(|_| DEFAULT_TOPIC.to_string());
    let subscription = registry.subscribe(&topic, |payload| println!("{payload}"));
    tracing::info!(%topic, "listening; press Ctrl-C to stop");

    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;

    subscription.cancel();
    tracing::info!("shutting down");
    Ok(())
}
