//! Identity provider client (OpenID Connect discovery + client credentials).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

use crate::config::IdentityConfig;
use crate::error::SubsystemError;
use crate::lifecycle::context::Context;
use crate::subsystem::{Constructor, Subsystem};

const DISCOVERY_PATH: &str = ".well-known/openid-configuration";

/// Subset of the provider's discovery document the client relies on.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ProviderMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub jwks_uri: String,
    #[serde(default)]
    pub userinfo_endpoint: Option<String>,
}

/// Access token issued by the provider.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

pub struct IdentityClient {
    http: reqwest::Client,
    discovery_url: Url,
    metadata: ProviderMetadata,
    client_id: String,
    client_secret: Option<String>,
    closed: AtomicBool,
}

impl IdentityClient {
    /// Fetch the discovery document; construction fails if the provider is unreachable.
    pub async fn discover(ctx: &Context, config: &IdentityConfig) -> Result<Self, SubsystemError> {
        let discovery_url = discovery_url(&config.issuer_url)?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        let metadata = ctx.run(fetch_metadata(&http, &discovery_url)).await??;
        tracing::info!(issuer = %metadata.issuer, "Identity provider discovered");

        Ok(Self {
            http,
            discovery_url,
            metadata,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            closed: AtomicBool::new(false),
        })
    }

    pub fn metadata(&self) -> &ProviderMetadata {
        &self.metadata
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Obtain a service token via the client-credentials grant.
    pub async fn client_credentials_token(
        &self,
        scopes: &[&str],
    ) -> Result<TokenResponse, SubsystemError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SubsystemError::Closed);
        }

        let scope = scopes.join(" ");
        let mut form = vec![
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
        ];
        if let Some(secret) = &self.client_secret {
            form.push(("client_secret", secret.as_str()));
        }
        if !scope.is_empty() {
            form.push(("scope", scope.as_str()));
        }

        let token = self
            .http
            .post(&self.metadata.token_endpoint)
            .form(&form)
            .send()
            .await?
            .error_for_status()?
            .json::<TokenResponse>()
            .await?;
        Ok(token)
    }
}

fn discovery_url(issuer: &str) -> Result<Url, SubsystemError> {
    let mut base = Url::parse(issuer)
        .map_err(|e| SubsystemError::InvalidConfig(format!("issuer url: {e}")))?;
    // Keep the realm path segment when joining.
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.join(DISCOVERY_PATH)
        .map_err(|e| SubsystemError::InvalidConfig(format!("issuer url: {e}")))
}

async fn fetch_metadata(
    http: &reqwest::Client,
    url: &Url,
) -> Result<ProviderMetadata, SubsystemError> {
    let metadata = http
        .get(url.clone())
        .send()
        .await?
        .error_for_status()?
        .json::<ProviderMetadata>()
        .await?;
    Ok(metadata)
}

#[async_trait]
impl Subsystem for IdentityClient {
    async fn health_check(&self, _ctx: &Context) -> Result<(), SubsystemError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SubsystemError::Closed);
        }
        let current = fetch_metadata(&self.http, &self.discovery_url).await?;
        if current.issuer != self.metadata.issuer {
            return Err(SubsystemError::Unavailable(format!(
                "issuer changed from {} to {}",
                self.metadata.issuer, current.issuer
            )));
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), SubsystemError> {
        self.closed.store(true, Ordering::Release);
        tracing::info!("Identity client closed");
        Ok(())
    }
}

#[async_trait]
impl Constructor for IdentityConfig {
    async fn construct(&self, ctx: &Context) -> Result<Arc<dyn Subsystem>, SubsystemError> {
        Ok(Arc::new(IdentityClient::discover(ctx, self).await?))
    }
}
