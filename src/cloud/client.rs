use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, warn};
use rusoto_core::{HttpClient, Region};
use rusoto_credential::{
    AwsCredentials, CredentialsError, DefaultCredentialsProvider, ProfileProvider,
    ProvideAwsCredentials, StaticProvider,
};
use rusoto_glacier::GlacierClient;

use crate::config::Credentials;
use crate::constants::GLACIER_REGIONS;

/// Region for an endpoint URL.
///
/// The signing region is taken from a `glacier.<region>.amazonaws.com` host;
/// any other host keeps its URL and signs as `us-east-1`.
pub fn region_for_endpoint(endpoint: &str) -> Region {
    let host = endpoint
        .split("://")
        .nth(1)
        .unwrap_or(endpoint)
        .split(|c| c == '/' || c == ':')
        .next()
        .unwrap_or_default();

    let name = host
        .strip_prefix("glacier.")
        .and_then(|rest| rest.split('.').next())
        .filter(|region| !region.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| {
            warn!("Cannot infer region from endpoint '{}', signing as us-east-1", endpoint);
            "us-east-1".to_string()
        });

    if GLACIER_REGIONS.contains(&name.as_str()) {
        if let Ok(region) = name.parse::<Region>() {
            if endpoint.trim_end_matches('/') == format!("https://glacier.{}.amazonaws.com", name) {
                return region;
            }
        }
    }

    Region::Custom {
        name,
        endpoint: endpoint.trim_end_matches('/').to_string(),
    }
}

/// Where request-signing credentials come from.
pub enum CredentialSource {
    Static(StaticProvider),
    Profile(ProfileProvider),
    DefaultChain(DefaultCredentialsProvider),
}

#[async_trait]
impl ProvideAwsCredentials for CredentialSource {
    async fn credentials(&self) -> Result<AwsCredentials, CredentialsError> {
        match self {
            CredentialSource::Static(provider) => provider.credentials().await,
            CredentialSource::Profile(provider) => provider.credentials().await,
            CredentialSource::DefaultChain(provider) => provider.credentials().await,
        }
    }
}

/// Everything needed to talk to one Glacier endpoint.
///
/// The generated client covers the buffered calls. Part uploads are signed
/// and dispatched by hand so their body can be streamed.
pub struct GlacierConnection {
    pub client: GlacierClient,
    pub dispatcher: HttpClient,
    pub credentials: Arc<CredentialSource>,
    pub region: Region,
}

/// Connect to `endpoint` with the configured credentials.
///
/// Credentials are resolved once up front, so a missing or broken credential
/// source fails here instead of on the first request.
pub async fn create_glacier_client(endpoint: &str, credentials: &Credentials) -> Result<GlacierConnection> {
    let region = region_for_endpoint(endpoint);
    debug!("Using region {:?}", region);

    let source = match credentials {
        Credentials::Static { access_key, secret_key } => CredentialSource::Static(
            StaticProvider::new_minimal(access_key.clone(), secret_key.clone()),
        ),
        Credentials::Profile(profile) => {
            let mut provider =
                ProfileProvider::new().context("Failed to create AWS profile provider")?;
            provider.set_profile(profile.as_str());
            CredentialSource::Profile(provider)
        }
        Credentials::DefaultChain => CredentialSource::DefaultChain(
            DefaultCredentialsProvider::new()
                .context("Failed to create AWS credentials provider")?,
        ),
    };

    source.credentials().await.with_context(|| match credentials {
        Credentials::Profile(profile) => format!("No usable credentials in profile '{}'", profile),
        _ => "No AWS credentials found (set access_key/secret_key, a profile, or the environment)"
            .to_string(),
    })?;

    let credentials = Arc::new(source);
    let client = GlacierClient::new_with(
        HttpClient::new().context("Failed to create HTTP client")?,
        Arc::clone(&credentials),
        region.clone(),
    );

    Ok(GlacierConnection {
        client,
        dispatcher: HttpClient::new().context("Failed to create HTTP client")?,
        credentials,
        region,
    })
}
