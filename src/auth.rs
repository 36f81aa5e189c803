use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use google_gmail1::oauth2;
use keyring::Entry;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};
use yup_oauth2::authenticator_delegate::InstalledFlowDelegate;
use yup_oauth2::storage::{TokenInfo, TokenStorage};
use yup_oauth2::{
    ApplicationSecret, InstalledFlowAuthenticator, InstalledFlowReturnMethod,
    read_application_secret,
};

const APP_NAME: &str = "taskdeck";
const TOKEN_KEY: &str = "gmail_token";

pub const SCOPES: &[&str] = &["https://www.googleapis.com/auth/gmail.readonly"];

pub type GmailAuthenticator =
    oauth2::authenticator::Authenticator<hyper_rustls::HttpsConnector<hyper::client::HttpConnector>>;

#[derive(Debug, Default, Serialize, Deserialize)]
struct TokenData {
    tokens: Vec<TokenInfo>,
}

/// Keeps the OAuth token in the platform keyring.
pub struct RingStorage;

#[async_trait]
impl TokenStorage for RingStorage {
    async fn set(&self, _scopes: &[&str], token: TokenInfo) -> Result<()> {
        let entry = Self::entry()?;

        let data = TokenData {
            tokens: vec![token],
        };
        let serialized = serde_json::to_string(&data).context("Failed to serialize tokens")?;

        entry
            .set_password(&serialized)
            .map_err(|e| anyhow::anyhow!("Keyring error: {}", e))?;

        Ok(())
    }

    async fn get(&self, _scopes: &[&str]) -> Option<TokenInfo> {
        match self.get_all().await {
            Ok(data) => data.tokens.first().cloned(),
            Err(e) => {
                warn!("could not read stored token: {e:#}");
                None
            }
        }
    }
}

impl RingStorage {
    fn entry() -> Result<Entry> {
        Entry::new(APP_NAME, TOKEN_KEY).map_err(|e| anyhow::anyhow!("Keyring error: {}", e))
    }

    async fn get_all(&self) -> Result<TokenData> {
        match Self::entry()?.get_password() {
            Ok(serialized) => {
                serde_json::from_str(&serialized).context("Failed to deserialize tokens")
            }
            Err(keyring::Error::NoEntry) => Ok(TokenData::default()),
            Err(e) => Err(anyhow::anyhow!("Keyring error: {}", e)),
        }
    }

    pub async fn clear_token(&self) -> Result<()> {
        match Self::entry()?.delete_password() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(anyhow::anyhow!("Keyring error: {}", e)),
        }
    }
}

/// Sends the user to the consent page in their browser.
pub struct BrowserDelegate;

impl InstalledFlowDelegate for BrowserDelegate {
    fn present_user_url<'a>(
        &'a self,
        url: &'a str,
        need_code: bool,
    ) -> BoxFuture<'a, std::result::Result<String, String>> {
        Box::pin(async move {
            eprintln!("Sign in to Gmail to continue:\n\n  {url}\n");
            if let Err(e) = open::that(url) {
                warn!("could not open browser: {e}");
            }
            if !need_code {
                return Ok(String::new());
            }

            eprint!("Paste the authorization code: ");
            let mut code = String::new();
            std::io::stdin()
                .read_line(&mut code)
                .map_err(|e| e.to_string())?;
            Ok(code.trim().to_string())
        })
    }
}

pub struct Authenticator;

impl Authenticator {
    pub async fn load_secret<P: AsRef<Path>>(path: P) -> Result<ApplicationSecret> {
        read_application_secret(path)
            .await
            .context("Failed to read application secret")
    }

    pub async fn authenticate(secret: ApplicationSecret) -> Result<GmailAuthenticator> {
        let auth = InstalledFlowAuthenticator::builder(
            secret,
            InstalledFlowReturnMethod::HTTPRedirect,
        )
        .with_storage(Box::new(RingStorage))
        .flow_delegate(Box::new(BrowserDelegate))
        .build()
        .await
        .context("Failed to build authenticator")?;

        auth.token(SCOPES).await.context("Failed to obtain access token")?;
        info!("signed in to Gmail");

        Ok(auth)
    }
}
