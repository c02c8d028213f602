use std::{ops::Deref, sync::Arc};

use reqwest::{Client, ClientBuilder, IntoUrl};
use reqwest_cookie_store::{CookieStore, CookieStoreMutex};

use crate::error::DvrResult;

/// A [`Client`] sharing one cookie jar between playlist and segment requests.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    cookies_store: Arc<CookieStoreMutex>,
}

impl HttpClient {
    pub fn new(builder: ClientBuilder) -> DvrResult<Self> {
        let cookies_store = Arc::new(CookieStoreMutex::new(CookieStore::default()));
        let client = builder.cookie_provider(cookies_store.clone()).build()?;

        Ok(Self {
            client,
            cookies_store,
        })
    }

    /// Seed the jar with `Set-Cookie` style strings scoped to `url`.
    pub fn add_cookies(&self, cookies: Vec<String>, url: impl IntoUrl) -> DvrResult<()> {
        let url = url.into_url()?;
        let mut lock = self
            .cookies_store
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for cookie in cookies {
            if let Err(e) = lock.parse(&cookie, &url) {
                tracing::warn!("Ignoring invalid cookie {cookie}: {e}");
            }
        }
        Ok(())
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        match Self::new(Client::builder()) {
            Ok(client) => client,
            Err(e) => {
                tracing::warn!("Failed to build http client, cookies are disabled: {e}");
                Self {
                    client: Client::new(),
                    cookies_store: Arc::new(CookieStoreMutex::new(CookieStore::default())),
                }
            }
        }
    }
}

impl Deref for HttpClient {
    type Target = Client;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}
