use std::{ops::Deref, time::Duration};

use reqwest::{Client, ClientBuilder};

use crate::IoriResult;

/// Cheaply cloneable HTTP client shared by manifest refreshes, fragment fetches and clock sync.
#[derive(Clone, Debug)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    pub fn new(builder: ClientBuilder) -> IoriResult<Self> {
        Ok(Self {
            client: builder.build()?,
        })
    }

    /// Client whose requests give up after `timeout`.
    pub fn with_timeout(timeout: Duration) -> IoriResult<Self> {
        Self::new(Client::builder().timeout(timeout))
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        Self {
            client: Client::new(),
        }
    }
}

impl Deref for HttpClient {
    type Target = Client;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}
