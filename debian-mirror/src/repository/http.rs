// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Repositories served over HTTP. */

use {
    crate::{
        error::{DebianError, Result},
        repository::DataResolver,
    },
    async_trait::async_trait,
    futures::{stream::TryStreamExt, AsyncBufRead},
    reqwest::{Client, IntoUrl, StatusCode, Url},
    std::pin::Pin,
};

fn io_error(path: &str, kind: std::io::ErrorKind, message: String) -> DebianError {
    DebianError::RepositoryIoPath(path.to_string(), std::io::Error::new(kind, message))
}

async fn fetch_url(
    client: &Client,
    root_url: &Url,
    path: &str,
) -> Result<Pin<Box<dyn AsyncBufRead + Send>>> {
    let url = root_url.join(path)?;

    let res = client.get(url.clone()).send().await.map_err(|e| {
        io_error(
            path,
            std::io::ErrorKind::Other,
            format!("error sending HTTP request: {:?}", e),
        )
    })?;

    // Missing files are routine for optional metadata and compression variants.
    if res.status() == StatusCode::NOT_FOUND {
        return Err(io_error(
            path,
            std::io::ErrorKind::NotFound,
            format!("{} not found", url),
        ));
    }

    let res = res.error_for_status().map_err(|e| {
        io_error(
            path,
            std::io::ErrorKind::Other,
            format!("bad HTTP status code: {:?}", e),
        )
    })?;

    Ok(Box::pin(
        res.bytes_stream()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, format!("{:?}", e)))
            .into_async_read(),
    ))
}

/// Client for a repository served via HTTP.
///
/// Instances are bound to the base URL of the repository, the directory holding
/// `dists/` and `pool/`.
#[derive(Debug)]
pub struct HttpRepositoryClient {
    client: Client,
    root_url: Url,
}

impl HttpRepositoryClient {
    /// Construct an instance bound to the specified URL.
    pub fn new(url: impl IntoUrl) -> Result<Self> {
        Self::new_client(Client::default(), url)
    }

    /// Construct an instance using the given [Client] and URL.
    pub fn new_client(client: Client, url: impl IntoUrl) -> Result<Self> {
        let mut root_url = url.into_url()?;

        // Url::join() replaces the last path segment unless there is a trailing slash.
        if !root_url.path().ends_with('/') {
            root_url.set_path(&format!("{}/", root_url.path()));
        }

        Ok(Self { client, root_url })
    }

    /// The base URL, always with a trailing slash.
    pub fn url(&self) -> &Url {
        &self.root_url
    }
}

#[async_trait]
impl DataResolver for HttpRepositoryClient {
    async fn get_path(&self, path: &str) -> Result<Pin<Box<dyn AsyncBufRead + Send>>> {
        fetch_url(&self.client, &self.root_url, path).await
    }
}
