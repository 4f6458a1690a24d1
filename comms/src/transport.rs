use std::{fs, time::Duration};

use log::debug;
use reqwest::{Certificate, Client, header::CONTENT_TYPE};

use crate::{CommsErr, Result, ServerAddr};

/// Synchronous request/response exchange with the aggregation server.
///
/// Every protocol phase issues exactly one request and awaits its reply before moving on,
/// there is never more than one exchange in flight for a participant.
#[allow(unused)]
#[trait_variant::make(Transport: Send)]
pub trait TransportTemplate {
    /// Posts `body` to `url` and returns the raw response body.
    ///
    /// # Arguments
    /// * `url` - The full url of the endpoint.
    /// * `body` - The encoded request.
    ///
    /// # Errors
    /// Any transport level fault, including non successful http statuses.
    async fn sync_request(&self, url: &str, body: Vec<u8>) -> Result<Vec<u8>>;
}

/// `Transport` over http(s), backed by a pooled `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Creates a new `HttpTransport` for the given server.
    ///
    /// # Arguments
    /// * `addr` - The server address, its tls settings are honored.
    /// * `timeout` - The whole request timeout.
    ///
    /// # Errors
    /// If the root certificate can't be read or the client can't be built.
    pub fn new(addr: &ServerAddr, timeout: Duration) -> Result<Self> {
        let mut builder = Client::builder().timeout(timeout);

        if let (true, Some(path)) = (addr.use_https, &addr.cert_path) {
            let pem = fs::read(path).map_err(|source| CommsErr::Certificate {
                path: path.clone(),
                source,
            })?;

            builder = builder.add_root_certificate(Certificate::from_pem(&pem)?);
        }

        Ok(Self {
            client: builder.build()?,
        })
    }
}

impl Transport for HttpTransport {
    async fn sync_request(&self, url: &str, body: Vec<u8>) -> Result<Vec<u8>> {
        debug!(url = url, bytes = body.len(); "posting request");

        let res = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(body)
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            return Err(CommsErr::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        Ok(res.bytes().await?.to_vec())
    }
}
