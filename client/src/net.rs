use comms::{
    Deserialize, Serialize, ServerAddr, Transport,
    msg::{Request, Response},
};
use log::debug;

use crate::{ClientErr, Result};

/// Aggregation server client wrapper.
///
/// Contract:
/// - every request is encoded and posted to its own endpoint
/// - the response must answer the same kind of request
pub struct ServerClient<T> {
    transport: T,
    addr: ServerAddr,
}

impl<T: Transport + Sync> ServerClient<T> {
    pub fn new(transport: T, addr: ServerAddr) -> Self {
        Self { transport, addr }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Sends `req` and decodes the server's answer.
    ///
    /// # Errors
    /// On any transport fault, an undecodable response or one answering a different request.
    pub async fn request(&self, req: &Request<'_>) -> Result<Response> {
        let kind = req.kind();
        let url = self.addr.endpoint(kind);

        let body = self.transport.sync_request(&url, req.to_bytes()?).await?;
        let res = Response::deserialize(&body)?;

        if res.kind != kind {
            return Err(ClientErr::UnexpectedResponse {
                expected: kind,
                got: res.kind,
            });
        }

        debug!(retcode = res.retcode.0; "{} answered", kind.endpoint());
        Ok(res)
    }
}
