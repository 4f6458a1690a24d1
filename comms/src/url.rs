use std::path::PathBuf;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::msg::MsgKind;

/// Where the aggregation server lives and how to reach it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerAddr {
    pub ip: String,
    pub port: u16,
    #[serde(default)]
    pub use_https: bool,
    /// Trusted root certificate in PEM format, only read when `use_https` is set.
    #[serde(default)]
    pub cert_path: Option<PathBuf>,
    /// Spread requests across `server_num` consecutive ports behind a load balancer.
    #[serde(default)]
    pub use_elb: bool,
    #[serde(default = "default_server_num")]
    pub server_num: u16,
}

fn default_server_num() -> u16 {
    1
}

impl ServerAddr {
    /// Creates a plain http `ServerAddr`.
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self {
            ip: ip.into(),
            port,
            use_https: false,
            cert_path: None,
            use_elb: false,
            server_num: default_server_num(),
        }
    }

    /// Builds the base url for the next request.
    ///
    /// With load balancing enabled each call picks one of the `server_num` ports starting at
    /// `port` uniformly at random, `port + server_num - 1` must still be a valid port.
    pub fn base_url(&self) -> String {
        let scheme = if self.use_https { "https" } else { "http" };

        let port = if self.use_elb && self.server_num > 1 {
            let offset = rand::rng().random_range(0..self.server_num);
            self.port.saturating_add(offset)
        } else {
            self.port
        };

        format!("{scheme}://{}:{port}", self.ip)
    }

    /// The full url of the endpoint serving `kind` requests.
    pub fn endpoint(&self, kind: MsgKind) -> String {
        format!("{}{}", self.base_url(), kind.endpoint())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_url() {
        let addr = ServerAddr::new("10.0.0.1", 6666);
        assert_eq!(addr.base_url(), "http://10.0.0.1:6666");
        assert_eq!(
            addr.endpoint(MsgKind::GetModel),
            "http://10.0.0.1:6666/getModel"
        );
    }

    #[test]
    fn https_scheme() {
        let addr = ServerAddr {
            use_https: true,
            ..ServerAddr::new("fl.example.org", 443)
        };

        assert_eq!(
            addr.endpoint(MsgKind::StartFlJob),
            "https://fl.example.org:443/startFLJob"
        );
    }

    #[test]
    fn load_balanced_ports_stay_in_range() {
        let addr = ServerAddr {
            use_elb: true,
            server_num: 4,
            ..ServerAddr::new("127.0.0.1", 6000)
        };

        for _ in 0..64 {
            let url = addr.base_url();
            let port: u16 = url.rsplit(':').next().unwrap().parse().unwrap();
            assert!((6000..6004).contains(&port), "port {port} out of range");
        }
    }
}
