mod code;
mod codec;
mod error;
mod feature_map;
pub mod msg;
mod transport;
mod url;

pub use code::{ControlStatus, ResultCode};
pub use codec::{Deserialize, Serialize};
pub use error::{CommsErr, Result};
pub use feature_map::{FeatureMap, FeatureSpec};
pub use transport::{HttpTransport, Transport, TransportTemplate};
pub use url::ServerAddr;
