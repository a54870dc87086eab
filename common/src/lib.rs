//! Types shared by the endpoint backends and the remote file layer.

pub mod config;
pub mod error;
pub mod mode;
pub mod path;
pub mod url;

pub use config::*;
pub use error::{Error, ErrorCategory, Result};
pub use mode::OpenMode;
pub use path::*;
pub use url::RemoteUrl;
