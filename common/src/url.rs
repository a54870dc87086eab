use crate::error::{Error, Result};
use crate::path::normalize_path;
use ::url::{Host, Url};
use std::fmt;
use std::net::IpAddr;

/// A parsed `root://host:port//path` style URL.
///
/// The path is kept normalized (single leading slash, no trailing slash) so
/// that two spellings of the same entry compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteUrl {
    inner: Url,
    path: String,
}

impl RemoteUrl {
    pub fn parse(value: &str) -> Result<Self> {
        let inner =
            Url::parse(value).map_err(|e| Error::InvalidUrl(format!("{}: {}", value, e)))?;
        let path = match inner.path() {
            "" | "/" => "/".to_string(),
            raw => normalize_path(raw)?,
        };
        Ok(Self { inner, path })
    }

    /// Build a URL from a scheme, a `host[:port]` address and a path.
    pub fn from_parts(scheme: &str, address: &str, path: &str) -> Result<Self> {
        let path = normalize_path(path)?;
        Self::parse(&format!("{}://{}/{}", scheme, address, path))
    }

    pub fn scheme(&self) -> &str {
        self.inner.scheme()
    }

    pub fn host(&self) -> Option<&str> {
        self.inner.host_str()
    }

    pub fn port(&self) -> Option<u16> {
        self.inner.port()
    }

    /// `host:port`, or just `host` when no port was given.
    pub fn host_id(&self) -> String {
        match (self.host(), self.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            _ => String::new(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn as_str(&self) -> &str {
        self.inner.as_str()
    }

    /// Same scheme and authority, different path.
    pub fn with_path(&self, path: &str) -> Result<Self> {
        Self::from_parts(self.scheme(), &self.host_id(), path)
    }

    /// Same scheme, authority and normalized path, however the URL was spelled.
    pub fn same_target(&self, other: &RemoteUrl) -> bool {
        self.scheme() == other.scheme()
            && self.host_id().eq_ignore_ascii_case(&other.host_id())
            && self.path == other.path
    }

    /// True for `file:` URLs and for loopback hosts.
    pub fn is_local(&self) -> bool {
        if self.scheme() == "file" {
            return true;
        }
        match self.inner.host() {
            Some(Host::Ipv4(ip)) => ip.is_loopback(),
            Some(Host::Ipv6(ip)) => ip.is_loopback(),
            Some(Host::Domain(domain)) => {
                domain.eq_ignore_ascii_case("localhost")
                    || domain
                        .parse::<IpAddr>()
                        .map(|ip| ip.is_loopback())
                        .unwrap_or(false)
            }
            None => false,
        }
    }
}

impl fmt::Display for RemoteUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
