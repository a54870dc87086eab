use serde::{Deserialize, Serialize};
use std::fmt;

/// Access mode a remote file is opened with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OpenMode {
    #[default]
    None,
    Read,
    Update,
    /// `NEW` / `CREATE`: the file must not exist yet.
    Create,
    /// `RECREATE`: truncate or create.
    Delete,
}

impl OpenMode {
    /// Parse a mode string case-insensitively. Unknown strings yield
    /// `OpenMode::None`, which endpoints refuse at open time.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "NEW" | "CREATE" => OpenMode::Create,
            "RECREATE" => OpenMode::Delete,
            "UPDATE" => OpenMode::Update,
            "READ" => OpenMode::Read,
            _ => OpenMode::None,
        }
    }

    pub fn is_writable(self) -> bool {
        matches!(self, OpenMode::Update | OpenMode::Create | OpenMode::Delete)
    }
}

impl From<&str> for OpenMode {
    fn from(value: &str) -> Self {
        OpenMode::parse(value)
    }
}

impl fmt::Display for OpenMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OpenMode::None => "NONE",
            OpenMode::Read => "READ",
            OpenMode::Update => "UPDATE",
            OpenMode::Create => "CREATE",
            OpenMode::Delete => "RECREATE",
        };
        f.write_str(s)
    }
}
