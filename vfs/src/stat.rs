//! Translation of endpoint stat replies into local file status.

use bitflags::bitflags;
use chrono::{DateTime, Utc};
use endpoint::{StatFlags, StatInfo};

bitflags! {
    /// Mode bits reported in [`FileStatus::mode`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FileMode: u32 {
        const IFREG = 0o100000;
        const IFDIR = 0o040000;
        const IFSOCK = 0o140000;
        const OFFLINE = 0o1000000;
        const IRUSR = 0o400;
        const IWUSR = 0o200;
        const IXUSR = 0o100;
        const IXGRP = 0o010;
        const IXOTH = 0o001;
        const IXALL = Self::IXUSR.bits() | Self::IXGRP.bits() | Self::IXOTH.bits();
    }
}

/// Local view of a remote entry.
///
/// Owner, group and link information are not carried by the protocol and are
/// always `None`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FileStatus {
    pub dev: u64,
    pub ino: u64,
    pub size: u64,
    pub mod_time: Option<DateTime<Utc>>,
    pub mode: FileMode,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub is_link: Option<bool>,
}

impl FileStatus {
    /// An offline entry reports the offline bit and nothing else.
    pub fn from_stat(info: &StatInfo) -> Self {
        if info.flags.contains(StatFlags::OFFLINE) {
            return Self {
                mode: FileMode::OFFLINE,
                ..Self::default()
            };
        }

        // The remote id is an opaque 64-bit number: device in the high half,
        // inode in the low half.
        let id = info.id.trim().parse::<i64>().unwrap_or(0) as u64;

        let mut mode = if info.flags.contains(StatFlags::IS_DIR) {
            FileMode::IFDIR
        } else if info.flags.contains(StatFlags::OTHER) {
            FileMode::IFSOCK
        } else {
            FileMode::IFREG
        };
        if info.flags.contains(StatFlags::X_BIT_SET) {
            mode |= FileMode::IXALL;
        }
        if info.flags.contains(StatFlags::READABLE) {
            mode |= FileMode::IRUSR;
        }
        if info.flags.contains(StatFlags::WRITABLE) {
            mode |= FileMode::IWUSR;
        }

        Self {
            dev: id >> 32,
            ino: id & 0xffff_ffff,
            size: info.size,
            mod_time: DateTime::from_timestamp(info.mod_time as i64, 0),
            mode,
            uid: None,
            gid: None,
            is_link: None,
        }
    }

    pub fn is_offline(&self) -> bool {
        self.mode.contains(FileMode::OFFLINE)
    }

    pub fn is_dir(&self) -> bool {
        !self.is_offline() && self.mode.contains(FileMode::IFDIR) && !self.is_socket()
    }

    pub fn is_socket(&self) -> bool {
        self.mode.contains(FileMode::IFSOCK)
    }

    pub fn is_file(&self) -> bool {
        !self.is_offline() && self.mode.contains(FileMode::IFREG) && !self.is_socket()
    }
}

impl From<&StatInfo> for FileStatus {
    fn from(info: &StatInfo) -> Self {
        Self::from_stat(info)
    }
}
