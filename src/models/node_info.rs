use bitflags::bitflags;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Dir,
}

bitflags! {
    /// Permission bitmask attached to every metadata snapshot
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct Permissions: u8 {
        const READ = 0b0_0001;
        const UPDATE = 0b0_0010;
        const CREATE = 0b0_0100;
        const DELETE = 0b0_1000;
        const SHARE = 0b1_0000;
    }
}

impl Permissions {
    pub fn can_read(self) -> bool {
        self.contains(Self::READ)
    }

    pub fn can_update(self) -> bool {
        self.contains(Self::UPDATE)
    }

    pub fn can_create(self) -> bool {
        self.contains(Self::CREATE)
    }

    pub fn can_delete(self) -> bool {
        self.contains(Self::DELETE)
    }

    pub fn can_share(self) -> bool {
        self.contains(Self::SHARE)
    }
}

/// Metadata snapshot of a single file or directory as reported by the storage view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub path: String,
    pub name: String,
    pub kind: EntryKind,
    /// For directories this is the aggregate size of all descendant files
    pub size: u64,
    pub mime_type: String,
    pub file_id: u64,
    pub etag: String,
    pub permissions: Permissions,
    pub mtime: DateTime<Utc>,
    pub mounted: bool,
    pub shared: bool,
}

impl NodeInfo {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Dir
    }

    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }

    /// Permission string understood by sync clients, e.g. `RDNVW` or `RDNVCK`
    pub fn dav_permissions(&self) -> String {
        let mut p = String::new();
        if self.shared {
            p.push('S');
        }
        if self.permissions.can_share() {
            p.push('R');
        }
        if self.mounted {
            p.push('M');
        }
        if self.permissions.can_delete() {
            p.push('D');
            p.push_str("NV");
        }
        match self.kind {
            EntryKind::File => {
                if self.permissions.can_update() {
                    p.push('W');
                }
            }
            EntryKind::Dir => {
                if self.permissions.can_create() {
                    p.push_str("CK");
                }
            }
        }
        p
    }
}
