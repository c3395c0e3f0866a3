use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AccessFlags, BibcodeList, LibraryId};

/// A local user, valid only while its external identity number remains
/// present in the upstream directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    /// Identity number assigned by the upstream directory. Unique locally.
    pub external_uid: i64,
    pub created_at: DateTime<Utc>,
}

/// A named, owned collection of document codes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Library {
    pub id: LibraryId,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub public: bool,
    pub bibcodes: BibcodeList,
    pub date_created: DateTime<Utc>,
    /// Bumped on every mutation of the document set or metadata, in the
    /// same transaction as the write itself.
    pub date_last_modified: DateTime<Utc>,
}

impl Library {
    pub fn new(name: impl Into<String>, description: Option<String>, public: bool) -> Self {
        let now = Utc::now();
        Self {
            id: LibraryId::new(),
            name: name.into(),
            description,
            public,
            bibcodes: BibcodeList::new(),
            date_created: now,
            date_last_modified: now,
        }
    }
}

/// Join row between one user and one library. At most one row exists per
/// (user, library) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Permission {
    pub id: i64,
    pub user_id: i64,
    pub library_id: LibraryId,
    #[serde(flatten)]
    pub flags: AccessFlags,
}
