mod access;
mod biblist;
mod library_id;
mod models;

pub use access::AccessFlags;
pub use biblist::BibcodeList;
pub use library_id::{LibraryId, TOKEN_LENGTH};
pub use models::{Library, Permission, User};
