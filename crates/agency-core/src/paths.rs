/// Directory layout of the file-backed store
use std::path::{Path, PathBuf};

// Entity directories (relative to the data root)
pub const USERS_DIR_NAME: &str = "users";
pub const CAMPAIGNS_DIR_NAME: &str = "campaigns";
pub const POSTS_DIR_NAME: &str = "posts";
pub const PRODUCTS_DIR_NAME: &str = "products";
pub const SALES_DIR_NAME: &str = "sales";
pub const PURCHASE_REQUESTS_DIR_NAME: &str = "purchase_requests";
pub const EXPENSES_DIR_NAME: &str = "expenses";
pub const INCENTIVES_DIR_NAME: &str = "incentives";

/// Staging area for writes that are renamed into place
pub const STAGING_DIR_NAME: &str = ".staging";

pub const ENTITY_DIR_NAMES: [&str; 8] = [
    USERS_DIR_NAME,
    CAMPAIGNS_DIR_NAME,
    POSTS_DIR_NAME,
    PRODUCTS_DIR_NAME,
    SALES_DIR_NAME,
    PURCHASE_REQUESTS_DIR_NAME,
    EXPENSES_DIR_NAME,
    INCENTIVES_DIR_NAME,
];

pub const LOCK_FILE_NAME: &str = ".lock";

/// Ids are used verbatim in file names, so only `[A-Za-z0-9_-]` is allowed
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 128
        && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// `<root>/<dir>/<prefix>_<id>.json`, or `None` for an id no file can hold
pub fn entity_file(root: &Path, dir: &str, prefix: &str, id: &str) -> Option<PathBuf> {
    if !is_valid_id(id) {
        return None;
    }
    Some(root.join(dir).join(format!("{}_{}.json", prefix, id)))
}

pub fn staging_dir(root: &Path) -> PathBuf {
    root.join(STAGING_DIR_NAME)
}

/// Lock file serializing writers across processes
pub fn lock_file(root: &Path) -> PathBuf {
    root.join(LOCK_FILE_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_file_layout() {
        let path = entity_file(Path::new("/data"), POSTS_DIR_NAME, "post", "abc-123");
        assert_eq!(path, Some(PathBuf::from("/data/posts/post_abc-123.json")));
    }

    #[test]
    fn test_ids_cannot_escape_directory() {
        assert_eq!(entity_file(Path::new("/data"), USERS_DIR_NAME, "user", "../../etc/passwd"), None);
        assert_eq!(entity_file(Path::new("/data"), USERS_DIR_NAME, "user", ""), None);
    }

    #[test]
    fn test_distinct_ids_never_share_a_file() {
        assert!(!is_valid_id("a.b"));
        assert!(is_valid_id("a_b"));
        assert!(is_valid_id(&uuid::Uuid::new_v4().to_string()));
        assert!(!is_valid_id(&"x".repeat(129)));
    }
}
