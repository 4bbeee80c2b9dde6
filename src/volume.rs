//! Mounted volumes and per-entry capability attributes.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::VolumeConfig;
use crate::driver::Driver;
use crate::path::{file_name, normalize_path, relative_to};

/// Prefix of generated volume ids.
pub const VOLUME_PREFIX: &str = "v";

/// Separator terminating every volume id.
pub const HASH_SEPARATOR: char = '_';

/// Sentinel matching every mime type in allow/deny lists.
pub const UPLOAD_CONSTRAINT_ALL: &str = "all";

/// Capability flags of a single entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectAttribute {
    pub read: bool,
    pub write: bool,
    pub locked: bool,
    pub visible: bool,
}

impl Default for ObjectAttribute {
    fn default() -> Self {
        Self {
            read: true,
            write: true,
            locked: false,
            visible: true,
        }
    }
}

impl ObjectAttribute {
    pub fn can_download(&self) -> bool {
        self.read
    }

    pub fn can_copy(&self) -> bool {
        self.read
    }

    pub fn can_archive(&self) -> bool {
        self.read
    }

    pub fn can_create_object(&self) -> bool {
        self.write
    }

    pub fn can_put(&self) -> bool {
        self.write
    }

    pub fn can_extract_to(&self) -> bool {
        self.write
    }

    pub fn can_edit_image(&self) -> bool {
        self.read && self.write
    }

    pub fn can_delete(&self) -> bool {
        !self.locked
    }

    pub fn can_move(&self) -> bool {
        !self.locked
    }

    pub fn can_rename(&self) -> bool {
        !self.locked
    }
}

/// Attribute override: `(full path, is directory)` to a replacement, or `None`
/// to leave the entry alone. Later rules win.
pub type AttributeRule = Arc<dyn Fn(&Path, bool) -> Option<ObjectAttribute> + Send + Sync>;

/// Kind of an upload mime rule list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadConstraint {
    Allow,
    Deny,
}

impl UploadConstraint {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "allow" => Some(UploadConstraint::Allow),
            "deny" => Some(UploadConstraint::Deny),
            _ => None,
        }
    }
}

/// A named root exposed through the connector.
///
/// Immutable once registered; shared as `Arc<Volume>`.
pub struct Volume {
    pub volume_id: String,
    pub name: String,
    pub root: PathBuf,
    pub start_directory: Option<PathBuf>,
    pub url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub thumbnail_directory: Option<PathBuf>,
    pub temp_directory: Option<PathBuf>,
    pub chunk_directory: Option<PathBuf>,
    pub temp_archive_directory: Option<PathBuf>,
    pub thumbnail_size: u32,
    pub max_upload_size: Option<u64>,
    pub max_upload_files: Option<usize>,
    pub upload_order: Vec<UploadConstraint>,
    pub upload_allow: Vec<String>,
    pub upload_deny: Vec<String>,
    pub copy_overwrite: bool,
    pub upload_overwrite: bool,
    pub read_only: bool,
    pub locked: bool,
    pub separator: char,
    pub attribute_rules: Vec<AttributeRule>,
    pub driver: Arc<dyn Driver>,
}

impl std::fmt::Debug for Volume {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Volume")
            .field("volume_id", &self.volume_id)
            .field("name", &self.name)
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl Volume {
    /// Volume rooted at `root` with default limits. The id is assigned on
    /// registration.
    pub fn new(root: impl Into<PathBuf>, driver: Arc<dyn Driver>) -> Self {
        let root = normalize_path(&root.into());
        Self {
            volume_id: String::new(),
            name: file_name(&root),
            root,
            start_directory: None,
            url: None,
            thumbnail_url: None,
            thumbnail_directory: None,
            temp_directory: None,
            chunk_directory: None,
            temp_archive_directory: None,
            thumbnail_size: 48,
            max_upload_size: None,
            max_upload_files: None,
            upload_order: vec![UploadConstraint::Deny, UploadConstraint::Allow],
            upload_allow: vec![UPLOAD_CONSTRAINT_ALL.to_string()],
            upload_deny: vec![],
            copy_overwrite: false,
            upload_overwrite: true,
            read_only: false,
            locked: false,
            separator: std::path::MAIN_SEPARATOR,
            attribute_rules: vec![],
            driver,
        }
    }

    pub fn from_config(config: &VolumeConfig, driver: Arc<dyn Driver>) -> Self {
        let mut volume = Self::new(&config.root, driver);
        if let Some(name) = &config.name {
            volume.name = name.clone();
        }
        volume.url = config.url.clone();
        volume.start_directory = config.start_directory.as_ref().map(|d| volume.root.join(d));
        volume.thumbnail_directory = config.thumbnail_directory.as_deref().map(to_normal);
        volume.temp_directory = config.temp_directory.as_deref().map(to_normal);
        volume.chunk_directory = config.chunk_directory.as_deref().map(to_normal);
        volume.temp_archive_directory = config.temp_archive_directory.as_deref().map(to_normal);
        volume.thumbnail_size = config.thumbnail_size;
        volume.max_upload_size = config.max_upload_size;
        volume.max_upload_files = config.max_upload_files;
        volume.upload_order = config
            .upload_order
            .iter()
            .filter_map(|s| UploadConstraint::parse(s))
            .collect();
        volume.upload_allow = config.upload_allow.clone();
        volume.upload_deny = config.upload_deny.clone();
        volume.copy_overwrite = config.copy_overwrite;
        volume.upload_overwrite = config.upload_overwrite;
        volume.read_only = config.read_only;
        volume.locked = config.locked;
        volume
    }

    pub fn is_root(&self, path: &Path) -> bool {
        normalize_path(path) == self.root
    }

    /// Relative path of `full` under the root, as `""` or `/a/b`.
    pub fn relative_path(&self, full: &Path) -> String {
        relative_to(&self.root, full)
    }

    /// Effective capabilities of the entry at `full`.
    pub fn object_attribute(&self, full: &Path, is_directory: bool) -> ObjectAttribute {
        let mut attribute = ObjectAttribute {
            read: true,
            write: !self.read_only,
            locked: self.locked,
            visible: true,
        };

        for rule in &self.attribute_rules {
            if let Some(overridden) = rule(full, is_directory) {
                attribute = overridden;
            }
        }

        if self.read_only {
            attribute.write = false;
        }
        if self.is_root(full) {
            attribute.locked = true;
        }
        if self.is_internal(full) {
            attribute.visible = false;
        }

        attribute
    }

    /// Whether `path` is one of the volume's working directories (or inside one).
    pub fn is_internal(&self, path: &Path) -> bool {
        [
            &self.thumbnail_directory,
            &self.temp_directory,
            &self.chunk_directory,
            &self.temp_archive_directory,
        ]
        .into_iter()
        .flatten()
        .any(|dir| path.starts_with(dir))
    }

    /// Apply the ordered allow/deny rules to a mime type.
    pub fn is_mime_allowed(&self, mime: &str) -> bool {
        let top_level = mime.split('/').next().unwrap_or(mime);
        let matches = |list: &[String]| {
            list.iter()
                .any(|m| m == UPLOAD_CONSTRAINT_ALL || m == mime || m == top_level)
        };

        self.upload_order.iter().all(|constraint| match constraint {
            UploadConstraint::Allow => matches(&self.upload_allow),
            UploadConstraint::Deny => !matches(&self.upload_deny),
        })
    }

    /// Where the thumbnail of `full` lives, if thumbnails are enabled.
    pub fn thumbnail_path(&self, full: &Path) -> Option<PathBuf> {
        let thumbs = self.thumbnail_directory.as_ref()?;
        let relative = self.relative_path(full);
        Some(thumbs.join(relative.trim_start_matches('/')))
    }
}

fn to_normal(path: &str) -> PathBuf {
    normalize_path(Path::new(path))
}
