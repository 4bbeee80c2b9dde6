//! Inbound commands: the raw parameter bag and the typed per-verb commands
//! built from it by the dispatcher.

use std::collections::HashMap;
use std::sync::Arc;

use crate::path::PathInfo;
use crate::volume::Volume;
use crate::{ConnectorError, Result};

pub const CMD_ABORT: &str = "abort";
pub const CMD_ARCHIVE: &str = "archive";
pub const CMD_DIM: &str = "dim";
pub const CMD_DUPLICATE: &str = "duplicate";
pub const CMD_EXTRACT: &str = "extract";
pub const CMD_FILE: &str = "file";
pub const CMD_GET: &str = "get";
pub const CMD_INFO: &str = "info";
pub const CMD_LS: &str = "ls";
pub const CMD_MKDIR: &str = "mkdir";
pub const CMD_MKFILE: &str = "mkfile";
pub const CMD_OPEN: &str = "open";
pub const CMD_PARENTS: &str = "parents";
pub const CMD_PASTE: &str = "paste";
pub const CMD_PUT: &str = "put";
pub const CMD_RENAME: &str = "rename";
pub const CMD_RESIZE: &str = "resize";
pub const CMD_RM: &str = "rm";
pub const CMD_SEARCH: &str = "search";
pub const CMD_SIZE: &str = "size";
pub const CMD_TMB: &str = "tmb";
pub const CMD_TREE: &str = "tree";
pub const CMD_UPLOAD: &str = "upload";
pub const CMD_ZIPDL: &str = "zipdl";

/// Every verb the dispatcher understands.
pub const ALL_COMMANDS: &[&str] = &[
    CMD_ABORT,
    CMD_ARCHIVE,
    CMD_DIM,
    CMD_DUPLICATE,
    CMD_EXTRACT,
    CMD_FILE,
    CMD_GET,
    CMD_INFO,
    CMD_LS,
    CMD_MKDIR,
    CMD_MKFILE,
    CMD_OPEN,
    CMD_PARENTS,
    CMD_PASTE,
    CMD_PUT,
    CMD_RENAME,
    CMD_RESIZE,
    CMD_RM,
    CMD_SEARCH,
    CMD_SIZE,
    CMD_TMB,
    CMD_TREE,
    CMD_UPLOAD,
    CMD_ZIPDL,
];

/// Upload marker sent by the client when a chunked upload failed on its side.
pub const CHUNK_FAIL: &str = "chunkfail";

/// A file part received with an upload request.
#[derive(Clone, Default)]
pub struct UploadedFile {
    pub file_name: String,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

impl UploadedFile {
    pub fn new(file_name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: None,
            data: data.into(),
        }
    }

    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl std::fmt::Debug for UploadedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadedFile")
            .field("file_name", &self.file_name)
            .field("content_type", &self.content_type)
            .field("len", &self.data.len())
            .finish()
    }
}

/// Raw request parameters as parsed by the HTTP adapter.
///
/// Keys are stored without a trailing `[]`, so `targets[]=a&targets[]=b`
/// and `targets=a` read the same way.
#[derive(Debug, Clone, Default)]
pub struct ConnectorCommand {
    args: HashMap<String, Vec<String>>,
    pub files: Vec<UploadedFile>,
}

impl ConnectorCommand {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `(key, value)` pairs, keeping repeated keys.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut cmd = Self::default();
        for (key, value) in pairs {
            cmd.push(key.as_ref(), value);
        }
        cmd
    }

    pub fn push(&mut self, key: &str, value: impl Into<String>) {
        let key = key.strip_suffix("[]").unwrap_or(key);
        self.args.entry(key.to_string()).or_default().push(value.into());
    }

    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.push(key, value);
        self
    }

    pub fn with_file(mut self, file: UploadedFile) -> Self {
        self.files.push(file);
        self
    }

    pub fn cmd(&self) -> Option<&str> {
        self.get("cmd").filter(|c| !c.is_empty())
    }

    /// First value of `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.args
            .get(key)
            .and_then(|v| v.first())
            .map(String::as_str)
    }

    /// Every value of `key`, empty values dropped.
    pub fn get_all(&self, key: &str) -> Vec<String> {
        self.args
            .get(key)
            .map(|v| v.iter().filter(|s| !s.is_empty()).cloned().collect())
            .unwrap_or_default()
    }

    /// Value of `key` parsed as a `0/1` flag.
    pub fn flag(&self, key: &str) -> bool {
        self.get(key).and_then(|v| v.parse::<u8>().ok()) == Some(1)
    }

    pub fn int(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(|v| v.trim().parse().ok())
    }

    /// Entries whose key starts with `prefix` (e.g. `hashes[...]`).
    pub fn with_prefix(&self, prefix: &str) -> HashMap<String, String> {
        self.args
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .filter_map(|(k, v)| v.first().map(|first| (k.clone(), first.clone())))
            .collect()
    }

    /// Copy of the parameters without any uploaded bodies.
    pub fn without_files(&self) -> Self {
        Self {
            args: self.args.clone(),
            files: vec![],
        }
    }
}

/// Chunk coordinates parsed from `<name>.<no>_<last>.part`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkInfo {
    pub file_name: String,
    pub chunk_no: u32,
    pub total_chunks: u32,
}

impl ChunkInfo {
    pub fn parse(chunk_name: &str) -> Result<Self> {
        let invalid = || ConnectorError::CommandParams(CMD_UPLOAD.to_string());

        let without_part = chunk_name.rsplit_once('.').ok_or_else(invalid)?.0;
        let (file_name, numbers) = without_part.rsplit_once('.').ok_or_else(invalid)?;
        let (no, last) = numbers.split_once('_').ok_or_else(invalid)?;
        let chunk_no: u32 = no.parse().map_err(|_| invalid())?;
        let last: u32 = last.parse().map_err(|_| invalid())?;

        if file_name.is_empty() || chunk_no > last {
            return Err(invalid());
        }

        Ok(Self {
            file_name: file_name.to_string(),
            chunk_no,
            total_chunks: last + 1,
        })
    }
}

/// Byte range `start,length,total` carried by a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeInfo {
    pub start: u64,
    pub length: u64,
    pub total: u64,
}

impl RangeInfo {
    pub fn parse(range: &str) -> Result<Self> {
        let parts: Vec<u64> = range
            .split(',')
            .map(|p| p.trim().parse::<u64>())
            .collect::<std::result::Result<_, _>>()
            .map_err(|_| ConnectorError::CommandParams(CMD_UPLOAD.to_string()))?;

        match parts.as_slice() {
            [start, length, total] => Ok(Self {
                start: *start,
                length: *length,
                total: *total,
            }),
            _ => Err(ConnectorError::CommandParams(CMD_UPLOAD.to_string())),
        }
    }
}

/// Resolved targets shared by the multi-target verbs.
#[derive(Debug, Clone, Default)]
pub struct TargetsCommand {
    pub targets: Vec<PathInfo>,
}

impl TargetsCommand {
    pub fn new(targets: Vec<PathInfo>) -> Self {
        Self { targets }
    }

    /// The one volume every target belongs to, if there is exactly one.
    pub fn single_volume(&self) -> Option<Arc<Volume>> {
        let first = self.targets.first()?;
        self.targets
            .iter()
            .all(|t| t.same_volume(first))
            .then(|| first.volume.clone())
    }
}

#[derive(Debug, Clone)]
pub struct OpenCommand {
    pub target: Option<PathInfo>,
    /// Volume the command runs against (the target's, or the first one).
    pub volume: Arc<Volume>,
    pub init: bool,
    pub tree: bool,
    pub mimes: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct LsCommand {
    pub target: PathInfo,
    pub intersect: Vec<String>,
    pub mimes: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct TreeCommand {
    pub target: PathInfo,
}

#[derive(Debug, Clone)]
pub struct ParentsCommand {
    pub target: PathInfo,
}

#[derive(Debug, Clone)]
pub struct InfoCommand {
    pub targets: TargetsCommand,
}

#[derive(Debug, Clone)]
pub struct MkdirCommand {
    pub target: PathInfo,
    pub name: Option<String>,
    pub dirs: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct MkfileCommand {
    pub target: PathInfo,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct RenameCommand {
    pub target: PathInfo,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct RmCommand {
    pub targets: TargetsCommand,
}

#[derive(Debug, Clone)]
pub struct PasteCommand {
    pub targets: TargetsCommand,
    pub dst: PathInfo,
    pub cut: bool,
    pub renames: Vec<String>,
    pub suffix: String,
}

#[derive(Debug, Clone)]
pub struct DuplicateCommand {
    pub targets: TargetsCommand,
}

#[derive(Debug, Clone)]
pub struct SizeCommand {
    pub targets: TargetsCommand,
}

#[derive(Debug, Clone)]
pub struct DimCommand {
    pub target: PathInfo,
}

#[derive(Debug, Clone)]
pub struct TmbCommand {
    pub targets: TargetsCommand,
}

#[derive(Debug, Clone)]
pub struct FileCommand {
    pub target: PathInfo,
    pub download: bool,
    pub reqid: Option<String>,
    pub cpath: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GetCommand {
    pub target: PathInfo,
    pub current: Option<PathInfo>,
    pub conv: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PutCommand {
    pub target: PathInfo,
    pub content: String,
    pub encoding: Option<String>,
    /// Source file when `encoding == "hash"`.
    pub content_path: Option<PathInfo>,
}

/// Image transformation requested by `resize`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResizeMode {
    Resize { width: u32, height: u32 },
    Crop { x: u32, y: u32, width: u32, height: u32 },
    Rotate { degree: i32, background: Option<String> },
}

#[derive(Debug, Clone)]
pub struct ResizeCommand {
    pub target: PathInfo,
    pub mode: ResizeMode,
    pub quality: Option<u8>,
}

#[derive(Debug, Clone)]
pub struct ArchiveCommand {
    pub target: PathInfo,
    pub targets: TargetsCommand,
    pub name: String,
    pub mime_type: String,
}

#[derive(Debug, Clone)]
pub struct ExtractCommand {
    pub target: PathInfo,
    pub makedir: bool,
}

#[derive(Debug, Clone)]
pub struct SearchCommand {
    pub target: PathInfo,
    pub q: String,
    pub mimes: Vec<String>,
    pub search_type: Option<String>,
}

#[derive(Debug, Clone)]
pub struct UploadCommand {
    pub target: PathInfo,
    pub files: Vec<UploadedFile>,
    pub upload_paths: Vec<PathInfo>,
    pub names: Vec<String>,
    pub mtimes: Vec<i64>,
    pub renames: Vec<String>,
    pub suffix: String,
    pub hashes: HashMap<String, String>,
    pub overwrite: Option<bool>,
    pub mimes: Option<String>,
    /// Upload name (`upload`), set for chunk merges and the fail marker.
    pub upload_name: Option<String>,
    pub chunk: Option<String>,
    pub cid: Option<String>,
    pub range: Option<RangeInfo>,
}

impl UploadCommand {
    pub fn is_chunking(&self) -> bool {
        self.chunk.as_deref().is_some_and(|c| !c.is_empty())
    }

    pub fn is_chunk_merge(&self) -> bool {
        self.is_chunking() && self.cid.as_deref().map_or(true, str::is_empty)
    }

    /// A merge or a plain upload, as opposed to one chunk of many.
    pub fn is_final_uploading(&self) -> bool {
        !self.is_chunking() || self.is_chunk_merge()
    }

    pub fn is_chunk_fail(&self) -> bool {
        self.upload_name.as_deref() == Some(CHUNK_FAIL) && self.mimes.as_deref() == Some(CHUNK_FAIL)
    }

    pub fn chunk_info(&self) -> Result<ChunkInfo> {
        let chunk = self
            .chunk
            .as_deref()
            .ok_or_else(|| ConnectorError::CommandParams(CMD_UPLOAD.to_string()))?;
        ChunkInfo::parse(chunk)
    }

    /// Whether an existing file may be overwritten, falling back to the volume default.
    pub fn overwrite(&self) -> bool {
        self.overwrite.unwrap_or(self.target.volume.upload_overwrite)
    }
}

#[derive(Debug, Clone)]
pub struct ZipdlCommand {
    pub targets: TargetsCommand,
}

/// Second phase of `zipdl`: stream a previously built archive.
#[derive(Debug, Clone)]
pub struct ZipdlRawCommand {
    pub cwd: PathInfo,
    pub key: String,
    pub name: String,
    pub mime: String,
}

#[derive(Debug, Clone)]
pub struct AbortCommand {
    pub id: String,
}

/// A fully resolved command, one variant per verb.
#[derive(Debug, Clone)]
pub enum Command {
    Open(OpenCommand),
    Ls(LsCommand),
    Tree(TreeCommand),
    Parents(ParentsCommand),
    Info(InfoCommand),
    Mkdir(MkdirCommand),
    Mkfile(MkfileCommand),
    Rename(RenameCommand),
    Rm(RmCommand),
    Paste(PasteCommand),
    Duplicate(DuplicateCommand),
    Size(SizeCommand),
    Dim(DimCommand),
    Tmb(TmbCommand),
    File(FileCommand),
    Get(GetCommand),
    Put(PutCommand),
    Resize(ResizeCommand),
    Archive(ArchiveCommand),
    Extract(ExtractCommand),
    /// Search over one or more roots (several when no target was given).
    Search(Vec<SearchCommand>),
    Upload(UploadCommand),
    Zipdl(ZipdlCommand),
    ZipdlRaw(ZipdlRawCommand),
    Abort(AbortCommand),
}

impl Command {
    /// Protocol verb of this command.
    pub fn verb(&self) -> &'static str {
        match self {
            Command::Open(_) => CMD_OPEN,
            Command::Ls(_) => CMD_LS,
            Command::Tree(_) => CMD_TREE,
            Command::Parents(_) => CMD_PARENTS,
            Command::Info(_) => CMD_INFO,
            Command::Mkdir(_) => CMD_MKDIR,
            Command::Mkfile(_) => CMD_MKFILE,
            Command::Rename(_) => CMD_RENAME,
            Command::Rm(_) => CMD_RM,
            Command::Paste(_) => CMD_PASTE,
            Command::Duplicate(_) => CMD_DUPLICATE,
            Command::Size(_) => CMD_SIZE,
            Command::Dim(_) => CMD_DIM,
            Command::Tmb(_) => CMD_TMB,
            Command::File(_) => CMD_FILE,
            Command::Get(_) => CMD_GET,
            Command::Put(_) => CMD_PUT,
            Command::Resize(_) => CMD_RESIZE,
            Command::Archive(_) => CMD_ARCHIVE,
            Command::Extract(_) => CMD_EXTRACT,
            Command::Search(_) => CMD_SEARCH,
            Command::Upload(_) => CMD_UPLOAD,
            Command::Zipdl(_) | Command::ZipdlRaw(_) => CMD_ZIPDL,
            Command::Abort(_) => CMD_ABORT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_array_keys_merge() {
        let cmd = ConnectorCommand::from_pairs([
            ("cmd", "rm"),
            ("targets[]", "v1_YQ"),
            ("targets[]", "v1_Yg"),
            ("targets", ""),
        ]);
        assert_eq!(cmd.cmd(), Some("rm"));
        assert_eq!(cmd.get_all("targets"), vec!["v1_YQ", "v1_Yg"]);
        assert!(cmd.get_all("missing").is_empty());
    }

    #[test]
    fn test_flag_and_int() {
        let cmd = ConnectorCommand::new()
            .with("init", "1")
            .with("tree", "0")
            .with("width", " 120 ");
        assert!(cmd.flag("init"));
        assert!(!cmd.flag("tree"));
        assert!(!cmd.flag("missing"));
        assert_eq!(cmd.int("width"), Some(120));
    }

    #[test]
    fn test_with_prefix() {
        let cmd = ConnectorCommand::new()
            .with("hashes[abc]", "a.txt")
            .with("hashes[def]", "b.txt")
            .with("target", "v1_");
        let hashes = cmd.with_prefix("hashes[");
        assert_eq!(hashes.len(), 2);
        assert_eq!(hashes["hashes[abc]"], "a.txt");
    }

    #[test]
    fn test_chunk_info_parse() {
        let info = ChunkInfo::parse("report.final.pdf.2_4.part").unwrap();
        assert_eq!(info.file_name, "report.final.pdf");
        assert_eq!(info.chunk_no, 2);
        assert_eq!(info.total_chunks, 5);
    }

    #[test]
    fn test_chunk_info_rejects_garbage() {
        assert!(ChunkInfo::parse("nochunk").is_err());
        assert!(ChunkInfo::parse("a.txt.x_1.part").is_err());
        assert!(ChunkInfo::parse("a.txt.3_1.part").is_err());
        assert!(ChunkInfo::parse(".0_1.part").is_err());
    }

    #[test]
    fn test_range_info_parse() {
        let range = RangeInfo::parse("0,1024,4096").unwrap();
        assert_eq!(range.start, 0);
        assert_eq!(range.length, 1024);
        assert_eq!(range.total, 4096);
        assert!(RangeInfo::parse("0,1").is_err());
        assert!(RangeInfo::parse("a,b,c").is_err());
    }
}
