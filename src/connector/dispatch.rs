//! Per-verb parameter parsing and execution.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::Connector;
use crate::command::*;
use crate::path::PathInfo;
use crate::response::{AbortResponse, ConnectorResult, SearchResponse};
use crate::volume::Volume;
use crate::{ConnectorError, Result};

/// Default backup suffix for `paste` and `upload` renames.
const DEFAULT_SUFFIX: &str = "~";

/// Encoding label telling `put` to copy content from another target.
const ENCODING_HASH: &str = "hash";

fn param<'a>(args: &'a ConnectorCommand, key: &str) -> Option<&'a str> {
    args.get(key).filter(|v| !v.is_empty())
}

fn owned(args: &ConnectorCommand, key: &str) -> Option<String> {
    param(args, key).map(str::to_string)
}

fn uint(args: &ConnectorCommand, key: &str) -> u32 {
    args.int(key)
        .and_then(|v| u32::try_from(v).ok())
        .unwrap_or_default()
}

fn params_error(verb: &str) -> ConnectorError {
    ConnectorError::CommandParams(verb.to_string())
}

fn single_volume(targets: &TargetsCommand, verb: &str) -> Result<Arc<Volume>> {
    targets.single_volume().ok_or_else(|| params_error(verb))
}

/// `targets` minus every entry that is the parent of another one.
fn drop_parents(targets: Vec<PathInfo>) -> Vec<PathInfo> {
    let parents: HashSet<PathBuf> = targets
        .iter()
        .filter_map(|t| t.full_path().parent().map(Path::to_path_buf))
        .collect();

    targets
        .into_iter()
        .filter(|t| !parents.contains(t.full_path()))
        .collect()
}

async fn require_existing_file(path: &PathInfo) -> Result<()> {
    if path.is_directory() {
        return Err(ConnectorError::NotFile);
    }
    if !tokio::fs::try_exists(path.full_path()).await.unwrap_or(false) {
        return Err(ConnectorError::FileNotFound);
    }
    Ok(())
}

impl Connector {
    async fn target(&self, args: &ConnectorCommand, verb: &str) -> Result<PathInfo> {
        let hash = param(args, "target").ok_or_else(|| params_error(verb))?;
        self.resolve(hash, true, true).await
    }

    async fn optional_target(&self, args: &ConnectorCommand, key: &str) -> Result<Option<PathInfo>> {
        match param(args, key) {
            Some(hash) => Ok(Some(self.resolve(hash, true, true).await?)),
            None => Ok(None),
        }
    }

    async fn targets(&self, args: &ConnectorCommand) -> Result<TargetsCommand> {
        let hashes = args.get_all("targets");
        Ok(TargetsCommand::new(self.resolve_all(&hashes, true, true).await?))
    }

    /// Targets of a verb that must stay on one volume.
    async fn volume_targets(&self, args: &ConnectorCommand, verb: &str) -> Result<TargetsCommand> {
        let targets = self.targets(args).await?;
        single_volume(&targets, verb)?;
        Ok(targets)
    }

    /// Build the typed command for `verb`, resolving every path it names.
    pub(super) async fn parse(&self, verb: &str, args: &ConnectorCommand) -> Result<Command> {
        let command = match verb {
            CMD_OPEN => Command::Open(self.parse_open(args).await?),
            CMD_LS => Command::Ls(LsCommand {
                target: self.target(args, verb).await?,
                intersect: args.get_all("intersect"),
                mimes: args.get_all("mimes"),
            }),
            CMD_TREE => Command::Tree(TreeCommand {
                target: self.target(args, verb).await?,
            }),
            CMD_PARENTS => Command::Parents(ParentsCommand {
                target: self.target(args, verb).await?,
            }),
            CMD_INFO => Command::Info(InfoCommand {
                targets: self.volume_targets(args, verb).await?,
            }),
            CMD_MKDIR => Command::Mkdir(MkdirCommand {
                target: self.target(args, verb).await?,
                name: owned(args, "name"),
                dirs: args.get_all("dirs"),
            }),
            CMD_MKFILE => Command::Mkfile(MkfileCommand {
                target: self.target(args, verb).await?,
                name: args.get("name").unwrap_or_default().to_string(),
            }),
            CMD_RENAME => Command::Rename(RenameCommand {
                target: self.target(args, verb).await?,
                name: args.get("name").unwrap_or_default().to_string(),
            }),
            CMD_RM => {
                let targets = self.volume_targets(args, verb).await?;
                Command::Rm(RmCommand {
                    targets: TargetsCommand::new(drop_parents(targets.targets)),
                })
            }
            CMD_PASTE => {
                let targets = self.volume_targets(args, verb).await?;
                let dst = param(args, "dst").ok_or_else(|| params_error(verb))?;
                Command::Paste(PasteCommand {
                    targets,
                    dst: self.resolve(dst, true, false).await?,
                    cut: args.flag("cut"),
                    renames: args.get_all("renames"),
                    suffix: param(args, "suffix").unwrap_or(DEFAULT_SUFFIX).to_string(),
                })
            }
            CMD_DUPLICATE => Command::Duplicate(DuplicateCommand {
                targets: self.volume_targets(args, verb).await?,
            }),
            CMD_SIZE => Command::Size(SizeCommand {
                targets: self.volume_targets(args, verb).await?,
            }),
            CMD_DIM => Command::Dim(DimCommand {
                target: self.target(args, verb).await?,
            }),
            CMD_TMB => Command::Tmb(TmbCommand {
                targets: self.volume_targets(args, verb).await?,
            }),
            CMD_FILE => {
                let target = self.target(args, verb).await?;
                require_existing_file(&target).await?;
                Command::File(FileCommand {
                    target,
                    download: args.flag("download"),
                    reqid: owned(args, "reqid"),
                    cpath: owned(args, "cpath"),
                })
            }
            CMD_GET => Command::Get(GetCommand {
                target: self.target(args, verb).await?,
                current: self.optional_target(args, "current").await?,
                conv: owned(args, "conv"),
            }),
            CMD_PUT => Command::Put(self.parse_put(args).await?),
            CMD_RESIZE => Command::Resize(ResizeCommand {
                target: self.target(args, verb).await?,
                mode: parse_resize_mode(args)?,
                quality: args.int("quality").and_then(|q| u8::try_from(q).ok()),
            }),
            CMD_ARCHIVE => Command::Archive(self.parse_archive(args).await?),
            CMD_EXTRACT => Command::Extract(ExtractCommand {
                target: self.target(args, verb).await?,
                makedir: args.flag("makedir"),
            }),
            CMD_SEARCH => Command::Search(self.parse_search(args).await?),
            CMD_UPLOAD => Command::Upload(self.parse_upload(args).await?),
            CMD_ZIPDL if args.flag("download") => Command::ZipdlRaw(self.parse_zipdl_raw(args).await?),
            CMD_ZIPDL => Command::Zipdl(ZipdlCommand {
                targets: self.volume_targets(args, verb).await?,
            }),
            CMD_ABORT => Command::Abort(AbortCommand {
                id: owned(args, "id").ok_or_else(|| params_error(verb))?,
            }),
            _ => return Err(ConnectorError::UnknownCommand),
        };
        Ok(command)
    }

    async fn parse_open(&self, args: &ConnectorCommand) -> Result<OpenCommand> {
        let target = self.optional_target(args, "target").await?;
        let volume = match &target {
            Some(target) => target.volume.clone(),
            None => self
                .volumes
                .first()
                .cloned()
                .ok_or(ConnectorError::FileNotFound)?,
        };

        Ok(OpenCommand {
            target,
            volume,
            init: args.flag("init"),
            tree: args.flag("tree"),
            mimes: args.get_all("mimes"),
        })
    }

    async fn parse_put(&self, args: &ConnectorCommand) -> Result<PutCommand> {
        let target = self.target(args, CMD_PUT).await?;
        if target.is_directory() {
            return Err(ConnectorError::NotFile);
        }
        let content = args.get("content").unwrap_or_default().to_string();
        let encoding = owned(args, "encoding");

        let content_path = if encoding.as_deref() == Some(ENCODING_HASH) {
            let source = self.resolve(&content, true, true).await?;
            require_existing_file(&source).await?;
            Some(source)
        } else {
            None
        };

        Ok(PutCommand {
            target,
            content,
            encoding,
            content_path,
        })
    }

    async fn parse_archive(&self, args: &ConnectorCommand) -> Result<ArchiveCommand> {
        let target = self.target(args, CMD_ARCHIVE).await?;
        let targets = self.targets(args).await?;
        if targets.targets.is_empty() || !target.is_directory() {
            return Err(params_error(CMD_ARCHIVE));
        }
        if targets.targets.iter().any(|t| !t.same_volume(&target)) {
            return Err(params_error(CMD_ARCHIVE));
        }

        Ok(ArchiveCommand {
            target,
            targets,
            name: args.get("name").unwrap_or_default().to_string(),
            mime_type: args.get("type").unwrap_or_default().to_string(),
        })
    }

    /// One search per root: the target, or every volume when there is none.
    async fn parse_search(&self, args: &ConnectorCommand) -> Result<Vec<SearchCommand>> {
        let roots = match self.optional_target(args, "target").await? {
            Some(target) => vec![target],
            None => {
                let mut roots = Vec::with_capacity(self.volumes.len());
                for volume in &self.volumes {
                    roots.push(self.resolve(&volume.volume_id, false, false).await?);
                }
                roots
            }
        };

        let q = args.get("q").unwrap_or_default().to_string();
        let mimes = args.get_all("mimes");
        let search_type = owned(args, "type");

        Ok(roots
            .into_iter()
            .map(|target| SearchCommand {
                target,
                q: q.clone(),
                mimes: mimes.clone(),
                search_type: search_type.clone(),
            })
            .collect())
    }

    pub(super) async fn parse_upload(&self, args: &ConnectorCommand) -> Result<UploadCommand> {
        let target = self.target(args, CMD_UPLOAD).await?;
        let upload_paths = self
            .resolve_all(&args.get_all("upload_path"), true, false)
            .await?;
        if upload_paths.iter().any(|p| !p.same_volume(&target)) {
            return Err(params_error(CMD_UPLOAD));
        }

        let range = param(args, "range").map(RangeInfo::parse).transpose()?;
        let overwrite = param(args, "overwrite")
            .and_then(|v| v.parse::<u8>().ok())
            .map(|v| v != 0);

        Ok(UploadCommand {
            target,
            files: args.files.clone(),
            upload_paths,
            names: args.get_all("name"),
            mtimes: args
                .get_all("mtime")
                .iter()
                .filter_map(|m| m.trim().parse().ok())
                .collect(),
            renames: args.get_all("renames"),
            suffix: param(args, "suffix").unwrap_or(DEFAULT_SUFFIX).to_string(),
            hashes: args.with_prefix("hashes["),
            overwrite,
            mimes: owned(args, "mimes"),
            upload_name: owned(args, "upload"),
            chunk: owned(args, "chunk"),
            cid: owned(args, "cid"),
            range,
        })
    }

    async fn parse_zipdl_raw(&self, args: &ConnectorCommand) -> Result<ZipdlRawCommand> {
        let targets = args.get_all("targets");
        let [cwd, key, name, mime, ..] = targets.as_slice() else {
            return Err(params_error(CMD_ZIPDL));
        };

        Ok(ZipdlRawCommand {
            cwd: self.resolve(cwd, true, false).await?,
            key: key.clone(),
            name: name.clone(),
            mime: mime.clone(),
        })
    }

    /// Run a parsed command against its volume's driver.
    pub(super) async fn run(&self, command: Command, token: &CancellationToken) -> Result<ConnectorResult> {
        let result = match command {
            Command::Open(cmd) => {
                let mut response = cmd.volume.driver.open(&cmd, token).await?;
                if cmd.tree {
                    for (idx, volume) in self.volumes.iter().enumerate() {
                        if response.cwd_is_root && Arc::ptr_eq(volume, &cmd.volume) {
                            continue;
                        }
                        let root = volume.driver.root_info(volume).await?;
                        let at = idx.min(response.files.len());
                        response.files.insert(at, root);
                    }
                }
                ConnectorResult::success(&response)
            }
            Command::Ls(cmd) => ConnectorResult::success(&cmd.target.volume.driver.ls(&cmd, token).await?),
            Command::Tree(cmd) => {
                ConnectorResult::success(&cmd.target.volume.driver.tree(&cmd, token).await?)
            }
            Command::Parents(cmd) => {
                ConnectorResult::success(&cmd.target.volume.driver.parents(&cmd, token).await?)
            }
            Command::Info(cmd) => {
                let driver = single_volume(&cmd.targets, CMD_INFO)?.driver.clone();
                ConnectorResult::success(&driver.info(&cmd, token).await?)
            }
            Command::Mkdir(cmd) => {
                ConnectorResult::success(&cmd.target.volume.driver.mkdir(&cmd, token).await?)
            }
            Command::Mkfile(cmd) => {
                ConnectorResult::success(&cmd.target.volume.driver.mkfile(&cmd, token).await?)
            }
            Command::Rename(cmd) => {
                ConnectorResult::success(&cmd.target.volume.driver.rename(&cmd, token).await?)
            }
            Command::Rm(cmd) => {
                let driver = single_volume(&cmd.targets, CMD_RM)?.driver.clone();
                ConnectorResult::success(&driver.rm(&cmd, token).await?)
            }
            Command::Paste(cmd) => {
                ConnectorResult::success(&cmd.dst.volume.driver.paste(&cmd, token).await?)
            }
            Command::Duplicate(cmd) => {
                let driver = single_volume(&cmd.targets, CMD_DUPLICATE)?.driver.clone();
                ConnectorResult::success(&driver.duplicate(&cmd, token).await?)
            }
            Command::Size(cmd) => {
                let driver = single_volume(&cmd.targets, CMD_SIZE)?.driver.clone();
                ConnectorResult::success(&driver.size(&cmd, token).await?)
            }
            Command::Dim(cmd) => {
                ConnectorResult::success(&cmd.target.volume.driver.dim(&cmd, token).await?)
            }
            Command::Tmb(cmd) => {
                let driver = single_volume(&cmd.targets, CMD_TMB)?.driver.clone();
                ConnectorResult::success(&driver.tmb(&cmd, token).await?)
            }
            Command::File(cmd) => ConnectorResult::file(cmd.target.volume.driver.file(&cmd, token).await?),
            Command::Get(cmd) => {
                ConnectorResult::success(&cmd.target.volume.driver.get(&cmd, token).await?)
            }
            Command::Put(cmd) => {
                ConnectorResult::success(&cmd.target.volume.driver.put(&cmd, token).await?)
            }
            Command::Resize(cmd) => {
                ConnectorResult::success(&cmd.target.volume.driver.resize(&cmd, token).await?)
            }
            Command::Archive(cmd) => {
                ConnectorResult::success(&cmd.target.volume.driver.archive(&cmd, token).await?)
            }
            Command::Extract(cmd) => {
                ConnectorResult::success(&cmd.target.volume.driver.extract(&cmd, token).await?)
            }
            Command::Search(cmds) => {
                let mut response = SearchResponse::default();
                for cmd in &cmds {
                    response.concat(cmd.target.volume.driver.search(cmd, token).await?);
                }
                ConnectorResult::success(&response)
            }
            Command::Upload(cmd) => self.upload(cmd, token).await?,
            Command::Zipdl(cmd) => {
                let driver = single_volume(&cmd.targets, CMD_ZIPDL)?.driver.clone();
                ConnectorResult::success(&driver.zipdl(&cmd, token).await?)
            }
            Command::ZipdlRaw(cmd) => {
                ConnectorResult::file(cmd.cwd.volume.driver.zipdl_raw(&cmd, token).await?)
            }
            Command::Abort(cmd) => ConnectorResult::success(&self.abort(&cmd, token).await?),
        };
        Ok(result)
    }

    async fn upload(&self, cmd: UploadCommand, token: &CancellationToken) -> Result<ConnectorResult> {
        let volume = cmd.target.volume.clone();

        if cmd.is_chunk_fail() {
            volume.driver.abort_upload(&cmd, token).await?;
            return Err(ConnectorError::ConnectionAborted);
        }

        if cmd.is_chunking() && !cmd.is_chunk_merge() {
            let total = cmd.range.map(|r| r.total).ok_or_else(|| params_error(CMD_UPLOAD))?;
            match cmd.files.as_slice() {
                [file] if file.len() <= total => {}
                _ => return Err(params_error(CMD_UPLOAD)),
            }
        } else if cmd.is_chunk_merge()
            && (cmd.upload_name.as_deref().map_or(true, |n| n.trim().is_empty())
                || cmd.chunk.as_deref().map_or(true, |c| c.trim().is_empty()))
        {
            return Err(params_error(CMD_UPLOAD));
        }

        if let Some(max) = volume.max_upload_size {
            let too_big = match cmd.range {
                Some(range) if cmd.is_chunking() => range.total > max,
                _ => cmd.files.iter().any(|f| f.len() > max),
            };
            if too_big {
                return Err(ConnectorError::UploadFileSize);
            }
        }

        Ok(ConnectorResult::success(&volume.driver.upload(&cmd, token).await?))
    }

    /// Cancel a registered request, rolling back its chunk upload if it was one.
    async fn abort(&self, cmd: &AbortCommand, token: &CancellationToken) -> Result<AbortResponse> {
        let (success, saved) = self.manager.abort(&cmd.id);
        tracing::debug!(reqid = %cmd.id, success, "Abort requested");

        if let Some(saved) = saved.filter(|c| c.cmd() == Some(CMD_UPLOAD)) {
            let upload = self.parse_upload(&saved).await?;
            if !upload.is_chunk_fail() {
                upload.target.volume.driver.abort_upload(&upload, token).await?;
            }
        }

        Ok(AbortResponse { success })
    }
}

fn parse_resize_mode(args: &ConnectorCommand) -> Result<ResizeMode> {
    match args.get("mode").unwrap_or_default() {
        "resize" => Ok(ResizeMode::Resize {
            width: uint(args, "width"),
            height: uint(args, "height"),
        }),
        "crop" => Ok(ResizeMode::Crop {
            x: uint(args, "x"),
            y: uint(args, "y"),
            width: uint(args, "width"),
            height: uint(args, "height"),
        }),
        "rotate" => Ok(ResizeMode::Rotate {
            degree: args
                .int("degree")
                .and_then(|d| i32::try_from(d).ok())
                .unwrap_or_default(),
            background: owned(args, "bg"),
        }),
        _ => Err(ConnectorError::UnknownCommand),
    }
}
