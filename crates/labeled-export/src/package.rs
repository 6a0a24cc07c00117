// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Au-Zone Technologies. All Rights Reserved.

//! Hand-off of the exported project to team files.
//!
//! Below the configured size limit the result directory is uploaded as is.
//! At or above the limit it is packed into a gzip compressed tar archive,
//! split into parts of `split_size` bytes (`<name>.tar.gz.001`, `.002`, ...),
//! and the directory holding the parts is uploaded instead. A single part
//! keeps the plain archive name.

use crate::{
    Error, ExportConfig, FileInfo, OutputSink, ProgressReporter, ProjectInfo,
    config::REMOTE_EXPORT_ROOT, writer::sanitize_path_component,
};
use flate2::{Compression, write::GzEncoder};
use log::{debug, info, warn};
use std::{
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};
use walkdir::WalkDir;

const GIB: f64 = (1024 * 1024 * 1024) as f64;

/// Where the export ended up.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputArtifact {
    /// The result directory was uploaded without archiving.
    Directory { remote_dir: String, file: FileInfo },
    /// The result was archived; `parts` lists the archive file names in
    /// order.
    Archive {
        remote_dir: String,
        parts: Vec<String>,
        file: FileInfo,
    },
}

impl OutputArtifact {
    pub fn remote_dir(&self) -> &str {
        match self {
            OutputArtifact::Directory { remote_dir, .. } => remote_dir,
            OutputArtifact::Archive { remote_dir, .. } => remote_dir,
        }
    }

    /// The team file registered as task output.
    pub fn file(&self) -> &FileInfo {
        match self {
            OutputArtifact::Directory { file, .. } => file,
            OutputArtifact::Archive { file, .. } => file,
        }
    }
}

/// Total size in bytes of the regular files below `path`.
pub fn dir_size(path: &Path) -> Result<u64, Error> {
    let mut size = 0;
    for entry in WalkDir::new(path) {
        let entry = entry?;
        if entry.file_type().is_file() {
            size += entry.metadata()?.len();
        }
    }
    Ok(size)
}

/// Timestamp naming the remote and archive directories of a run.
pub fn timestamp() -> String {
    chrono::Local::now().format("%Y_%m_%d_%H_%M_%S").to_string()
}

/// Name of the archive of a project.
pub fn archive_name(project: &ProjectInfo) -> String {
    format!(
        "{}_{}.tar.gz",
        project.id(),
        sanitize_path_component(project.name())
    )
}

/// Writer rolling over to a new numbered file every `split_size` bytes.
pub struct SplitWriter {
    base: PathBuf,
    split_size: u64,
    current: Option<BufWriter<File>>,
    written: u64,
    parts: Vec<PathBuf>,
}

impl SplitWriter {
    pub fn new(base: &Path, split_size: u64) -> Self {
        SplitWriter {
            base: base.to_path_buf(),
            split_size: split_size.max(1),
            current: None,
            written: 0,
            parts: Vec::new(),
        }
    }

    fn part_path(&self, index: usize) -> PathBuf {
        let mut name = self.base.as_os_str().to_owned();
        name.push(format!(".{:03}", index));
        PathBuf::from(name)
    }

    fn roll(&mut self) -> std::io::Result<()> {
        if let Some(mut current) = self.current.take() {
            current.flush()?;
        }
        let path = self.part_path(self.parts.len() + 1);
        self.current = Some(BufWriter::new(File::create(&path)?));
        self.parts.push(path);
        self.written = 0;
        Ok(())
    }

    /// Flushes the last part and returns the part paths in order. A single
    /// part is renamed to the base name.
    pub fn finish(mut self) -> std::io::Result<Vec<PathBuf>> {
        match self.current.take() {
            Some(mut current) => current.flush()?,
            None => {
                File::create(&self.base)?;
                return Ok(vec![self.base]);
            }
        }
        if self.parts.len() == 1 {
            std::fs::rename(&self.parts[0], &self.base)?;
            return Ok(vec![self.base]);
        }
        Ok(self.parts)
    }
}

impl Write for SplitWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.current.is_none() || self.written >= self.split_size {
            self.roll()?;
        }
        let remaining = (self.split_size - self.written) as usize;
        let len = buf.len().min(remaining);
        let written = match self.current.as_mut() {
            Some(current) => current.write(&buf[..len])?,
            None => return Err(std::io::Error::other("split writer has no open part")),
        };
        self.written += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self.current.as_mut() {
            Some(current) => current.flush(),
            None => Ok(()),
        }
    }
}

/// Packs `dir` into a gzip compressed tar archive at `archive`, split into
/// parts of at most `split_size` bytes. Entries are stored below the name
/// of `dir`.
pub fn write_split_archive(
    dir: &Path,
    archive: &Path,
    split_size: u64,
) -> Result<Vec<PathBuf>, Error> {
    let root = dir
        .file_name()
        .map(|n| n.to_os_string())
        .ok_or_else(|| Error::InvalidParameters(format!("cannot archive {:?}", dir)))?;

    let encoder = GzEncoder::new(SplitWriter::new(archive, split_size), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);
    builder.append_dir_all(&root, dir)?;
    let parts = builder.into_inner()?.finish()?.finish()?;
    Ok(parts)
}

fn part_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

async fn resolve(sink: &dyn OutputSink, remote_path: &str) -> Result<FileInfo, Error> {
    match sink.file_info(remote_path).await? {
        Some(info) => Ok(info),
        None => {
            log::error!("uploaded file {} not found in team files", remote_path);
            Err(Error::InvalidResponse)
        }
    }
}

/// Workflow bookkeeping never fails the export.
async fn register_workflow_output(sink: &dyn OutputSink, file: &FileInfo) {
    if let Err(err) = sink.register_workflow_output(file).await {
        warn!("Failed to add {} to the workflow: {}", file.path(), err);
    }
}

/// Uploads the result directory of `project`, archiving it first when it
/// reaches the configured size limit, and registers it as task output.
///
/// `timestamp` names the remote directory below the export root and the
/// local directory holding the archive.
pub async fn package(
    project: &ProjectInfo,
    config: &ExportConfig,
    sink: &dyn OutputSink,
    timestamp: &str,
    progress: &dyn ProgressReporter,
) -> Result<OutputArtifact, Error> {
    let result_dir = config.result_dir();
    let remote_dir = format!("{}/{}", REMOTE_EXPORT_ROOT, timestamp);
    let limit = config.size_limit();
    let size = dir_size(&result_dir)?;
    let size_gb = size as f64 / GIB;
    let limit_gb = limit as f64 / GIB;

    if size < limit {
        debug!(
            "Result archive size ({:.2} GB) less than limit {} GB",
            size_gb, limit_gb
        );
        let remote_dir = sink
            .upload_directory(&result_dir, &remote_dir, progress)
            .await?;
        let meta = format!(
            "{}/{}/meta.json",
            remote_dir,
            sanitize_path_component(project.name())
        );
        let file = resolve(sink, &meta).await?;
        sink.register_output(&file, &remote_dir).await?;
        register_workflow_output(sink, &file).await;
        info!("Project {} has been successfully exported.", project.name());
        return Ok(OutputArtifact::Directory { remote_dir, file });
    }

    info!(
        "Result archive size ({:.2} GB) more than {} GB",
        size_gb, limit_gb
    );
    let split_mb = config.split_size() / (1024 * 1024);
    info!("It will be uploaded with splitting by {}MB", split_mb);

    let archive_dir = config.data_dir().join(timestamp);
    if tokio::fs::try_exists(&archive_dir).await? {
        tokio::fs::remove_dir_all(&archive_dir).await?;
    }
    tokio::fs::create_dir_all(&archive_dir).await?;
    let archive = archive_dir.join(archive_name(project));

    let split_size = config.split_size();
    let source = result_dir.clone();
    let parts =
        tokio::task::spawn_blocking(move || write_split_archive(&source, &archive, split_size))
            .await??;
    info!(
        "Result directory is archived{}",
        if parts.len() > 1 { " with splitting" } else { "" }
    );

    tokio::fs::remove_dir_all(&result_dir).await?;

    let remote_dir = sink
        .upload_directory(&archive_dir, &remote_dir, progress)
        .await?;
    let parts: Vec<String> = parts.iter().map(|p| part_name(p)).collect();
    let first = parts.first().cloned().unwrap_or_default();
    let file = resolve(sink, &format!("{}/{}", remote_dir, first)).await?;
    sink.register_output(&file, &remote_dir).await?;
    register_workflow_output(sink, &file).await;
    info!("Uploaded to Team-Files: {}", remote_dir);

    Ok(OutputArtifact::Archive {
        remote_dir,
        parts,
        file,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;
    use tempfile::TempDir;

    fn fill(dir: &Path) {
        std::fs::create_dir_all(dir.join("proj/ds/ann")).unwrap();
        std::fs::write(dir.join("proj/meta.json"), b"{\"classes\": []}").unwrap();
        let noisy: Vec<u8> = (0..20_000u32).map(|i| (i * 7919 % 251) as u8).collect();
        std::fs::write(dir.join("proj/ds/ann/a.json"), &noisy).unwrap();
    }

    #[test]
    fn test_dir_size() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("result");
        fill(&dir);
        assert_eq!(dir_size(&dir).unwrap(), 15 + 20_000);
    }

    #[test]
    fn test_archive_name() {
        let project = ProjectInfo::new(7.into(), "Road/Signs", "images");
        assert_eq!(archive_name(&project), "7_Road_Signs.tar.gz");
    }

    #[test]
    fn test_split_writer_parts() {
        let temp = TempDir::new().unwrap();
        let base = temp.path().join("out.tar.gz");
        let mut writer = SplitWriter::new(&base, 4);
        writer.write_all(b"0123456789").unwrap();
        let parts = writer.finish().unwrap();
        let names: Vec<String> = parts.iter().map(|p| part_name(p)).collect();
        assert_eq!(names, vec!["out.tar.gz.001", "out.tar.gz.002", "out.tar.gz.003"]);
        assert_eq!(std::fs::read(&parts[2]).unwrap(), b"89");
    }

    #[test]
    fn test_split_writer_single_part_renamed() {
        let temp = TempDir::new().unwrap();
        let base = temp.path().join("out.tar.gz");
        let mut writer = SplitWriter::new(&base, 100);
        writer.write_all(b"small").unwrap();
        assert_eq!(writer.finish().unwrap(), vec![base.clone()]);
        assert_eq!(std::fs::read(base).unwrap(), b"small");
    }

    #[test]
    fn test_split_archive_reassembles() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("export_only_labeled_items");
        fill(&dir);
        let archive = temp.path().join("1_proj.tar.gz");

        let parts = write_split_archive(&dir, &archive, 64).unwrap();
        assert!(parts.len() > 1);

        let mut joined = Vec::new();
        for part in &parts {
            joined.extend(std::fs::read(part).unwrap());
        }
        let mut tar_bytes = Vec::new();
        GzDecoder::new(joined.as_slice())
            .read_to_end(&mut tar_bytes)
            .unwrap();
        let mut archive = tar::Archive::new(tar_bytes.as_slice());
        let names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect();
        assert!(
            names
                .iter()
                .any(|n| n == "export_only_labeled_items/proj/meta.json")
        );
        assert!(
            names
                .iter()
                .any(|n| n == "export_only_labeled_items/proj/ds/ann/a.json")
        );
    }
}
