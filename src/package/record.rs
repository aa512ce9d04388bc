// src/package/record.rs

//! Record stream encoding and decoding
//!
//! A sealed tree is a flat sequence of records in pre-order. Every node
//! becomes one record; a directory's children follow it and an end-marker
//! closes it. File payloads sit directly after their record header.
//!
//! ```text
//! record   = kind:u8 [ name:str components ] body
//! components = count:u16 str*
//! body     = (directory)  nothing
//!          | (file)       len:u64 payload[len]
//!          | (link)       target_kind:u8 target:str display:str
//!          | (env)        variable:str value:str mode:u8
//!          | (end)        nothing, and no name or components
//! ```
//!
//! The reader checks the stream against the size declared in the package
//! header: running short fails with `TruncatedStream`.

use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::sync::Arc;

use tracing::debug;

use super::wire::{self, CountingReader, CountingWriter};
use crate::components::ComponentSet;
use crate::error::{Error, Result};
use crate::tree::{ContentTree, EnvMode, FileSource, LinkTarget, NodeId, NodeKind, WalkEvent};

const KIND_DIRECTORY: u8 = 1;
const KIND_FILE: u8 = 2;
const KIND_LINK: u8 = 3;
const KIND_ENV: u8 = 4;
const KIND_END: u8 = 5;

const TARGET_PACKAGE: u8 = 0;
const TARGET_ABSOLUTE: u8 = 1;

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// One decoded record header
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Directory {
        name: String,
        components: ComponentSet,
    },
    /// Followed by `size` payload bytes
    File {
        name: String,
        components: ComponentSet,
        size: u64,
    },
    Link {
        name: String,
        components: ComponentSet,
        target: LinkTarget,
        display_name: String,
    },
    EnvironmentVariable {
        name: String,
        components: ComponentSet,
        variable: String,
        value: String,
        mode: EnvMode,
    },
    /// Closes the most recently opened directory
    EndDirectory,
}

impl Record {
    /// Build the record header for a tree node
    pub fn from_node(tree: &ContentTree, id: NodeId) -> Self {
        let node = tree.node(id);
        let name = node.name().to_string();
        let components = node.components().clone();

        match node.kind() {
            NodeKind::Directory => Record::Directory { name, components },
            NodeKind::File { size, .. } => Record::File {
                name,
                components,
                size: *size,
            },
            NodeKind::Link {
                target,
                display_name,
            } => Record::Link {
                name,
                components,
                target: target.clone(),
                display_name: display_name.clone(),
            },
            NodeKind::EnvironmentVariable {
                variable,
                value,
                mode,
            } => Record::EnvironmentVariable {
                name,
                components,
                variable: variable.clone(),
                value: value.clone(),
                mode: *mode,
            },
        }
    }

    /// Node name; empty for the end-marker and the root directory
    pub fn name(&self) -> &str {
        match self {
            Record::Directory { name, .. }
            | Record::File { name, .. }
            | Record::Link { name, .. }
            | Record::EnvironmentVariable { name, .. } => name,
            Record::EndDirectory => "",
        }
    }

    /// Component tags declared on the node
    pub fn components(&self) -> Option<&ComponentSet> {
        match self {
            Record::Directory { components, .. }
            | Record::File { components, .. }
            | Record::Link { components, .. }
            | Record::EnvironmentVariable { components, .. } => Some(components),
            Record::EndDirectory => None,
        }
    }

    fn kind(&self) -> u8 {
        match self {
            Record::Directory { .. } => KIND_DIRECTORY,
            Record::File { .. } => KIND_FILE,
            Record::Link { .. } => KIND_LINK,
            Record::EnvironmentVariable { .. } => KIND_ENV,
            Record::EndDirectory => KIND_END,
        }
    }
}

fn mode_id(mode: EnvMode) -> u8 {
    match mode {
        EnvMode::Set => 0,
        EnvMode::Append => 1,
        EnvMode::Prepend => 2,
    }
}

fn mode_from_id(id: u8) -> Result<EnvMode> {
    match id {
        0 => Ok(EnvMode::Set),
        1 => Ok(EnvMode::Append),
        2 => Ok(EnvMode::Prepend),
        other => Err(Error::InvalidPackage(format!(
            "unknown environment mode {}",
            other
        ))),
    }
}

/// Serializes records into a writer, counting bytes
pub struct RecordWriter<W: Write> {
    inner: CountingWriter<W>,
    records: u64,
}

impl<W: Write> RecordWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner: CountingWriter::new(inner),
            records: 0,
        }
    }

    /// Bytes written so far
    pub fn bytes_written(&self) -> u64 {
        self.inner.count()
    }

    /// Records written so far
    pub fn records_written(&self) -> u64 {
        self.records
    }

    pub fn into_inner(self) -> W {
        self.inner.into_inner()
    }

    /// Write a record header (without any file payload)
    pub fn write_record(&mut self, record: &Record) -> Result<()> {
        let w = &mut self.inner;
        wire::write_u8(w, record.kind())?;

        if let Some(components) = record.components() {
            wire::write_str(w, record.name())?;
            let count = u16::try_from(components.len()).map_err(|_| {
                Error::InvalidPackage(format!("too many components on {}", record.name()))
            })?;
            wire::write_u16(w, count)?;
            for component in components {
                wire::write_str(w, component)?;
            }
        }

        match record {
            Record::Directory { .. } | Record::EndDirectory => {}
            Record::File { size, .. } => wire::write_u64(w, *size)?,
            Record::Link {
                target,
                display_name,
                ..
            } => {
                match target {
                    LinkTarget::Package(path) => {
                        wire::write_u8(w, TARGET_PACKAGE)?;
                        wire::write_str(w, path)?;
                    }
                    LinkTarget::Absolute(path) => {
                        let path = path.to_str().ok_or_else(|| {
                            Error::InvalidLinkTarget(format!(
                                "non UTF-8 link target: {}",
                                path.display()
                            ))
                        })?;
                        wire::write_u8(w, TARGET_ABSOLUTE)?;
                        wire::write_str(w, path)?;
                    }
                }
                wire::write_str(w, display_name)?;
            }
            Record::EnvironmentVariable {
                variable,
                value,
                mode,
                ..
            } => {
                wire::write_str(w, variable)?;
                wire::write_str(w, value)?;
                wire::write_u8(w, mode_id(*mode))?;
            }
        }

        self.records += 1;
        Ok(())
    }

    /// Write a file payload of exactly `size` bytes
    pub fn write_payload(&mut self, display_path: &str, source: &FileSource, size: u64) -> Result<()> {
        match source {
            FileSource::Memory(bytes) => {
                let actual = bytes.len() as u64;
                if actual != size {
                    return Err(source_changed(display_path, size, actual));
                }
                self.inner.write_all(bytes)?;
            }
            FileSource::Path(path) => {
                let file = std::fs::File::open(path).map_err(|e| {
                    Error::IoError(format!("failed to open {}: {}", path.display(), e))
                })?;
                let actual = file.metadata()?.len();
                if actual != size {
                    return Err(source_changed(display_path, size, actual));
                }
                let copied = io::copy(&mut file.take(size), &mut self.inner)?;
                if copied != size {
                    return Err(source_changed(display_path, size, copied));
                }
            }
        }
        Ok(())
    }

    /// Write the whole tree in canonical order and return the record count
    pub fn write_tree(&mut self, tree: &ContentTree) -> Result<u64> {
        let start = self.records;
        for event in tree.walk() {
            match event {
                WalkEvent::Enter(id) => {
                    self.write_record(&Record::from_node(tree, id))?;
                    if let NodeKind::File { size, source } = tree.node(id).kind() {
                        self.write_payload(&tree.path(id), source, *size)?;
                    }
                }
                WalkEvent::Exit(_) => self.write_record(&Record::EndDirectory)?,
            }
        }
        Ok(self.records - start)
    }
}

fn source_changed(path: &str, expected: u64, actual: u64) -> Error {
    Error::SourceChanged {
        path: path.to_string(),
        expected,
        actual,
    }
}

/// Size of the uncompressed record stream for a tree
///
/// Computed from record headers and declared file sizes without reading any
/// payload.
pub fn encoded_len(tree: &ContentTree) -> Result<u64> {
    let mut counter = RecordWriter::new(io::sink());
    let mut payload = 0u64;
    for event in tree.walk() {
        match event {
            WalkEvent::Enter(id) => {
                counter.write_record(&Record::from_node(tree, id))?;
                if let NodeKind::File { size, .. } = tree.node(id).kind() {
                    payload += size;
                }
            }
            WalkEvent::Exit(_) => counter.write_record(&Record::EndDirectory)?,
        }
    }
    Ok(counter.bytes_written() + payload)
}

/// Pull reader over a decompressed record stream
///
/// Call [`RecordReader::next_record`] until it returns `None`. After a
/// `File` record, its payload can be taken with
/// [`RecordReader::copy_payload`]; an unread payload is skipped on the next
/// call.
pub struct RecordReader<R: Read> {
    inner: CountingReader<R>,
    declared: u64,
    pending_payload: u64,
    depth: usize,
    started: bool,
    finished: bool,
}

impl<R: Read> RecordReader<R> {
    /// Wrap a decompressed stream that should hold `declared` bytes
    pub fn new(inner: R, declared: u64) -> Self {
        Self {
            inner: CountingReader::new(inner),
            declared,
            pending_payload: 0,
            depth: 0,
            started: false,
            finished: false,
        }
    }

    /// Uncompressed bytes consumed so far
    pub fn consumed(&self) -> u64 {
        self.inner.count()
    }

    /// Declared uncompressed size of the stream
    pub fn declared(&self) -> u64 {
        self.declared
    }

    /// Current directory nesting depth
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Payload bytes of the current file not yet consumed
    pub fn pending_payload(&self) -> u64 {
        self.pending_payload
    }

    fn truncated(&self) -> Error {
        Error::TruncatedStream {
            expected: self.declared,
            actual: self.consumed(),
        }
    }

    fn map_eof(&self, err: Error) -> Error {
        match err {
            Error::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof => self.truncated(),
            other => other,
        }
    }

    fn check_overrun(&self) -> Result<()> {
        if self.consumed() > self.declared {
            return Err(self.truncated());
        }
        Ok(())
    }

    /// Read the next record header, or `None` at the end of the stream
    pub fn next_record(&mut self) -> Result<Option<Record>> {
        if self.finished {
            return Ok(None);
        }
        if self.pending_payload > 0 {
            self.copy_payload(&mut io::sink())?;
        }

        let mut kind = [0u8; 1];
        let n = loop {
            match self.inner.read(&mut kind) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(self.map_eof(e.into())),
            }
        };

        if n == 0 {
            if self.consumed() < self.declared {
                return Err(self.truncated());
            }
            if !self.started || self.depth != 0 {
                return Err(Error::InvalidPackage(
                    "record stream ends inside a directory".into(),
                ));
            }
            self.finished = true;
            return Ok(None);
        }

        if self.started && self.depth == 0 {
            return Err(Error::InvalidPackage(
                "record found after the root directory was closed".into(),
            ));
        }

        let record = self.read_body(kind[0]).map_err(|e| self.map_eof(e))?;
        self.check_overrun()?;

        match &record {
            Record::Directory { name, .. } => {
                if !self.started && !name.is_empty() {
                    return Err(Error::InvalidPackage("root directory has a name".into()));
                }
                self.started = true;
                self.depth += 1;
            }
            Record::EndDirectory => {
                // started is true here: depth > 0
                self.depth -= 1;
            }
            Record::File { size, .. } => {
                let end = self.consumed().saturating_add(*size);
                if end > self.declared {
                    debug!("Payload of {} runs past the declared size", record.name());
                    return Err(Error::TruncatedStream {
                        expected: self.declared,
                        actual: end,
                    });
                }
                self.pending_payload = *size;
            }
            Record::Link { .. } | Record::EnvironmentVariable { .. } => {}
        }

        debug!("Read record {:?} at depth {}", record.name(), self.depth);
        Ok(Some(record))
    }

    fn read_body(&mut self, kind: u8) -> Result<Record> {
        if !self.started && kind != KIND_DIRECTORY {
            return Err(Error::InvalidPackage(
                "record stream does not start with the root directory".into(),
            ));
        }
        if kind == KIND_END {
            if self.depth == 0 {
                return Err(Error::InvalidPackage("unbalanced end-of-directory".into()));
            }
            return Ok(Record::EndDirectory);
        }
        if !matches!(kind, KIND_DIRECTORY | KIND_FILE | KIND_LINK | KIND_ENV) {
            return Err(Error::InvalidPackage(format!("unknown record kind {}", kind)));
        }

        let r = &mut self.inner;
        let name = wire::read_str(r)?;
        // The root directory is the only unnamed record
        if self.started {
            crate::tree::validate_name(&name)
                .map_err(|_| Error::InvalidPackage(format!("invalid record name {:?}", name)))?;
        }

        let count = wire::read_u16(r)?;
        let mut components = ComponentSet::new();
        for _ in 0..count {
            components.insert(wire::read_str(r)?);
        }

        let record = match kind {
            KIND_DIRECTORY => Record::Directory { name, components },
            KIND_FILE => Record::File {
                name,
                components,
                size: wire::read_u64(r)?,
            },
            KIND_LINK => {
                let target_kind = wire::read_u8(r)?;
                let target = wire::read_str(r)?;
                let target = match target_kind {
                    TARGET_PACKAGE => LinkTarget::Package(target),
                    TARGET_ABSOLUTE => LinkTarget::Absolute(PathBuf::from(target)),
                    other => {
                        return Err(Error::InvalidPackage(format!(
                            "unknown link target kind {}",
                            other
                        )));
                    }
                };
                Record::Link {
                    name,
                    components,
                    target,
                    display_name: wire::read_str(r)?,
                }
            }
            _ => Record::EnvironmentVariable {
                name,
                components,
                variable: wire::read_str(r)?,
                value: wire::read_str(r)?,
                mode: mode_from_id(wire::read_u8(r)?)?,
            },
        };
        Ok(record)
    }

    /// Stream the current file's remaining payload into `out`
    pub fn copy_payload<W: Write + ?Sized>(&mut self, out: &mut W) -> Result<u64> {
        let mut buf = vec![0u8; COPY_BUFFER_SIZE.min(self.pending_payload as usize)];
        let mut copied = 0u64;

        while self.pending_payload > 0 {
            let want = buf.len().min(self.pending_payload as usize);
            let n = match self.inner.read(&mut buf[..want]) {
                Ok(0) => return Err(self.truncated()),
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(self.map_eof(e.into())),
            };
            out.write_all(&buf[..n])?;
            self.pending_payload -= n as u64;
            copied += n as u64;
        }
        Ok(copied)
    }
}

/// Rebuild a content tree from a record stream, holding payloads in memory
pub fn decode_tree<R: Read>(records: &mut RecordReader<R>) -> Result<ContentTree> {
    let mut tree = ContentTree::new();
    let mut stack: Vec<NodeId> = Vec::new();

    while let Some(record) = records.next_record()? {
        let Some(&parent) = stack.last() else {
            // First record is always the root directory
            if let Some(components) = record.components() {
                tree.set_components(tree.root(), components.clone());
            }
            stack.push(tree.root());
            continue;
        };

        let id = match record {
            Record::Directory { name, components } => {
                let id = tree.add_directory(parent, name)?;
                tree.set_components(id, components);
                stack.push(id);
                continue;
            }
            Record::EndDirectory => {
                stack.pop();
                continue;
            }
            Record::File {
                name,
                components,
                size,
            } => {
                let mut content = Vec::with_capacity(size.min(COPY_BUFFER_SIZE as u64) as usize);
                records.copy_payload(&mut content)?;
                let id = tree.add_file_bytes(parent, name, Arc::<[u8]>::from(content))?;
                tree.set_components(id, components);
                id
            }
            Record::Link {
                name,
                components,
                target,
                display_name,
            } => {
                let id = tree.add_link(parent, name, target, display_name)?;
                tree.set_components(id, components);
                id
            }
            Record::EnvironmentVariable {
                name,
                components,
                variable,
                value,
                mode,
            } => {
                let id = tree.add_env_var(parent, name, variable, value, mode)?;
                tree.set_components(id, components);
                id
            }
        };
        debug!("Decoded {}", tree.path(id));
    }

    Ok(tree)
}
