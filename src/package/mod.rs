// src/package/mod.rs

//! Package blob format
//!
//! A package is an uncompressed header followed by one compressed record
//! stream:
//!
//! ```text
//! magic "SKPG" | version:u8 | resource:str | unicode:str unicode_size:u64
//!   | codec:u8 | uncompressed_size:u64 | manifest_len:u32 manifest(CBOR)
//!   | compressed records ... EOF
//! ```
//!
//! Sealing computes the uncompressed size up front so the reader can tell a
//! complete stream from a truncated one.

mod manifest;
mod record;
mod wire;

pub use manifest::{
    ExternalCommand, ExternalInstaller, Hook, HookCheck, MAX_MANIFEST_SIZE, Manifest,
};
pub use record::{Record, RecordReader, RecordWriter, decode_tree, encoded_len};

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use tracing::{info, warn};

use crate::compression::Codec;
use crate::error::{Error, Result};
use crate::tree::ContentTree;
use wire::CountingWriter;

/// Leading bytes of every package
pub const MAGIC: [u8; 4] = *b"SKPG";

/// Current format version
pub const FORMAT_VERSION: u8 = 1;

/// Default resource name of the record stream
pub const DEFAULT_RESOURCE_NAME: &str = "PACKAGE";

/// Default resource name of the auxiliary Unicode tables
pub const DEFAULT_UNICODE_RESOURCE: &str = "UNICODEDATA";

/// Fixed-layout header preceding the compressed record stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageHeader {
    pub resource_name: String,
    pub unicode_resource: String,
    pub unicode_size: u64,
    pub codec: Codec,
    pub uncompressed_size: u64,
    pub manifest: Manifest,
}

impl PackageHeader {
    /// Serialize the header
    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        let manifest = self.manifest.to_cbor()?;
        let manifest_len = u32::try_from(manifest.len())
            .ok()
            .filter(|&len| len <= MAX_MANIFEST_SIZE)
            .ok_or_else(|| Error::InvalidPackage("manifest is too large".into()))?;

        w.write_all(&MAGIC)?;
        wire::write_u8(w, FORMAT_VERSION)?;
        wire::write_str(w, &self.resource_name)?;
        wire::write_str(w, &self.unicode_resource)?;
        wire::write_u64(w, self.unicode_size)?;
        wire::write_u8(w, self.codec.id())?;
        wire::write_u64(w, self.uncompressed_size)?;
        wire::write_u32(w, manifest_len)?;
        w.write_all(&manifest)?;
        Ok(())
    }

    /// Parse a header, leaving the reader at the start of the compressed stream
    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let mut magic = [0u8; 4];
        read_header_bytes(r, &mut magic)?;
        if magic != MAGIC {
            return Err(Error::InvalidPackage("not a setupkit package".into()));
        }

        let version = wire::read_u8(r).map_err(header_io)?;
        if version != FORMAT_VERSION {
            return Err(Error::InvalidPackage(format!(
                "unsupported format version {} (expected {})",
                version, FORMAT_VERSION
            )));
        }

        let resource_name = wire::read_str(r).map_err(header_err)?;
        let unicode_resource = wire::read_str(r).map_err(header_err)?;
        let unicode_size = wire::read_u64(r).map_err(header_io)?;
        let codec = Codec::from_id(wire::read_u8(r).map_err(header_io)?)?;
        let uncompressed_size = wire::read_u64(r).map_err(header_io)?;

        let manifest_len = wire::read_u32(r).map_err(header_io)?;
        if manifest_len > MAX_MANIFEST_SIZE {
            return Err(Error::InvalidPackage(format!(
                "manifest length {} exceeds limit",
                manifest_len
            )));
        }
        let mut manifest = vec![0u8; manifest_len as usize];
        read_header_bytes(r, &mut manifest)?;
        let manifest = Manifest::from_cbor(&manifest)?;

        Ok(Self {
            resource_name,
            unicode_resource,
            unicode_size,
            codec,
            uncompressed_size,
            manifest,
        })
    }
}

fn read_header_bytes<R: Read>(r: &mut R, buf: &mut [u8]) -> Result<()> {
    r.read_exact(buf).map_err(header_io)
}

fn header_io(e: std::io::Error) -> Error {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        Error::InvalidPackage("package header is truncated".into())
    } else {
        Error::Io(e)
    }
}

fn header_err(e: Error) -> Error {
    match e {
        Error::Io(e) => header_io(e),
        other => other,
    }
}

/// Result of sealing a package
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SealSummary {
    pub records: u64,
    pub uncompressed_size: u64,
    /// Header plus compressed stream
    pub total_size: u64,
}

/// A package ready to be sealed, or one decoded in full
#[derive(Debug, Clone)]
pub struct Package {
    pub manifest: Manifest,
    pub codec: Codec,
    pub resource_name: String,
    pub unicode_resource: String,
    pub unicode_size: u64,
    pub tree: ContentTree,
}

impl Package {
    pub fn new(manifest: Manifest, tree: ContentTree) -> Self {
        Self {
            manifest,
            codec: Codec::default(),
            resource_name: DEFAULT_RESOURCE_NAME.to_string(),
            unicode_resource: DEFAULT_UNICODE_RESOURCE.to_string(),
            unicode_size: 0,
            tree,
        }
    }

    pub fn with_codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }

    /// Serialize header and compressed records
    ///
    /// Fails before writing anything if links dangle or the manifest is
    /// inconsistent. Fails with `SourceChanged` if a file on disk no longer
    /// has the size recorded when the tree was built.
    pub fn seal<W: Write>(&self, writer: W) -> Result<SealSummary> {
        self.manifest.validate()?;
        self.tree.validate_links()?;

        let declared = self.manifest.component_names();
        for name in self.tree.components_in_use() {
            if !declared.contains(&name) {
                warn!("Component {} is used but not declared in the manifest", name);
            }
        }

        let uncompressed_size = encoded_len(&self.tree)?;
        let header = PackageHeader {
            resource_name: self.resource_name.clone(),
            unicode_resource: self.unicode_resource.clone(),
            unicode_size: self.unicode_size,
            codec: self.codec,
            uncompressed_size,
            manifest: self.manifest.clone(),
        };

        let mut out = CountingWriter::new(writer);
        header.write_to(&mut out)?;

        let mut records = RecordWriter::new(self.codec.encoder(&mut out));
        let count = records.write_tree(&self.tree)?;
        if records.bytes_written() != uncompressed_size {
            return Err(Error::InvalidPackage(format!(
                "record stream is {} bytes, expected {}",
                records.bytes_written(),
                uncompressed_size
            )));
        }
        records.into_inner().finish()?;
        out.flush()?;

        let summary = SealSummary {
            records: count,
            uncompressed_size,
            total_size: out.count(),
        };
        info!(
            "Sealed {} {} ({} records, {} bytes uncompressed, {} bytes with {})",
            self.manifest.name,
            self.manifest.version,
            summary.records,
            summary.uncompressed_size,
            summary.total_size,
            self.codec
        );
        Ok(summary)
    }

    /// Seal into a new file at `path`
    pub fn seal_to_file(&self, path: &Path) -> Result<SealSummary> {
        let file = File::create(path).map_err(|e| {
            Error::IoError(format!("failed to create {}: {}", path.display(), e))
        })?;
        let mut writer = BufWriter::new(file);
        let summary = self.seal(&mut writer)?;
        writer
            .into_inner()
            .map_err(|e| Error::IoError(format!("failed to write {}: {}", path.display(), e)))?
            .sync_all()?;
        Ok(summary)
    }

    /// Decode a whole package into memory
    pub fn read<R: Read>(reader: R) -> Result<Self> {
        let mut opened = PackageReader::new(reader)?;
        let tree = decode_tree(opened.records())?;
        let header = opened.header;
        Ok(Self {
            manifest: header.manifest,
            codec: header.codec,
            resource_name: header.resource_name,
            unicode_resource: header.unicode_resource,
            unicode_size: header.unicode_size,
            tree,
        })
    }
}

/// Streaming access to a sealed package
pub struct PackageReader<'a> {
    header: PackageHeader,
    records: RecordReader<Box<dyn Read + 'a>>,
}

impl<'a> PackageReader<'a> {
    /// Parse the header and set up decompression of the record stream
    pub fn new<R: Read + 'a>(mut reader: R) -> Result<Self> {
        let header = PackageHeader::read_from(&mut reader)?;
        let records = RecordReader::new(header.codec.decoder(reader), header.uncompressed_size);
        Ok(Self { header, records })
    }

    pub fn header(&self) -> &PackageHeader {
        &self.header
    }

    pub fn manifest(&self) -> &Manifest {
        &self.header.manifest
    }

    /// The decompressed record stream
    pub fn records(&mut self) -> &mut RecordReader<Box<dyn Read + 'a>> {
        &mut self.records
    }
}

impl PackageReader<'static> {
    /// Open a package file
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .map_err(|e| Error::IoError(format!("failed to open {}: {}", path.display(), e)))?;
        Self::new(BufReader::new(file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::ComponentInfo;
    use crate::tree::{LinkTarget, NodeKind};

    fn sample_package() -> Package {
        let mut tree = ContentTree::new();
        let root = tree.root();
        let bin = tree.add_directory(root, "bin").unwrap();
        tree.add_file_bytes(bin, "app", b"binary contents ".repeat(64))
            .unwrap();
        tree.add_link(root, "App", LinkTarget::Package("bin/app".into()), "App")
            .unwrap();

        let mut manifest = Manifest::new("demo", "1.0.0", "/opt/demo");
        manifest.components.push(ComponentInfo::new("core"));
        Package::new(manifest, tree)
    }

    #[test]
    fn test_seal_and_read_every_codec() {
        for codec in Codec::ALL {
            let package = sample_package().with_codec(codec);
            let mut blob = Vec::new();
            let summary = package.seal(&mut blob).unwrap();
            assert_eq!(summary.total_size, blob.len() as u64);
            assert_eq!(summary.uncompressed_size, encoded_len(&package.tree).unwrap());

            let decoded = Package::read(blob.as_slice()).unwrap();
            assert_eq!(decoded.codec, codec);
            assert_eq!(decoded.manifest, package.manifest);
            assert_eq!(decoded.resource_name, DEFAULT_RESOURCE_NAME);
            assert!(matches!(
                decoded.tree.get("bin/app").unwrap().kind(),
                NodeKind::File { size: 1024, .. }
            ));
        }
    }

    #[test]
    fn test_bad_magic() {
        let err = PackageReader::new(&b"NOPE\x01rest"[..]).err().unwrap();
        assert!(matches!(err, Error::InvalidPackage(_)));
    }

    #[test]
    fn test_bad_version() {
        let mut blob = Vec::new();
        sample_package().seal(&mut blob).unwrap();
        blob[4] = 99;
        let err = PackageReader::new(blob.as_slice()).err().unwrap();
        assert!(matches!(err, Error::InvalidPackage(_)));
    }

    #[test]
    fn test_unknown_codec() {
        let package = sample_package();
        let mut blob = Vec::new();
        package.seal(&mut blob).unwrap();

        // magic, version, two strings, unicode size, then the codec id
        let offset = 4
            + 1
            + 2
            + package.resource_name.len()
            + 2
            + package.unicode_resource.len()
            + 8;
        blob[offset] = 42;
        let err = PackageReader::new(blob.as_slice()).err().unwrap();
        assert!(matches!(err, Error::UnsupportedCodec(42)));
    }

    #[test]
    fn test_truncated_package() {
        let package = sample_package().with_codec(Codec::Store);
        let mut blob = Vec::new();
        package.seal(&mut blob).unwrap();
        blob.truncate(blob.len() - 100);

        let err = Package::read(blob.as_slice()).unwrap_err();
        assert!(matches!(err, Error::TruncatedStream { .. }));
    }

    #[test]
    fn test_truncated_header() {
        let mut blob = Vec::new();
        sample_package().seal(&mut blob).unwrap();
        let err = PackageReader::new(&blob[..10]).err().unwrap();
        assert!(matches!(err, Error::InvalidPackage(_)));
    }

    #[test]
    fn test_dangling_link_not_sealed() {
        let mut package = sample_package();
        let root = package.tree.root();
        package
            .tree
            .add_link(root, "Broken", LinkTarget::Package("nope".into()), "Broken")
            .unwrap();
        let mut blob = Vec::new();
        assert!(package.seal(&mut blob).is_err());
        assert!(blob.is_empty());
    }

    #[test]
    fn test_seal_to_file() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("demo.skpg");
        let summary = sample_package().seal_to_file(&path).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), summary.total_size);

        let mut reader = PackageReader::open(&path).unwrap();
        assert_eq!(reader.manifest().name, "demo");
        let mut count = 0;
        while reader.records().next_record().unwrap().is_some() {
            count += 1;
        }
        // root, bin, app, end(bin), App, end(root)
        assert_eq!(count, 6);
    }
}
