// tests/roundtrip.rs

//! Package sealing and decoding across codecs.

mod common;

use common::{manifest, record_count, sample_blob, sample_tree, seal};
use setupkit::package::{PackageHeader, Record};
use setupkit::{Codec, ContentTree, Error, Package, PackageReader};

/// (path, kind, own tags) for every node in traversal order
fn listing(tree: &ContentTree) -> Vec<(String, setupkit::NodeKind, Vec<String>)> {
    tree.traverse()
        .map(|id| {
            let node = tree.node(id);
            (
                tree.path(id),
                node.kind().clone(),
                node.components().iter().cloned().collect(),
            )
        })
        .collect()
}

#[test]
fn test_roundtrip_every_codec() {
    let original = sample_tree();
    for codec in Codec::ALL {
        let blob = sample_blob(codec);
        let decoded = Package::read(blob.as_slice()).unwrap();

        assert_eq!(decoded.codec, codec);
        assert_eq!(decoded.manifest, manifest("demo"));
        assert_eq!(
            listing(&decoded.tree),
            listing(&original),
            "tree differs after {} round trip",
            codec
        );
    }
}

#[test]
fn test_record_stream_identical_across_codecs() {
    let mut streams = Vec::new();
    for codec in Codec::ALL {
        let blob = sample_blob(codec);
        let mut reader = PackageReader::new(blob.as_slice()).unwrap();
        let mut records: Vec<Record> = Vec::new();
        let mut payloads = Vec::new();
        while let Some(record) = reader.records().next_record().unwrap() {
            if let Record::File { .. } = record {
                let mut bytes = Vec::new();
                reader.records().copy_payload(&mut bytes).unwrap();
                payloads.push(bytes);
            }
            records.push(record);
        }
        assert_eq!(reader.records().consumed(), reader.header().uncompressed_size);
        assert_eq!(records.len(), record_count(&sample_tree()));
        streams.push((records, payloads));
    }

    for other in &streams[1..] {
        assert_eq!(&streams[0], other);
    }
}

#[test]
fn test_header_is_readable_without_decompressing() {
    let blob = sample_blob(Codec::Bzip2);
    let header = PackageHeader::read_from(&mut blob.as_slice()).unwrap();
    assert_eq!(header.codec, Codec::Bzip2);
    assert_eq!(header.manifest.name, "demo");
    assert!(header.uncompressed_size > 0);
}

#[test]
fn test_unknown_codec_rejected() {
    let mut blob = sample_blob(Codec::Store);
    // magic(4) + version(1) + "PACKAGE" str(2+7) + "UNICODEDATA" str(2+11) + u64
    let codec_offset = 4 + 1 + 2 + 7 + 2 + 11 + 8;
    blob[codec_offset] = 9;
    assert!(matches!(
        PackageReader::new(blob.as_slice()),
        Err(Error::UnsupportedCodec(9))
    ));
}

#[test]
fn test_truncated_blob_fails() {
    for codec in Codec::ALL {
        let blob = seal(&Package::new(manifest("demo"), sample_tree()).with_codec(codec));
        let cut = &blob[..blob.len() - blob.len() / 4];
        let result = Package::read(cut);
        assert!(
            matches!(result, Err(Error::TruncatedStream { .. })),
            "{} accepted a truncated blob",
            codec
        );
    }
}
