//! Integration tests for the archive codec
//!
//! A directory tree encoded by the pack side must extract to the same paths,
//! bytes, and permission bits on the launch side.

use devcapsule::archive::{encode, extract_to, ArchiveDecoder};
use devcapsule::safety::safe_cleanup::remove_tree_secure;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Debug, PartialEq, Eq)]
enum Node {
    Dir(u32),
    File(u32, Vec<u8>),
    Link(PathBuf),
}

fn snapshot(root: &Path) -> BTreeMap<PathBuf, Node> {
    let mut nodes = BTreeMap::new();
    for entry in WalkDir::new(root).min_depth(1).follow_links(false) {
        let entry = entry.unwrap();
        let rel = entry.path().strip_prefix(root).unwrap().to_path_buf();
        let meta = fs::symlink_metadata(entry.path()).unwrap();
        let node = if meta.file_type().is_symlink() {
            Node::Link(fs::read_link(entry.path()).unwrap())
        } else if meta.is_dir() {
            Node::Dir(mode(&meta))
        } else {
            Node::File(mode(&meta), fs::read(entry.path()).unwrap())
        };
        nodes.insert(rel, node);
    }
    nodes
}

#[cfg(unix)]
fn mode(meta: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o777
}

#[cfg(not(unix))]
fn mode(_meta: &fs::Metadata) -> u32 {
    0
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).unwrap();
}

#[cfg(unix)]
fn sample_tree(root: &Path) {
    fs::create_dir_all(root.join("left-pad/lib")).unwrap();
    fs::write(root.join("left-pad/package.json"), br#"{"name":"left-pad"}"#).unwrap();
    fs::write(root.join("left-pad/lib/index.js"), b"module.exports = pad;\n").unwrap();
    fs::write(root.join("left-pad/cli.js"), b"#!/usr/bin/env node\n").unwrap();
    set_mode(&root.join("left-pad/cli.js"), 0o755);
    fs::write(root.join("secret.txt"), b"owner only").unwrap();
    set_mode(&root.join("secret.txt"), 0o600);
    fs::write(root.join("empty"), b"").unwrap();

    fs::create_dir(root.join(".bin")).unwrap();
    std::os::unix::fs::symlink("../left-pad/cli.js", root.join(".bin/left-pad")).unwrap();

    fs::create_dir(root.join("frozen")).unwrap();
    fs::write(root.join("frozen/data.bin"), [0u8, 1, 2, 255]).unwrap();
    set_mode(&root.join("frozen"), 0o555);
}

#[cfg(unix)]
#[test]
fn test_tree_survives_encode_and_extract() {
    let src = tempfile::tempdir().unwrap();
    let tree = src.path().join("node_modules");
    fs::create_dir(&tree).unwrap();
    sample_tree(&tree);

    let bytes = encode(&tree).unwrap();

    let dst = tempfile::tempdir().unwrap();
    let out = dst.path().join("node_modules");
    let mut decoder = ArchiveDecoder::new(bytes.as_slice());
    let stats = extract_to(decoder.entries().unwrap(), &out).unwrap();

    assert_eq!(snapshot(&tree), snapshot(&out));
    assert_eq!(stats.symlinks, 1);
    assert_eq!(stats.files, 6);

    // Extracted read-only directories must not block teardown.
    remove_tree_secure(&out).unwrap();
    assert!(!out.exists());
    set_mode(&tree.join("frozen"), 0o755);
}

#[cfg(unix)]
#[test]
fn test_encoding_is_deterministic() {
    let src = tempfile::tempdir().unwrap();
    sample_tree(src.path());
    let first = encode(src.path()).unwrap();
    let second = encode(src.path()).unwrap();
    assert_eq!(first, second);
    set_mode(&src.path().join("frozen"), 0o755);
}

#[test]
fn test_decoder_restarts_over_same_blob() {
    let src = tempfile::tempdir().unwrap();
    fs::create_dir(src.path().join("pkg")).unwrap();
    fs::write(src.path().join("pkg/a.js"), b"a").unwrap();
    let bytes = encode(src.path()).unwrap();

    let count = |bytes: &[u8]| {
        let mut decoder = ArchiveDecoder::new(bytes);
        decoder.entries().unwrap().map(|e| e.unwrap()).count()
    };
    assert_eq!(count(&bytes), 2);
    assert_eq!(count(&bytes), 2);
}

#[test]
fn test_extract_into_existing_directories() {
    let src = tempfile::tempdir().unwrap();
    fs::create_dir_all(src.path().join("a/b")).unwrap();
    fs::write(src.path().join("a/b/c.txt"), b"c").unwrap();
    let bytes = encode(src.path()).unwrap();

    let dst = tempfile::tempdir().unwrap();
    fs::create_dir_all(dst.path().join("a/b")).unwrap();
    let mut decoder = ArchiveDecoder::new(bytes.as_slice());
    extract_to(decoder.entries().unwrap(), dst.path()).unwrap();
    assert_eq!(fs::read(dst.path().join("a/b/c.txt")).unwrap(), b"c");
}
