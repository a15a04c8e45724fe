use std::io;

use anyhow::{Context, Result};
use camino::Utf8Path;

use polyarc::read::*;
use polyarc::result::ZipError;
use polyarc::write::{EntryOptions, SeekableSink, Zip64Policy, ZipWriter};

/// Builds an archive with the same logical contents `tests/inputs/hello.zip`
/// used to have, via the writer rather than a checked-in fixture or an
/// external `zip` invocation.
fn build_hello_zip(zip64: Zip64Policy) -> Result<Vec<u8>> {
    let sink = SeekableSink::new(io::Cursor::new(Vec::new()));
    let mut writer = ZipWriter::new(sink);
    writer.set_zip64_policy(zip64);

    for (name, contents) in [
        ("hello/hi.txt", &b"hi there!"[..]),
        ("hello/rip.txt", &b"rest in peace"[..]),
        ("hello/sr71.txt", &b"Blackbird"[..]),
    ] {
        writer.start_entry(name, EntryOptions::default())?;
        writer.write_entry_data(contents)?;
        writer.close_entry()?;
    }

    let sink = writer.finish()?;
    Ok(sink.into_inner().into_inner())
}

#[test]
fn round_trips_basic_archive() -> Result<()> {
    let bytes = build_hello_zip(Zip64Policy::AsNeeded)?;
    read_hello_zip(&bytes)
}

#[test]
fn round_trips_archive_prepended_with_unrelated_bytes() -> Result<()> {
    // Mimics a self-extracting archive: arbitrary bytes before the first
    // local file header, tolerated via `with_prepended_data`.
    let mut bytes = b"#!/bin/sh\nexit 0\n".to_vec();
    bytes.extend_from_slice(&build_hello_zip(Zip64Policy::AsNeeded)?);
    let (archive, prefix_len) =
        ZipArchive::with_prepended_data(&bytes).context("Couldn't load prefixed archive")?;
    assert_eq!(prefix_len, 17);
    check_hello_tree(&archive)
}

#[test]
fn round_trips_archive_forced_to_zip64() -> Result<()> {
    let bytes = build_hello_zip(Zip64Policy::Always)?;
    assert!(
        memchr::memmem::find(&bytes, b"PK\x06\x06").is_some(),
        "Zip64Policy::Always should always emit a Zip64 end-of-central-directory record"
    );
    read_hello_zip(&bytes)
}

fn read_hello_zip(bytes: &[u8]) -> Result<()> {
    let archive = ZipArchive::new(bytes).context("Couldn't load archive")?;
    check_hello_tree(&archive)
}

fn check_hello_tree(archive: &ZipArchive) -> Result<()> {
    let tree = as_tree(archive.entries())?;

    tree.lookup("hello/hi.txt")?;
    tree.lookup("hello/rip.txt")?;
    tree.lookup("hello/sr71.txt")?;

    let no_such_file = Utf8Path::new("no/such/file");
    match tree.lookup(no_such_file) {
        Err(ZipError::NoSuchFile(p)) => assert_eq!(no_such_file, p),
        Err(other) => panic!("Got incorrect error from path with no file: {:?}", other),
        Ok(_) => panic!("Got a file back from a path with no file"),
    };
    let no_such_file = Utf8Path::new("top-level-no-such-file");
    match tree.lookup(no_such_file) {
        Err(ZipError::NoSuchFile(p)) => assert_eq!(no_such_file, p),
        Err(other) => panic!("Got incorrect error from path with no file: {:?}", other),
        Ok(_) => panic!("Got a file back from a path with no file"),
    };

    let invalid_path = Utf8Path::new("../nope");
    match tree.lookup(invalid_path) {
        Err(ZipError::InvalidPath(_)) => { /* Cool. */ }
        Err(other) => panic!("Got incorrect error from invalid path: {:?}", other),
        Ok(_) => panic!("Got a file back from invalid path"),
    };

    // Read each file out and let its CRC-32 get checked against the one
    // stored in the archive as the reader is drained.
    for entry in tree.files() {
        let mut reader = archive.read(entry)?;
        let mut sink = io::sink();
        io::copy(&mut reader, &mut sink)?;
    }
    Ok(())
}

#[test]
fn reads_a_real_archive_split_across_multiple_segments() -> Result<()> {
    use polyarc::segment;

    let mut full = build_hello_zip(Zip64Policy::AsNeeded)?;
    // Real split archives carry the spanning signature at the front of their
    // first segment; splice it on, then break the rest into two segments,
    // to prove the channel reassembles them transparently before the
    // seekable reader ever sees a seam.
    let mut seg1 = segment::SPLIT_SIGNATURE.to_vec();
    let split_at = full.len() / 2;
    seg1.extend_from_slice(&full[..split_at]);
    let seg2 = full.split_off(split_at);

    let assembled = segment::read_to_buffer(vec![io::Cursor::new(seg1), io::Cursor::new(seg2)])?;
    assert_eq!(&assembled[4..], full.as_slice());

    read_hello_zip(&assembled[4..])
}

#[test]
fn flags_zip_slip_paths_as_unsafe() -> Result<()> {
    // The archive itself is free to contain a climbing path; an expander is
    // expected to call `safe_relative_path` before writing anything to disk,
    // since the reader doesn't refuse to list such entries.
    let sink = SeekableSink::new(io::Cursor::new(Vec::new()));
    let mut writer = ZipWriter::new(sink);
    writer.start_entry("../../etc/passwd", EntryOptions::default())?;
    writer.write_entry_data(b"pwned")?;
    writer.close_entry()?;
    let bytes = writer.finish()?.into_inner().into_inner();

    let archive = ZipArchive::new(&bytes)?;
    let entry = archive
        .entries()
        .iter()
        .find(|e| e.path.as_str().contains("passwd"))
        .expect("archive should contain the entry we just wrote");
    assert!(!safe_relative_path(&entry.path));
    Ok(())
}
