//! End-to-end tests of the open pipeline over real files and buffers.

use std::io::{Read, Write};

use zopen::{
    Access, Compression, Config, Error, OpenSpec, Opener, SharedBuffer,
};

fn opener() -> Opener {
    let _ = env_logger::builder().is_test(true).try_init();
    // Native codecs only: these tests must not depend on which compression
    // programs the host has installed.
    Opener::new(Config::new().use_external(false)).unwrap()
}

#[test]
fn roundtrip_every_builtin_format_through_files() {
    let opener = opener();
    let dir = tempfile::tempdir().unwrap();
    let payload = b"the quick brown fox jumps over the lazy dog\n".repeat(100);

    for (format, ext) in [
        ("gzip", "gz"),
        ("bgzip", "bgz"),
        ("bzip2", "bz2"),
        ("xz", "xz"),
    ] {
        let path = dir.path().join(format!("data.{ext}"));

        let mut out = opener
            .open(OpenSpec::write(path.as_path()))
            .unwrap_or_else(|e| panic!("open {format} for write: {e}"));
        assert_eq!(out.format(), Some(format), "extension .{ext}");
        out.write_all(&payload).unwrap();
        out.close().unwrap();

        // The file is smaller than the payload and not the payload itself.
        let on_disk = std::fs::read(&path).unwrap();
        assert_ne!(on_disk, payload);

        // Read back with auto-detection from content.
        let mut back = opener.open(OpenSpec::read(path.as_path())).unwrap();
        assert_eq!(back.format(), Some(format));
        let mut got = Vec::new();
        back.read_to_end(&mut got).unwrap();
        assert_eq!(got, payload, "roundtrip through {format}");
    }
}

#[test]
fn decompress_recompress_between_files() {
    // Read a .gz file, write its contents to another .gz file.
    let opener = opener();
    let dir = tempfile::tempdir().unwrap();
    let infile = dir.path().join("infile.gz");
    let outfile = dir.path().join("outfile.gz");

    let mut w = opener.open(OpenSpec::write(infile.as_path())).unwrap();
    w.write_all(b"carried across\n").unwrap();
    w.close().unwrap();

    let mut src = opener.open(OpenSpec::read(infile.as_path())).unwrap();
    let mut dst = opener.open(OpenSpec::write(outfile.as_path())).unwrap();
    std::io::copy(&mut src, &mut dst).unwrap();
    src.close().unwrap();
    dst.close().unwrap();

    let mut back = opener.open(OpenSpec::read(outfile.as_path())).unwrap();
    let mut text = String::new();
    back.read_to_string(&mut text).unwrap();
    assert_eq!(text, "carried across\n");
}

#[test]
fn explicit_format_overrides_extension() {
    let opener = opener();
    let dir = tempfile::tempdir().unwrap();
    // A .txt name, compressed anyway because the caller said so.
    let path = dir.path().join("notes.txt");

    let mut out = opener
        .open(OpenSpec::write(path.as_path()).format("xz"))
        .unwrap();
    out.write_all(b"explicitly xz").unwrap();
    out.close().unwrap();

    let mut back = opener.open(OpenSpec::read(path.as_path())).unwrap();
    assert_eq!(back.format(), Some("xz"));
    let mut text = String::new();
    back.read_to_string(&mut text).unwrap();
    assert_eq!(text, "explicitly xz");
}

#[test]
fn misleading_extension_is_ignored_on_read() {
    let opener = opener();
    let dir = tempfile::tempdir().unwrap();
    // bzip2 bytes behind a .gz name.
    let path = dir.path().join("mislabelled.gz");

    let mut out = opener
        .open(OpenSpec::write(path.as_path()).format("bzip2"))
        .unwrap();
    out.write_all(b"content wins\n").unwrap();
    out.close().unwrap();

    let mut back = opener.open(OpenSpec::read(path.as_path())).unwrap();
    assert_eq!(back.format(), Some("bzip2"));
    let mut text = String::new();
    back.read_to_string(&mut text).unwrap();
    assert_eq!(text, "content wins\n");
}

#[test]
fn validate_rejects_wrong_format_and_names_the_detected_one() {
    let opener = opener();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("actually.xz");

    let mut out = opener.open(OpenSpec::write(path.as_path())).unwrap();
    out.write_all(b"data").unwrap();
    out.close().unwrap();

    let err = opener
        .open(OpenSpec::read(path.as_path()).format("gzip").validate())
        .unwrap_err();
    match err {
        Error::FormatMismatch { requested, detected } => {
            assert_eq!(requested, "gzip");
            assert_eq!(detected.as_deref(), Some("xz"));
        }
        other => panic!("expected format mismatch, got {other}"),
    }
}

#[test]
fn without_validation_a_wrong_format_opens_and_fails_in_the_codec() {
    let opener = opener();
    let buf = SharedBuffer::new();
    let mut out = opener
        .open(OpenSpec::write(buf.clone()).format("gzip"))
        .unwrap();
    out.write_all(b"data").unwrap();
    out.close().unwrap();
    buf.rewind();

    // gzip bytes opened as bzip2, no validation: the open itself succeeds.
    let mut s = opener
        .open(OpenSpec::read(buf).format("bzip2"))
        .unwrap();
    assert_eq!(s.format(), Some("bzip2"));
    // The decoder rejects the stream at read time.
    let mut sink = Vec::new();
    assert!(s.read_to_end(&mut sink).is_err());
}

#[test]
fn validate_on_uncompressed_bytes_reports_no_detected_format() {
    let opener = opener();
    let err = opener
        .open(
            OpenSpec::read(SharedBuffer::text("just text"))
                .format("gzip")
                .validate(),
        )
        .unwrap_err();
    match err {
        Error::FormatMismatch { detected, .. } => assert!(detected.is_none()),
        other => panic!("expected format mismatch, got {other}"),
    }
}

#[test]
fn compression_none_reads_compressed_bytes_raw() {
    let opener = opener();
    let buf = SharedBuffer::new();
    let mut out = opener
        .open(OpenSpec::write(buf.clone()).format("gzip"))
        .unwrap();
    out.write_all(b"wrapped").unwrap();
    out.close().unwrap();
    buf.rewind();

    let mut raw = opener
        .open(OpenSpec::read(buf).compression(Compression::None))
        .unwrap();
    assert_eq!(raw.format(), None);
    let mut bytes = Vec::new();
    raw.read_to_end(&mut bytes).unwrap();
    // Raw gzip bytes, not the payload.
    assert_eq!(&bytes[..2], &[0x1f, 0x8b]);
}

#[test]
fn level_out_of_range_is_clamped_not_rejected() {
    let opener = opener();
    let buf = SharedBuffer::new();
    let mut out = opener
        .open(OpenSpec::write(buf.clone()).format("gzip").level(99))
        .unwrap();
    out.write_all(b"still fine").unwrap();
    out.close().unwrap();

    buf.rewind();
    let mut back = opener.open(OpenSpec::read(buf)).unwrap();
    let mut text = String::new();
    back.read_to_string(&mut text).unwrap();
    assert_eq!(text, "still fine");
}

#[test]
fn close_is_idempotent_and_drop_after_close_is_quiet() {
    let opener = opener();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("once.gz");

    let mut s = opener.open(OpenSpec::write(path.as_path())).unwrap();
    s.write_all(b"x").unwrap();
    s.close().unwrap();
    s.close().unwrap();
    drop(s);

    let mut r = opener.open(OpenSpec::read(path.as_path())).unwrap();
    let mut text = String::new();
    r.read_to_string(&mut text).unwrap();
    assert_eq!(text, "x");
}

#[test]
fn drop_finalises_an_owned_writer() {
    let opener = opener();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dropped.gz");

    {
        let mut s = opener.open(OpenSpec::write(path.as_path())).unwrap();
        s.write_all(b"finished by drop").unwrap();
        // No explicit close; ownership finalises on drop.
    }

    let mut r = opener.open(OpenSpec::read(path.as_path())).unwrap();
    let mut text = String::new();
    r.read_to_string(&mut text).unwrap();
    assert_eq!(text, "finished by drop");
}

#[test]
fn string_specs_classify_sources() {
    // Only classification here; stdio opens are covered by hand.
    let spec = OpenSpec::parse("/tmp/some/file.gz", Access::Read);
    assert!(matches!(spec.source, zopen::Source::Path(_)));

    let spec = OpenSpec::parse("https://example.com/x.gz", Access::Read);
    assert!(matches!(spec.source, zopen::Source::Url(_)));

    let spec = OpenSpec::parse("| sort", Access::Read);
    assert!(matches!(spec.source, zopen::Source::Command(_)));
}

#[test]
fn lines_over_a_compressed_file() {
    let opener = opener();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lines.gz");

    let mut w = opener
        .open(OpenSpec::write(path.as_path()).text())
        .unwrap();
    w.write_all(b"alpha\nbeta\ngamma\n").unwrap();
    w.close().unwrap();

    let mut r = opener
        .open(OpenSpec::read(path.as_path()).text())
        .unwrap();
    let lines: Vec<String> = r.lines().unwrap().map(|l| l.unwrap()).collect();
    assert_eq!(lines, ["alpha", "beta", "gamma"]);
}

#[test]
fn caller_writer_handle_is_not_owned_by_default() {
    let opener = opener();
    let buf = SharedBuffer::new();
    let mut s = opener
        .open(OpenSpec::write(zopen::Source::Writer(Box::new(buf.clone()))).format("gzip"))
        .unwrap();
    s.write_all(b"handle").unwrap();
    // Explicit close still finalises the codec into the caller's sink.
    s.close().unwrap();
    assert!(!buf.is_empty());
}

#[cfg(unix)]
#[test]
fn unreadable_file_is_permission_denied() {
    use std::os::unix::fs::PermissionsExt;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("locked");
    std::fs::write(&path, b"secret").unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o000)).unwrap();

    // Root bypasses permission bits; only assert when the open failed.
    if let Err(err) = opener().open(OpenSpec::read(path.as_path())) {
        assert!(matches!(err, Error::PermissionDenied(_)));
    }
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();
}
