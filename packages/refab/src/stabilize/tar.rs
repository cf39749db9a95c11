//! Tar and tar.gz entry readers/writers for the stabilizer.
//!
//! The writer re-emits entries from scratch with GNU headers, which drops
//! pax extension records, uname/gname strings, and device fields without
//! needing dedicated operators.

use std::io::{Read, Write};

use flate2::{Compression, GzBuilder, read::GzDecoder};
use tracing::trace;

use crate::{Error, Result};

use super::{Entry, EntryKind};

fn corrupt(err: std::io::Error) -> Error {
    Error::CorruptArchive(format!("tar: {err}"))
}

/// Read all entries from a plain tar stream.
pub fn read_entries(input: &[u8]) -> Result<Vec<Entry>> {
    read_from(input)
}

/// Read all entries from a gzip-compressed tar stream.
pub fn read_gz_entries(input: &[u8]) -> Result<Vec<Entry>> {
    read_from(GzDecoder::new(input))
}

fn read_from(reader: impl Read) -> Result<Vec<Entry>> {
    let mut archive = ::tar::Archive::new(reader);
    let mut entries = Vec::new();
    for entry in archive.entries().map_err(corrupt)? {
        let mut entry = entry.map_err(corrupt)?;
        let header = entry.header();
        let kind = match header.entry_type() {
            ::tar::EntryType::Directory => EntryKind::Dir,
            ::tar::EntryType::Symlink | ::tar::EntryType::Link => {
                let link = entry
                    .link_name()
                    .map_err(corrupt)?
                    .map(|p| p.to_string_lossy().into_owned())
                    .unwrap_or_default();
                EntryKind::Symlink { link }
            }
            ::tar::EntryType::Regular | ::tar::EntryType::GNUSparse => EntryKind::File,
            // Extension records (pax headers, long names) are folded into
            // the logical entries by the reader; anything else left over
            // carries no content we preserve.
            other => {
                trace!(?other, "skipping tar extension entry");
                continue;
            }
        };
        let name = entry
            .path()
            .map_err(corrupt)?
            .to_string_lossy()
            .into_owned();
        let mtime = header.mtime().map_err(corrupt)?;
        let uid = header.uid().map_err(corrupt)?;
        let gid = header.gid().map_err(corrupt)?;
        let mode = header.mode().map_err(corrupt)?;
        let mut body = Vec::new();
        entry.read_to_end(&mut body).map_err(corrupt)?;
        entries.push(Entry {
            name,
            kind,
            mtime,
            uid,
            gid,
            mode,
            body,
            comment: String::new(),
        });
    }
    Ok(entries)
}

/// Write entries as a plain tar stream.
pub fn write_entries(output: &mut dyn Write, entries: &[Entry]) -> Result<()> {
    let mut builder = ::tar::Builder::new(output);
    for entry in entries {
        let mut header = ::tar::Header::new_gnu();
        header.set_mtime(entry.mtime);
        header.set_uid(entry.uid);
        header.set_gid(entry.gid);
        header.set_mode(entry.mode);
        match &entry.kind {
            EntryKind::File => {
                header.set_entry_type(::tar::EntryType::Regular);
                header.set_size(entry.body.len() as u64);
                builder
                    .append_data(&mut header, &entry.name, entry.body.as_slice())
                    .map_err(corrupt)?;
            }
            EntryKind::Dir => {
                header.set_entry_type(::tar::EntryType::Directory);
                header.set_size(0);
                builder
                    .append_data(&mut header, &entry.name, std::io::empty())
                    .map_err(corrupt)?;
            }
            EntryKind::Symlink { link } => {
                header.set_entry_type(::tar::EntryType::Symlink);
                header.set_size(0);
                builder
                    .append_link(&mut header, &entry.name, link)
                    .map_err(corrupt)?;
            }
        }
    }
    builder.finish().map_err(corrupt)?;
    Ok(())
}

/// Write entries as a gzip-compressed tar stream with a canonical gzip
/// header (zero mtime, no name, fixed OS id).
pub fn write_gz_entries(output: &mut dyn Write, entries: &[Entry]) -> Result<()> {
    let mut encoder = GzBuilder::new().mtime(0).write(output, Compression::default());
    write_entries(&mut encoder, entries)?;
    encoder.finish().map_err(corrupt)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq as pretty_assert_eq;

    use super::*;
    use crate::stabilize::{Format, Stabilizer};

    /// Build a tar with the given entries, each `(name, body, mtime, mode)`.
    fn build_tar(files: &[(&str, &[u8], u64, u32)]) -> Vec<u8> {
        let mut builder = ::tar::Builder::new(Vec::new());
        for (name, body, mtime, mode) in files {
            let mut header = ::tar::Header::new_ustar();
            header.set_size(body.len() as u64);
            header.set_mtime(*mtime);
            header.set_mode(*mode);
            header.set_uid(501);
            header.set_gid(20);
            builder.append_data(&mut header, name, *body).unwrap();
        }
        builder.into_inner().unwrap()
    }

    #[test]
    fn roundtrip_preserves_contents() {
        let raw = build_tar(&[("package/index.js", b"module.exports = 1;\n", 1_600_000_000, 0o664)]);
        let entries = read_entries(&raw).unwrap();
        pretty_assert_eq!(entries.len(), 1);
        pretty_assert_eq!(entries[0].name, "package/index.js");
        pretty_assert_eq!(entries[0].body, b"module.exports = 1;\n");
    }

    #[test]
    fn stabilize_is_idempotent() {
        let stabilizer = Stabilizer::for_format(Format::Tar);
        let raw = build_tar(&[
            ("package/b.js", b"b", 1_600_000_000, 0o664),
            ("package/a.js", b"a", 1_600_000_123, 0o755),
        ]);
        let once = stabilizer.run_to_vec(&raw).unwrap();
        let twice = stabilizer.run_to_vec(&once).unwrap();
        pretty_assert_eq!(once, twice);
    }

    #[test]
    fn stabilize_ignores_order_timestamps_and_owners() {
        let stabilizer = Stabilizer::for_format(Format::Tar);
        let first = build_tar(&[
            ("package/a.js", b"a", 1_600_000_000, 0o644),
            ("package/b.js", b"b", 1_600_000_000, 0o644),
        ]);
        let second = build_tar(&[
            ("package/b.js", b"b", 1_700_999_999, 0o664),
            ("package/a.js", b"a", 42, 0o600),
        ]);
        pretty_assert_eq!(
            stabilizer.run_to_vec(&first).unwrap(),
            stabilizer.run_to_vec(&second).unwrap()
        );
    }

    #[test]
    fn stabilize_distinguishes_contents() {
        let stabilizer = Stabilizer::for_format(Format::Tar);
        let first = build_tar(&[("package/a.js", b"a", 0, 0o644)]);
        let second = build_tar(&[("package/a.js", b"changed", 0, 0o644)]);
        assert_ne!(
            stabilizer.run_to_vec(&first).unwrap(),
            stabilizer.run_to_vec(&second).unwrap()
        );
    }

    #[test]
    fn gz_wrapper_is_invariant_to_gzip_header() {
        let stabilizer = Stabilizer::for_format(Format::TarGz);
        let inner = build_tar(&[("package/a.js", b"a", 7, 0o644)]);

        let mut with_name = GzBuilder::new()
            .filename("archive.tar")
            .mtime(1_600_000_000)
            .write(Vec::new(), Compression::fast());
        std::io::Write::write_all(&mut with_name, &inner).unwrap();
        let first = with_name.finish().unwrap();

        let mut plain = GzBuilder::new().write(Vec::new(), Compression::best());
        std::io::Write::write_all(&mut plain, &inner).unwrap();
        let second = plain.finish().unwrap();

        pretty_assert_eq!(
            stabilizer.run_to_vec(&first).unwrap(),
            stabilizer.run_to_vec(&second).unwrap()
        );
    }

    #[test]
    fn corrupt_archive_is_reported() {
        let err = read_gz_entries(b"definitely not gzip").unwrap_err();
        assert!(matches!(err, Error::CorruptArchive(_)));
    }
}
