//! Zip entry reader/writer for the stabilizer.
//!
//! The writer re-emits every entry with deflate compression, a fixed
//! timestamp representation, and no comments or extra fields; the archive
//! comment is likewise dropped.

use std::io::{Cursor, Read, Write};

use jiff::civil::DateTime as CivilDateTime;
use zip::{CompressionMethod, DateTime, ZipArchive, ZipWriter, write::SimpleFileOptions};

use crate::{Error, Result};

use super::{Entry, EntryKind};

fn corrupt(err: impl std::fmt::Display) -> Error {
    Error::CorruptArchive(format!("zip: {err}"))
}

const S_IFMT: u32 = 0o170000;
const S_IFLNK: u32 = 0o120000;

/// Read all entries from a zip archive.
pub fn read_entries(input: &[u8]) -> Result<Vec<Entry>> {
    let mut archive = ZipArchive::new(Cursor::new(input)).map_err(corrupt)?;
    let mut entries = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let mut file = archive.by_index(index).map_err(corrupt)?;
        let name = file.name().to_string();
        let mode = file
            .unix_mode()
            .unwrap_or(if file.is_dir() { 0o755 } else { 0o644 });
        let mut body = Vec::new();
        file.read_to_end(&mut body).map_err(corrupt)?;
        let kind = if file.is_dir() {
            EntryKind::Dir
        } else if mode & S_IFMT == S_IFLNK {
            EntryKind::Symlink {
                link: String::from_utf8_lossy(&body).into_owned(),
            }
        } else {
            EntryKind::File
        };
        let mtime = file
            .last_modified()
            .map(datetime_to_epoch)
            .unwrap_or_default();
        entries.push(Entry {
            name,
            kind,
            mtime,
            uid: 0,
            gid: 0,
            mode: mode & !S_IFMT,
            body,
            comment: file.comment().to_string(),
        });
    }
    Ok(entries)
}

/// Write entries as a zip archive.
///
/// Zip output requires seeking, so the archive is assembled in memory and
/// copied out once finished.
pub fn write_entries(output: &mut dyn Write, entries: &[Entry]) -> Result<()> {
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = ZipWriter::new(&mut cursor);
        for entry in entries {
            let options = SimpleFileOptions::default()
                .compression_method(CompressionMethod::Deflated)
                .unix_permissions(entry.mode)
                .last_modified_time(epoch_to_datetime(entry.mtime));
            match &entry.kind {
                EntryKind::Dir => {
                    writer
                        .add_directory(entry.name.as_str(), options)
                        .map_err(corrupt)?;
                }
                EntryKind::Symlink { link } => {
                    writer
                        .add_symlink(entry.name.as_str(), link.as_str(), options)
                        .map_err(corrupt)?;
                }
                EntryKind::File => {
                    writer
                        .start_file(entry.name.as_str(), options)
                        .map_err(corrupt)?;
                    writer.write_all(&entry.body).map_err(corrupt)?;
                }
            }
        }
        writer.finish().map_err(corrupt)?;
    }
    output.write_all(&cursor.into_inner())?;
    Ok(())
}

fn datetime_to_epoch(datetime: DateTime) -> u64 {
    CivilDateTime::new(
        datetime.year() as i16,
        datetime.month() as i8,
        datetime.day() as i8,
        datetime.hour() as i8,
        datetime.minute() as i8,
        datetime.second() as i8,
        0,
    )
    .ok()
    .and_then(|civil| civil.to_zoned(jiff::tz::TimeZone::UTC).ok())
    .map(|zoned| zoned.timestamp().as_second().max(0) as u64)
    .unwrap_or_default()
}

fn epoch_to_datetime(epoch: u64) -> DateTime {
    if epoch == 0 {
        return DateTime::default();
    }
    let Ok(timestamp) = jiff::Timestamp::from_second(epoch as i64) else {
        return DateTime::default();
    };
    let civil = timestamp.to_zoned(jiff::tz::TimeZone::UTC).datetime();
    DateTime::from_date_and_time(
        civil.year().max(1980) as u16,
        civil.month() as u8,
        civil.day() as u8,
        civil.hour() as u8,
        civil.minute() as u8,
        civil.second() as u8,
    )
    .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq as pretty_assert_eq;

    use super::*;
    use crate::{
        stabilize::{Format, Stabilizer},
        target::{Ecosystem, Target},
    };

    /// Build a zip with the given `(name, body, datetime, mode)` entries.
    fn build_zip(files: &[(&str, &[u8], DateTime, u32)]) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = ZipWriter::new(&mut cursor);
            for (name, body, datetime, mode) in files {
                let options = SimpleFileOptions::default()
                    .last_modified_time(*datetime)
                    .unix_permissions(*mode);
                writer.start_file(*name, options).unwrap();
                writer.write_all(body).unwrap();
            }
            writer.finish().unwrap();
        }
        cursor.into_inner()
    }

    fn datetime(year: u16, month: u8) -> DateTime {
        DateTime::from_date_and_time(year, month, 1, 12, 30, 0).unwrap()
    }

    #[test]
    fn stabilize_ignores_order_and_timestamps() {
        let stabilizer = Stabilizer::for_format(Format::Zip);
        let first = build_zip(&[
            ("a.txt", b"a", datetime(2020, 1), 0o644),
            ("b.txt", b"b", datetime(2021, 6), 0o644),
        ]);
        let second = build_zip(&[
            ("b.txt", b"b", datetime(1995, 3), 0o664),
            ("a.txt", b"a", datetime(2024, 12), 0o600),
        ]);
        pretty_assert_eq!(
            stabilizer.run_to_vec(&first).unwrap(),
            stabilizer.run_to_vec(&second).unwrap()
        );
    }

    #[test]
    fn stabilize_is_idempotent() {
        let stabilizer = Stabilizer::for_format(Format::Zip);
        let raw = build_zip(&[
            ("z.txt", b"z", datetime(2022, 2), 0o644),
            ("a.txt", b"a", datetime(2022, 2), 0o755),
        ]);
        let once = stabilizer.run_to_vec(&raw).unwrap();
        let twice = stabilizer.run_to_vec(&once).unwrap();
        pretty_assert_eq!(once, twice);
    }

    #[test]
    fn jar_profile_strips_signature_files() {
        let target = Target::new(Ecosystem::Maven, "com.example:foo", "2.1", "foo-2.1.jar");
        let stabilizer = Stabilizer::for_target(&target);
        let raw = build_zip(&[
            ("META-INF/MANIFEST.MF", b"Manifest-Version: 1.0\n", datetime(2020, 1), 0o644),
            ("META-INF/CERT.SF", b"sig", datetime(2020, 1), 0o644),
            ("META-INF/CERT.RSA", b"sig", datetime(2020, 1), 0o644),
            ("com/example/Foo.class", b"\xca\xfe\xba\xbe", datetime(2020, 1), 0o644),
        ]);
        let stabilized = stabilizer.run_to_vec(&raw).unwrap();
        let names: Vec<String> = read_entries(&stabilized)
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        pretty_assert_eq!(
            names,
            vec!["META-INF/MANIFEST.MF".to_string(), "com/example/Foo.class".to_string()]
        );
    }

    #[test]
    fn corrupt_archive_is_reported() {
        let err = read_entries(b"not a zip").unwrap_err();
        assert!(matches!(err, Error::CorruptArchive(_)));
    }
}
