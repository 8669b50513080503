//! Zip fixture helpers for unit tests.

use std::io::{Cursor, Seek, Write};
use std::path::Path;

use zip::write::FileOptions;
use zip::ZipWriter;

fn write_entries<W: Write + Seek>(writer: &mut ZipWriter<W>, entries: &[(&str, &[u8])]) {
    let options = FileOptions::default();
    for (name, bytes) in entries {
        writer.start_file(*name, options).unwrap();
        writer.write_all(bytes).unwrap();
    }
}

/// Build an archive in memory, for bundling inside another archive.
pub(crate) fn archive_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    write_entries(&mut writer, entries);
    writer.finish().unwrap().into_inner()
}

/// Write an archive to `path`.
pub(crate) fn write_archive(path: &Path, entries: &[(&str, &[u8])]) {
    let file = std::fs::File::create(path).unwrap();
    let mut writer = ZipWriter::new(file);
    write_entries(&mut writer, entries);
    writer.finish().unwrap();
}

/// An entry written byte for byte, bypassing `ZipWriter`.
///
/// The data is always stored uncompressed, whatever `method` the headers
/// claim.
pub(crate) struct RawEntry<'a> {
    pub name: &'a str,
    pub data: &'a [u8],
    /// Compression method recorded in the headers.
    pub method: u16,
    /// Uncompressed size to declare through a zip64 extra field.
    pub declared_size: Option<u64>,
}

impl<'a> RawEntry<'a> {
    pub(crate) fn stored(name: &'a str, data: &'a [u8]) -> Self {
        Self {
            name,
            data,
            method: 0,
            declared_size: None,
        }
    }
}

fn put_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn put_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

/// CRC-32 of `data`, as computed by the zip crate.
fn crc_of(data: &[u8]) -> u32 {
    let options = FileOptions::default().compression_method(zip::CompressionMethod::Stored);
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    writer.start_file("crc", options).unwrap();
    writer.write_all(data).unwrap();
    let bytes = writer.finish().unwrap().into_inner();
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
    let crc = archive.by_index(0).unwrap().crc32();
    crc
}

/// Hand-assemble an archive from raw entries.
pub(crate) fn raw_archive(entries: &[RawEntry]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut central = Vec::new();

    for entry in entries {
        let offset = out.len() as u32;
        let crc = crc_of(entry.data);
        let len = entry.data.len() as u32;
        let name_len = entry.name.len() as u16;

        put_u32(&mut out, 0x0403_4b50);
        put_u16(&mut out, 20);
        put_u16(&mut out, 0);
        put_u16(&mut out, entry.method);
        put_u16(&mut out, 0);
        put_u16(&mut out, 0x21);
        put_u32(&mut out, crc);
        put_u32(&mut out, len);
        put_u32(&mut out, len);
        put_u16(&mut out, name_len);
        put_u16(&mut out, 0);
        out.extend_from_slice(entry.name.as_bytes());
        out.extend_from_slice(entry.data);

        let mut extra = Vec::new();
        if let Some(size) = entry.declared_size {
            put_u16(&mut extra, 0x0001);
            put_u16(&mut extra, 8);
            extra.extend_from_slice(&size.to_le_bytes());
        }

        put_u32(&mut central, 0x0201_4b50);
        put_u16(&mut central, 45);
        put_u16(&mut central, 45);
        put_u16(&mut central, 0);
        put_u16(&mut central, entry.method);
        put_u16(&mut central, 0);
        put_u16(&mut central, 0x21);
        put_u32(&mut central, crc);
        put_u32(&mut central, len);
        put_u32(
            &mut central,
            if entry.declared_size.is_some() { u32::MAX } else { len },
        );
        put_u16(&mut central, name_len);
        put_u16(&mut central, extra.len() as u16);
        put_u16(&mut central, 0);
        put_u16(&mut central, 0);
        put_u16(&mut central, 0);
        put_u32(&mut central, 0);
        put_u32(&mut central, offset);
        central.extend_from_slice(entry.name.as_bytes());
        central.extend_from_slice(&extra);
    }

    let central_offset = out.len() as u32;
    let central_size = central.len() as u32;
    let count = entries.len() as u16;
    out.extend_from_slice(&central);

    put_u32(&mut out, 0x0605_4b50);
    put_u16(&mut out, 0);
    put_u16(&mut out, 0);
    put_u16(&mut out, count);
    put_u16(&mut out, count);
    put_u32(&mut out, central_size);
    put_u32(&mut out, central_offset);
    put_u16(&mut out, 0);
    out
}

/// Overwrite the local header signature of entry `index` in `archive`.
///
/// The central directory still lists the entry, but opening its data fails.
pub(crate) fn break_local_header(archive: &mut [u8], index: usize) {
    let signature = 0x0403_4b50u32.to_le_bytes();
    let offset = archive
        .windows(4)
        .enumerate()
        .filter(|(_, window)| *window == signature)
        .map(|(offset, _)| offset)
        .nth(index)
        .unwrap();
    archive[offset..offset + 4].copy_from_slice(b"XXXX");
}
