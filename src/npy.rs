//! Minimal NPY/NPZ writer for the `null.npz` file: a serialized
//! float32 column named `null`, row-ordered as the squashed frame.
//! A `.npz` is an uncompressed-or-deflated zip containing one `.npy`
//! per array; here there is always exactly one member, `null.npy`.

use std::io::{Cursor, Read, Write};

use byteorder::{LittleEndian, WriteBytesExt};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::errs::SpanError;

const NPY_MAGIC: &[u8] = b"\x93NUMPY";

/// Encodes a 1-D `f32` array as an in-memory NPY v1.0 byte buffer.
fn encode_npy(values: &[f32]) -> Vec<u8> {
    let header_dict =
        format!("{{'descr': '<f4', 'fortran_order': False, 'shape': ({},), }}", values.len());
    // The header (magic + version + header-length field + dict) must be
    // padded so the data begins on a 64-byte boundary, per the NPY spec.
    let prefix_len = NPY_MAGIC.len() + 2 + 2;
    let unpadded = prefix_len + header_dict.len() + 1;
    let padded_total = unpadded.div_ceil(64) * 64;
    let pad = padded_total - unpadded;
    let mut header = header_dict;
    header.push_str(&" ".repeat(pad));
    header.push('\n');

    let mut out = Vec::with_capacity(padded_total + values.len() * 4);
    out.extend_from_slice(NPY_MAGIC);
    out.push(1); // major version
    out.push(0); // minor version
    out.write_u16::<LittleEndian>(header.len() as u16).expect("write to Vec never fails");
    out.extend_from_slice(header.as_bytes());
    for &v in values {
        out.write_f32::<LittleEndian>(v).expect("write to Vec never fails");
    }
    out
}

/// Parses a minimal NPY v1.0 `<f4` 1-D buffer back into its values.
/// Anything outside that exact shape is treated as a corrupt cache
/// entry (`StoredMismatch`), since this engine only ever writes the
/// shape `encode_npy` produces.
fn decode_npy(bytes: &[u8]) -> Result<Vec<f32>, String> {
    if bytes.len() < 10 || &bytes[0..6] != NPY_MAGIC {
        return Err("missing NPY magic".to_string());
    }
    let header_len = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
    let data_start = 10 + header_len;
    if bytes.len() < data_start {
        return Err("NPY header length exceeds buffer".to_string());
    }
    let header = std::str::from_utf8(&bytes[10..data_start]).map_err(|e| e.to_string())?;
    if !header.contains("'descr': '<f4'") {
        return Err(format!("unsupported NPY dtype in header: {header}"));
    }
    let payload = &bytes[data_start..];
    if payload.len() % 4 != 0 {
        return Err("NPY payload length is not a multiple of 4".to_string());
    }
    Ok(payload
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

/// Builds the `null.npz` bytes: a zip archive with one deflated member,
/// `null.npy`, matching numpy's own `savez` layout.
pub fn encode_null_npz(null_log_prob: &[f32]) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    {
        let mut writer = ZipWriter::new(&mut buf);
        let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
        writer.start_file("null.npy", options).expect("zip writer never fails on a Vec sink");
        writer
            .write_all(&encode_npy(null_log_prob))
            .expect("zip writer never fails on a Vec sink");
        writer.finish().expect("zip writer never fails on a Vec sink");
    }
    buf.into_inner()
}

/// Inverse of `encode_null_npz`. Returns `SpanError::StoredMismatch`
/// (with the given path used only for the error message) on anything
/// that doesn't look like a `null.npz` this module wrote.
pub fn decode_null_npz(bytes: &[u8], path: &std::path::Path) -> Result<Vec<f32>, SpanError> {
    let mismatch = || SpanError::StoredMismatch { path: path.to_path_buf() };
    let mut archive = ZipArchive::new(Cursor::new(bytes)).map_err(|_| mismatch())?;
    let mut file = archive.by_name("null.npy").map_err(|_| mismatch())?;
    let mut contents = Vec::new();
    file.read_to_end(&mut contents).map_err(|_| mismatch())?;
    decode_npy(&contents).map_err(|_| mismatch())
}
