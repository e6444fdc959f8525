//! Framed block codec: length-prefixed `BlobHeader` + `Blob` frames,
//! payload inflation, frame writing and blob counting.

use byteorder::{ByteOrder, NetworkEndian, WriteBytesExt};
use flate2::read::ZlibDecoder;
use prost::Message;

use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};

use crate::error::{BlobError, ExtractError};
use crate::osmpbf;

/// Upper bound on the encoded `BlobHeader` length.
const MAX_BLOB_HEADER_SIZE: i32 = 64 * 1024 * 1024;

/// One framed blob, with its `Blob` message still undecoded.
#[derive(Debug)]
pub struct RawBlob {
    pub header: osmpbf::BlobHeader,
    pub data: Vec<u8>,
}

/// Reads the next frame's `BlobHeader`. Returns `None` at a clean end
/// of file.
pub fn read_blob_header(reader: &mut impl Read) -> Result<Option<osmpbf::BlobHeader>, ExtractError> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(ExtractError::Io(e)),
    }

    let header_len = NetworkEndian::read_i32(&len_buf);
    if !(0..=MAX_BLOB_HEADER_SIZE).contains(&header_len) {
        return Err(ExtractError::MalformedFrame(format!(
            "blob header length {} out of bounds",
            header_len
        )));
    }

    let mut buf = vec![0u8; header_len as usize];
    reader.read_exact(&mut buf)?;
    let header = osmpbf::BlobHeader::decode(buf.as_slice())
        .map_err(|e| ExtractError::MalformedFrame(e.to_string()))?;
    if header.datasize < 0 {
        return Err(ExtractError::MalformedFrame(format!(
            "negative blob size {}",
            header.datasize
        )));
    }
    Ok(Some(header))
}

/// Reads `size` bytes of `Blob` message.
pub fn read_blob(reader: &mut impl Read, size: i32) -> Result<Vec<u8>, ExtractError> {
    let mut buf = vec![0u8; size as usize];
    reader.read_exact(&mut buf).map_err(ExtractError::BlobRead)?;
    Ok(buf)
}

/// Reads one whole frame. Returns `None` at a clean end of file.
pub fn next_blob(reader: &mut impl Read) -> Result<Option<RawBlob>, ExtractError> {
    let header = match read_blob_header(reader)? {
        Some(header) => header,
        None => return Ok(None),
    };
    let data = read_blob(reader, header.datasize)?;
    Ok(Some(RawBlob { header, data }))
}

/// Decodes a `Blob` message and returns its payload bytes, inflating
/// zlib storage to exactly `raw_size` bytes.
pub fn decode_payload(data: &[u8]) -> Result<Vec<u8>, BlobError> {
    let blob = osmpbf::Blob::decode(data)?;

    if let Some(raw) = blob.raw {
        Ok(raw)
    } else if let Some(zlib_data) = blob.zlib_data {
        let raw_size = blob.raw_size.ok_or(BlobError::MissingRawSize)?;
        let mut payload = vec![0u8; raw_size as usize];
        let mut decoder = ZlibDecoder::new(zlib_data.as_slice());
        decoder
            .read_exact(&mut payload)
            .map_err(BlobError::Inflate)?;
        Ok(payload)
    } else {
        Err(BlobError::UnsupportedStorage)
    }
}

/// Writes one frame: BE header length, `BlobHeader`, then a `Blob`
/// carrying the marshalled payload uncompressed.
pub fn write_frame(
    writer: &mut impl Write,
    payload: &impl Message,
    blob_type: &str,
) -> Result<(), ExtractError> {
    let content = payload.encode_to_vec();
    let blob = osmpbf::Blob {
        raw_size: Some(content.len() as i32),
        raw: Some(content),
        ..Default::default()
    };
    let blob_bytes = blob.encode_to_vec();

    let blob_header = osmpbf::BlobHeader {
        r#type: blob_type.to_string(),
        indexdata: None,
        datasize: blob_bytes.len() as i32,
    };
    let header_bytes = blob_header.encode_to_vec();

    writer.write_i32::<NetworkEndian>(header_bytes.len() as i32)?;
    writer.write_all(&header_bytes)?;
    writer.write_all(&blob_bytes)?;
    Ok(())
}

/// Counts the blobs in `file` by reading frame headers and seeking past
/// each payload.
pub fn count_blobs(file: &mut File) -> Result<usize, ExtractError> {
    file.seek(SeekFrom::Start(0))?;
    let mut count = 0;
    while let Some(header) = read_blob_header(file)? {
        file.seek(SeekFrom::Current(i64::from(header.datasize)))?;
        count += 1;
    }
    Ok(count)
}
