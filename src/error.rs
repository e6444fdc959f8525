use std::io;

/// Failure decoding the payload of a single blob.
#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    #[error("protobuf decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("blob carries neither raw nor zlib data")]
    UnsupportedStorage,

    #[error("compressed blob without decompressed size")]
    MissingRawSize,

    #[error("inflate error: {0}")]
    Inflate(#[source] io::Error),
}

/// Run-level failure. Every variant is fatal; the variant determines
/// the process exit status.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("unable to open file: {0}")]
    Open(#[source] io::Error),

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("malformed blob frame: {0}")]
    MalformedFrame(String),

    #[error("blob read error: {0}")]
    BlobRead(#[source] io::Error),

    #[error("OSMHeader blob error: {0}")]
    Header(#[source] BlobError),

    #[error("unsupported feature required in OSM header: {0}")]
    UnsupportedFeature(String),

    #[error("OSMData blob error: {0}")]
    Data(#[source] BlobError),
}

impl ExtractError {
    pub fn exit_code(&self) -> i32 {
        match self {
            ExtractError::Open(_) => 1,
            ExtractError::Io(_) | ExtractError::MalformedFrame(_) => 2,
            ExtractError::BlobRead(_) => 3,
            ExtractError::Header(_) | ExtractError::UnsupportedFeature(_) => 5,
            ExtractError::Data(_) => 6,
        }
    }
}
