//! Upload size limits shared by the relay and the uploader

/// One mebibyte
pub const MIB: u64 = 1024 * 1024;

/// Largest file accepted by the single-shot relay and by presigned uploads
pub const MAX_FILE_SIZE: u64 = 300 * MIB;

/// Largest single part accepted by `/api/upload-chunk`
pub const MAX_CHUNK_SIZE: u64 = 45 * MIB;

/// Request-size guard for every route except the single-shot upload
pub const MAX_REQUEST_SIZE: u64 = 50 * MIB;

/// Chunk size the uploader uses for multipart uploads (below [`MAX_CHUNK_SIZE`])
pub const DEFAULT_CHUNK_SIZE: u64 = 40 * MIB;

/// Maximum number of sessions in one upload batch
pub const MAX_BATCH_SIZE: usize = 5;

/// Machine-readable code for a request rejected by the global size guard
pub const CODE_REQUEST_TOO_LARGE: &str = "REQUEST_TOO_LARGE";

/// Machine-readable code for a file or chunk above its per-route limit
pub const CODE_FILE_TOO_LARGE: &str = "FILE_TOO_LARGE";

/// Whether a whole file of `size` bytes may be uploaded
pub fn file_size_allowed(size: u64) -> bool {
    size <= MAX_FILE_SIZE
}

/// Number of parts needed to upload `total` bytes in `chunk_size` pieces
pub fn part_count(total: u64, chunk_size: u64) -> u64 {
    if chunk_size == 0 {
        return 0;
    }
    total.div_ceil(chunk_size)
}
