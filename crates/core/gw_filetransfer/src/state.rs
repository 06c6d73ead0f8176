//! The active-download state machine: one slot per gateway, tracking the
//! chunk chain of the file currently being received.

use gw_protocol::codec::file::Chunk;
use gw_protocol::codec::file::ZERO_HASH;

/// `packet_size = min(maxPacket, size + 64)`: the envelope overhead (two
/// 32-byte hashes) is folded into the packet size so a caller requesting
/// `packet_size` bytes always gets a whole chunk.
pub fn packet_size(size: u64, max_packet: u32) -> u32 {
    let with_envelope = size.saturating_add(64);
    max_packet.min(with_envelope.min(u64::from(u32::MAX)) as u32)
}

/// `packet_count = ceil(size / (maxPacket - 64))`.
pub fn packet_count(size: u64, max_packet: u32) -> u32 {
    let payload_per_packet = max_packet.saturating_sub(64).max(1) as u64;
    size.div_ceil(payload_per_packet).max(1) as u32
}

pub struct FileTransferState {
    pub name: String,
    pub size: u64,
    pub expected_hash: [u8; 32],
    pub packet_size: u32,
    pub packet_count: u32,
    pub next_chunk_index: u32,
    pub previous_hash: [u8; 32],
    pub buffer: Vec<u8>,
    /// Failed accept attempts (bad chain hash) for `next_chunk_index` since
    /// it was last requested; reset to 0 whenever a chunk is accepted.
    /// Tracked on the state itself, independent of
    /// [`gw_lifecycle::RetryTable`]'s timeout-driven retries, so a sender
    /// that keeps resending bad chunks faster than the packet timeout still
    /// exhausts its retry budget.
    pub retry_count: u32,
}

impl FileTransferState {
    pub fn new(name: String, size: u64, expected_hash: [u8; 32], max_packet: u32) -> Self {
        FileTransferState {
            name,
            size,
            expected_hash,
            packet_size: packet_size(size, max_packet),
            packet_count: packet_count(size, max_packet),
            next_chunk_index: 0,
            previous_hash: ZERO_HASH,
            buffer: Vec::with_capacity(size as usize),
            retry_count: 0,
        }
    }

    pub fn is_last_chunk(&self) -> bool {
        self.next_chunk_index + 1 >= self.packet_count
    }

    /// Validates `chunk`'s own hash and its chain link to the previously
    /// accepted chunk, appending its data on success.
    pub fn accept(&mut self, chunk: &Chunk) -> bool {
        if !chunk.hash_is_valid() || chunk.previous_hash != self.previous_hash {
            return false;
        }
        self.buffer.extend_from_slice(&chunk.data);
        self.previous_hash = chunk.hash;
        self.next_chunk_index += 1;
        self.retry_count = 0;
        true
    }

    /// Records one more failed attempt at the current chunk index. Returns
    /// `true` once the retry budget (`max_retries`) is exhausted.
    pub fn note_failed_attempt(&mut self, max_retries: u32) -> bool {
        self.retry_count += 1;
        self.retry_count >= max_retries
    }

    /// Whole-file SHA-256 check against the hash supplied at `upload_initiate`.
    pub fn whole_file_hash_matches(&self) -> bool {
        let digest = sha256::digest(self.buffer.as_slice());
        let mut actual = [0u8; 32];
        hex::decode_to_slice(&digest, &mut actual).expect("sha256::digest always returns 64 hex chars");
        actual == self.expected_hash
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packet_count_rounds_up() {
        assert_eq!(packet_count(1000, 264), 5);
        assert_eq!(packet_count(800, 264), 4);
    }

    #[test]
    fn packet_size_never_exceeds_max_packet() {
        assert_eq!(packet_size(100, 264), 164);
        assert_eq!(packet_size(10_000, 264), 264);
    }

    #[test]
    fn chain_breaks_when_previous_hash_does_not_match() {
        let mut state = FileTransferState::new("f.bin".to_string(), 11, ZERO_HASH, 264);
        let first = Chunk::new(ZERO_HASH, b"hello world".to_vec());
        assert!(state.accept(&first));

        let bogus_previous = Chunk::new([9u8; 32], b"more data".to_vec());
        assert!(!state.accept(&bogus_previous));
    }

    #[test]
    fn retry_budget_is_exhausted_after_three_failed_attempts() {
        let mut state = FileTransferState::new("f.bin".to_string(), 11, ZERO_HASH, 264);
        assert!(!state.note_failed_attempt(3));
        assert!(!state.note_failed_attempt(3));
        assert!(state.note_failed_attempt(3));
    }

    #[test]
    fn successful_accept_resets_retry_count() {
        let mut state = FileTransferState::new("f.bin".to_string(), 11, ZERO_HASH, 264);
        assert!(!state.note_failed_attempt(3));
        assert!(!state.note_failed_attempt(3));
        let chunk = Chunk::new(ZERO_HASH, b"hello world".to_vec());
        assert!(state.accept(&chunk));
        assert_eq!(state.retry_count, 0);
    }

    #[test]
    fn accepted_chunks_accumulate_and_verify_whole_file_hash() {
        let data = b"hello world".to_vec();
        let expected_digest = sha256::digest(data.as_slice());
        let mut expected_hash = [0u8; 32];
        hex::decode_to_slice(&expected_digest, &mut expected_hash).unwrap();

        let mut state = FileTransferState::new("f.bin".to_string(), data.len() as u64, expected_hash, 264);
        let chunk = Chunk::new(ZERO_HASH, data.clone());
        assert!(state.accept(&chunk));
        assert!(state.is_last_chunk());
        assert!(state.whole_file_hash_matches());
        assert_eq!(state.buffer, data);
    }
}
