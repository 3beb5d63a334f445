//! Deterministic Byte Generator
//!
//! Counter-mode expansion of a 32-byte seed. The whole stream is computed
//! up front by [`DeterministicByteGenerator::pregenerate`]; consumers then
//! read it sequentially and can never read past its end.

use super::{BlockFunction, DbgError, BLOCK_SIZE, MAX_BLOCKS};
use zeroize::Zeroize;

/// Seeded, pre-expanded byte stream
pub struct DeterministicByteGenerator {
    seed: [u8; BLOCK_SIZE],
    blocks: u64,
    buffer: Vec<u8>,
    offset: usize,
    block_function: BlockFunction,
}

impl DeterministicByteGenerator {
    /// Create a generator from seed bytes.
    /// Only the first 32 bytes are used; shorter seeds are rejected.
    pub fn new(seed: &[u8]) -> Result<Self, DbgError> {
        if seed.len() < BLOCK_SIZE {
            return Err(DbgError::SeedTooShort { len: seed.len() });
        }

        let mut owned = [0u8; BLOCK_SIZE];
        owned.copy_from_slice(&seed[..BLOCK_SIZE]);

        Ok(Self {
            seed: owned,
            blocks: 0,
            buffer: Vec::new(),
            offset: 0,
            block_function: BlockFunction::default(),
        })
    }

    /// Select the block construction (before pre-generation)
    pub fn with_block_function(mut self, block_function: BlockFunction) -> Self {
        self.block_function = block_function;
        self
    }

    /// Expand at least `n_bytes` of output, rounded up to whole blocks,
    /// starting from counter 0.
    ///
    /// Called once per generator. The stream is capped at [`MAX_BLOCKS`]
    /// blocks so the counter never wraps.
    pub fn pregenerate(&mut self, n_bytes: usize) -> Result<(), DbgError> {
        if self.blocks > 0 {
            return Err(DbgError::AlreadyPregenerated);
        }

        let chunks = n_bytes.div_ceil(BLOCK_SIZE);
        let too_long = DbgError::StreamTooLong { requested: n_bytes };
        if chunks as u64 > MAX_BLOCKS {
            return Err(too_long);
        }
        let total = chunks.checked_mul(BLOCK_SIZE).ok_or(too_long)?;
        self.buffer.reserve_exact(total);

        for counter in 0..chunks as u64 {
            // counter < MAX_BLOCKS
            let block = self.block_function.block(&self.seed, counter as u32);
            self.buffer.extend_from_slice(&block);
        }
        self.blocks = chunks as u64;
        Ok(())
    }

    /// Take the next `count` bytes of the stream
    pub fn get_next_bytes(&mut self, count: usize) -> Result<Vec<u8>, DbgError> {
        let mut out = vec![0u8; count];
        self.fill(&mut out)?;
        Ok(out)
    }

    /// Fill `dest` from the stream. On exhaustion nothing is consumed.
    pub fn fill(&mut self, dest: &mut [u8]) -> Result<(), DbgError> {
        let remaining = self.remaining();
        if dest.len() > remaining {
            return Err(DbgError::BufferExhausted {
                requested: dest.len(),
                remaining,
            });
        }

        let end = self.offset + dest.len();
        dest.copy_from_slice(&self.buffer[self.offset..end]);
        self.offset = end;
        Ok(())
    }

    /// Total bytes pre-generated
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Bytes still available
    pub fn remaining(&self) -> usize {
        self.buffer.len() - self.offset
    }

    /// Bytes handed out so far
    pub fn consumed(&self) -> usize {
        self.offset
    }

    /// Number of blocks generated
    pub fn blocks(&self) -> u64 {
        self.blocks
    }

    pub fn block_function(&self) -> BlockFunction {
        self.block_function
    }
}

impl Drop for DeterministicByteGenerator {
    fn drop(&mut self) {
        self.seed.zeroize();
        self.buffer.zeroize();
    }
}

impl std::fmt::Debug for DeterministicByteGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeterministicByteGenerator")
            .field("blocks", &self.blocks)
            .field("len", &self.buffer.len())
            .field("offset", &self.offset)
            .field("block_function", &self.block_function)
            .finish_non_exhaustive()
    }
}
