//! The fixed-capacity, offset-addressed arena.
//!
//! An [`Arena`] is one flat region of 64-bit atomic words addressed by byte
//! [`Offset`]. Nothing stored inside it holds a native pointer: every
//! arena-resident link is an offset, and [`Arena::word_index`] is the single
//! place where an offset is translated into something dereferenceable.
//!
//! Pages are handed out by a bump cursor and never returned. Page 0 is
//! reserved so that [`Offset::NULL`] never aliases a live object.

use std::sync::atomic::{AtomicU64, Ordering};

use burrow_core::{AllocError, Offset, PageSource, WordMemory};
use parking_lot::Mutex;

use crate::config::ArenaConfig;
use crate::constants::{PAGE_SIZE, WORD_SIZE};
use crate::error::ConfigError;

/// A fixed-capacity arena of atomic words.
pub struct Arena {
    words: Box<[AtomicU64]>,
    total_pages: u64,
    /// Next page the bump cursor will hand out.
    next_page: Mutex<u64>,
}

// Compile-time assertion: Arena must be Send + Sync.
const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<Arena>();
};

impl Arena {
    /// Create an arena sized by `config`.
    ///
    /// All memory is zeroed up front; the arena never grows afterwards.
    pub fn new(config: &ArenaConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let word_count = (config.capacity_bytes / WORD_SIZE) as usize;
        let words = (0..word_count).map(|_| AtomicU64::new(0)).collect();
        Ok(Self {
            words,
            total_pages: config.total_pages(),
            next_page: Mutex::new(1),
        })
    }

    /// Create an arena of `capacity_bytes` with default settings otherwise.
    pub fn with_capacity(capacity_bytes: u64) -> Result<Self, ConfigError> {
        Self::new(&ArenaConfig::new(capacity_bytes))
    }

    /// Translate an offset into a word index.
    ///
    /// Fails with `InvalidArgument` if the offset is null, unaligned or
    /// outside the arena.
    pub fn word_index(&self, offset: Offset) -> Result<usize, AllocError> {
        if offset.is_null() {
            return Err(AllocError::invalid("null offset dereferenced"));
        }
        if offset.0 % WORD_SIZE != 0 {
            return Err(AllocError::invalid(format!(
                "offset {offset} is not word aligned"
            )));
        }
        let index = (offset.0 / WORD_SIZE) as usize;
        if index >= self.words.len() {
            return Err(AllocError::invalid(format!(
                "offset {offset} is outside the arena"
            )));
        }
        Ok(index)
    }

    fn word(&self, offset: Offset) -> Result<&AtomicU64, AllocError> {
        Ok(&self.words[self.word_index(offset)?])
    }

    /// Atomically add `delta` to the word at `offset`, returning the previous value.
    pub fn fetch_add(&self, offset: Offset, delta: u64) -> Result<u64, AllocError> {
        Ok(self.word(offset)?.fetch_add(delta, Ordering::AcqRel))
    }

    /// Zero `bytes` bytes starting at `offset`. Both must be word multiples.
    pub fn zero(&self, offset: Offset, bytes: u64) -> Result<(), AllocError> {
        if bytes % WORD_SIZE != 0 {
            return Err(AllocError::invalid(format!(
                "zero length {bytes} is not a word multiple"
            )));
        }
        let words = bytes / WORD_SIZE;
        if words == 0 {
            return Ok(());
        }
        let start = self.word_index(offset)?;
        self.word_index(last_word(offset, words)?)?;
        for w in &self.words[start..start + words as usize] {
            w.store(0, Ordering::Release);
        }
        Ok(())
    }

    /// Copy `count` words from `src` to `dst`. The ranges may overlap.
    pub fn copy_words(&self, dst: Offset, src: Offset, count: u64) -> Result<(), AllocError> {
        if count == 0 {
            return Ok(());
        }
        let d = self.word_index(dst)?;
        let s = self.word_index(src)?;
        self.word_index(last_word(dst, count)?)?;
        self.word_index(last_word(src, count)?)?;
        let n = count as usize;
        if d <= s {
            for i in 0..n {
                let v = self.words[s + i].load(Ordering::Acquire);
                self.words[d + i].store(v, Ordering::Release);
            }
        } else {
            for i in (0..n).rev() {
                let v = self.words[s + i].load(Ordering::Acquire);
                self.words[d + i].store(v, Ordering::Release);
            }
        }
        Ok(())
    }

    /// Copy bytes out of the arena. `offset` need not be aligned.
    pub fn read_bytes(&self, offset: Offset, buf: &mut [u8]) -> Result<(), AllocError> {
        for (i, byte) in buf.iter_mut().enumerate() {
            let at = byte_at(offset, i)?;
            let word = self.word(Offset(at - at % WORD_SIZE))?;
            let shift = (at % WORD_SIZE) * 8;
            *byte = (word.load(Ordering::Acquire) >> shift) as u8;
        }
        Ok(())
    }

    /// Copy bytes into the arena. `offset` need not be aligned.
    ///
    /// Each byte is written with an atomic mask-and-or, so neighbouring
    /// bytes of the same word are never clobbered.
    pub fn write_bytes(&self, offset: Offset, data: &[u8]) -> Result<(), AllocError> {
        for (i, &byte) in data.iter().enumerate() {
            let at = byte_at(offset, i)?;
            let word = self.word(Offset(at - at % WORD_SIZE))?;
            let shift = (at % WORD_SIZE) * 8;
            word.fetch_and(!(0xffu64 << shift), Ordering::AcqRel);
            word.fetch_or((byte as u64) << shift, Ordering::AcqRel);
        }
        Ok(())
    }

    /// Total capacity in bytes.
    pub fn capacity_bytes(&self) -> u64 {
        self.words.len() as u64 * WORD_SIZE
    }

    /// Total pages, including the reserved null page.
    pub fn total_pages(&self) -> u64 {
        self.total_pages
    }

    /// Pages handed out so far, including the reserved null page.
    pub fn pages_used(&self) -> u64 {
        *self.next_page.lock()
    }

    /// Pages still available for reservation.
    pub fn pages_free(&self) -> u64 {
        self.total_pages - self.pages_used()
    }
}

impl PageSource for Arena {
    fn page_size(&self) -> u64 {
        PAGE_SIZE
    }

    fn alloc_pages(&self, count: u64) -> Result<Offset, AllocError> {
        if count == 0 {
            return Err(AllocError::invalid("page reservation of zero pages"));
        }
        let mut next = self.next_page.lock();
        let end = next.checked_add(count).filter(|&end| end <= self.total_pages);
        let Some(end) = end else {
            tracing::warn!(
                requested = count,
                free = self.total_pages - *next,
                "arena page reservation failed"
            );
            return Err(AllocError::OutOfMemory {
                requested: count.saturating_mul(PAGE_SIZE),
            });
        };
        let start = *next;
        *next = end;
        Ok(Offset(start * PAGE_SIZE))
    }
}

impl WordMemory for Arena {
    fn load(&self, offset: Offset) -> Result<u64, AllocError> {
        Ok(self.word(offset)?.load(Ordering::Acquire))
    }

    fn store(&self, offset: Offset, value: u64) -> Result<(), AllocError> {
        self.word(offset)?.store(value, Ordering::Release);
        Ok(())
    }

    fn compare_exchange(
        &self,
        offset: Offset,
        current: u64,
        new: u64,
    ) -> Result<Result<u64, u64>, AllocError> {
        Ok(self
            .word(offset)?
            .compare_exchange(current, new, Ordering::AcqRel, Ordering::Acquire))
    }
}

/// Offset of the last of `words` words starting at `offset`.
fn last_word(offset: Offset, words: u64) -> Result<Offset, AllocError> {
    words
        .checked_sub(1)
        .and_then(|n| n.checked_mul(WORD_SIZE))
        .and_then(|span| offset.0.checked_add(span))
        .map(Offset)
        .ok_or_else(|| {
            AllocError::invalid(format!("{words} words from {offset} overflow the offset space"))
        })
}

fn byte_at(offset: Offset, i: usize) -> Result<u64, AllocError> {
    offset
        .0
        .checked_add(i as u64)
        .ok_or_else(|| AllocError::invalid(format!("byte {i} past {offset} overflows")))
}
