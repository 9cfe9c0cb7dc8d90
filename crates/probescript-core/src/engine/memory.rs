//! Guest memory of one execution state.
//!
//! Virtual pages map onto physical frames. Frames are shared between a
//! state and its forks until either side writes, at which point the writer
//! gets its own copy. Every byte carries a dirty mask that the engine and
//! plugins can read and overwrite.

use std::collections::BTreeMap;
use std::sync::Arc;

pub const PAGE_SIZE: u64 = 0x1000;

const PAGE_BYTES: usize = PAGE_SIZE as usize;

/// Address spaces a lookup can be expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressType {
    Virtual,
    Physical,
}

impl AddressType {
    pub const ALL: [Self; 2] = [Self::Virtual, Self::Physical];

    /// Inverse of `kind as i64`.
    pub fn from_code(code: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| *kind as i64 == code)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Virtual => "VIRTUAL",
            Self::Physical => "PHYSICAL",
        }
    }
}

#[derive(Clone)]
struct Frame {
    data: Box<[u8]>,
    dirty: Box<[u8]>,
}

impl Frame {
    fn zeroed() -> Self {
        Self {
            data: vec![0; PAGE_BYTES].into_boxed_slice(),
            dirty: vec![0; PAGE_BYTES].into_boxed_slice(),
        }
    }
}

fn page_of(address: u64) -> u64 {
    address & !(PAGE_SIZE - 1)
}

fn offset_of(address: u64) -> usize {
    (address & (PAGE_SIZE - 1)) as usize
}

#[derive(Clone, Default)]
pub struct Memory {
    /// Virtual page base to physical page base.
    mappings: BTreeMap<u64, u64>,
    /// Physical page base to frame. Frames are created on first write.
    frames: BTreeMap<u64, Arc<Frame>>,
}

impl std::fmt::Debug for Memory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memory")
            .field("mapped_pages", &self.mappings.len())
            .field("frames", &self.frames.len())
            .finish()
    }
}

impl Memory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map the virtual pages covering `[virtual_address, virtual_address + len)`
    /// onto consecutive physical pages starting at `physical_address`.
    /// Existing mappings for those pages are replaced.
    pub fn map(&mut self, virtual_address: u64, physical_address: u64, len: u64) {
        if len == 0 {
            return;
        }
        let first = page_of(virtual_address);
        let last = page_of(virtual_address.saturating_add(len - 1));
        let mut physical = page_of(physical_address);
        let mut page = first;
        loop {
            self.mappings.insert(page, physical);
            if page == last {
                break;
            }
            page = page.wrapping_add(PAGE_SIZE);
            physical = physical.wrapping_add(PAGE_SIZE);
        }
    }

    pub fn unmap(&mut self, virtual_address: u64) -> bool {
        self.mappings.remove(&page_of(virtual_address)).is_some()
    }

    pub fn is_mapped(&self, virtual_address: u64) -> bool {
        self.mappings.contains_key(&page_of(virtual_address))
    }

    pub fn get_physical_address(&self, virtual_address: u64) -> Option<u64> {
        self.mappings
            .get(&page_of(virtual_address))
            .map(|physical| physical | (virtual_address & (PAGE_SIZE - 1)))
    }

    /// Resolve `address` to a physical address.
    pub fn resolve(&self, address: u64, kind: AddressType) -> Option<u64> {
        match kind {
            AddressType::Virtual => self.get_physical_address(address),
            AddressType::Physical => Some(address),
        }
    }

    /// Split `[address, address + len)` into per-page physical chunks of
    /// `(physical page, offset, length)`. `None` if any page is unmapped.
    fn chunks(
        &self,
        address: u64,
        len: usize,
        kind: AddressType,
    ) -> Option<Vec<(u64, usize, usize)>> {
        let mut chunks = Vec::new();
        let mut cursor = address;
        let mut remaining = len;
        while remaining > 0 {
            let physical = self.resolve(cursor, kind)?;
            let offset = offset_of(physical);
            let take = remaining.min(PAGE_BYTES - offset);
            chunks.push((page_of(physical), offset, take));
            remaining -= take;
            cursor = cursor.wrapping_add(take as u64);
        }
        Some(chunks)
    }

    /// Read `len` bytes. Memory never written reads as zero.
    pub fn read(&self, address: u64, len: usize, kind: AddressType) -> Option<Vec<u8>> {
        let mut bytes = Vec::with_capacity(len);
        for (page, offset, take) in self.chunks(address, len, kind)? {
            match self.frames.get(&page) {
                Some(frame) => bytes.extend_from_slice(&frame.data[offset..offset + take]),
                None => bytes.resize(bytes.len() + take, 0),
            }
        }
        Some(bytes)
    }

    /// Write `bytes`, all or nothing. Returns false if any page is unmapped.
    pub fn write(&mut self, address: u64, bytes: &[u8], kind: AddressType) -> bool {
        let Some(chunks) = self.chunks(address, bytes.len(), kind) else {
            return false;
        };
        let mut written = 0;
        for (page, offset, take) in chunks {
            let frame = Arc::make_mut(
                self.frames
                    .entry(page)
                    .or_insert_with(|| Arc::new(Frame::zeroed())),
            );
            frame.data[offset..offset + take].copy_from_slice(&bytes[written..written + take]);
            written += take;
        }
        true
    }

    /// Little-endian integer of `size` bytes (1, 2, 4 or 8).
    pub fn read_int(&self, address: u64, size: usize, kind: AddressType) -> Option<u64> {
        if !matches!(size, 1 | 2 | 4 | 8) {
            return None;
        }
        let bytes = self.read(address, size, kind)?;
        let mut buf = [0u8; 8];
        buf[..size].copy_from_slice(&bytes);
        Some(u64::from_le_bytes(buf))
    }

    pub fn write_int(&mut self, address: u64, value: u64, size: usize, kind: AddressType) -> bool {
        if !matches!(size, 1 | 2 | 4 | 8) {
            return false;
        }
        self.write(address, &value.to_le_bytes()[..size], kind)
    }

    pub fn read_dirty_mask(&self, address: u64, kind: AddressType) -> Option<u8> {
        let physical = self.resolve(address, kind)?;
        Some(
            self.frames
                .get(&page_of(physical))
                .map_or(0, |frame| frame.dirty[offset_of(physical)]),
        )
    }

    pub fn write_dirty_mask(&mut self, address: u64, mask: u8, kind: AddressType) -> bool {
        let Some(physical) = self.resolve(address, kind) else {
            return false;
        };
        let frame = Arc::make_mut(
            self.frames
                .entry(page_of(physical))
                .or_insert_with(|| Arc::new(Frame::zeroed())),
        );
        frame.dirty[offset_of(physical)] = mask;
        true
    }
}
