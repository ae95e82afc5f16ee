//! Segmented guest physical address space.
//!
//! The address space is a small ordered collection of [`Slice`]s. Each read
//! or write resolves to at most one slice; overlapping ranges are resolved
//! by declaration order (first match wins), mirroring the original C
//! implementation's linear scan over `slices[]`.

use std::ops::Range;

use crate::error::EmulatorError;

/// Maximum number of mapped regions. Matches the original's
/// `MAX_ADDRESS_SLICES` compile-time bound.
pub const MAX_SLICES: usize = 4;

/// A contiguous mapped region of the guest address space.
pub struct Slice {
    name: String,
    begin: u32,
    end: u32,
    data: Vec<u8>,
    read_only: bool,
    /// An alias of another slice (e.g. ROM mirrored at two base addresses).
    /// Excluded from state-dump enumeration.
    shadow_mapping: bool,
}

impl Slice {
    fn range(&self) -> Range<u32> {
        self.begin..self.end
    }

    fn contains(&self, address: u32, length: u32) -> bool {
        address >= self.begin && address.saturating_add(length) <= self.end + 1 && {
            // every byte of [address, address+length-1] must lie in range
            address.checked_add(length - 1).is_some_and(|last| last < self.end)
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn is_shadow(&self) -> bool {
        self.shadow_mapping
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// Diagnostic reported for an out-of-policy memory access. These are never
/// fatal to the interpreter — see spec §7 "Error Handling Design".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryFault {
    /// No slice covers `[address, address + length)`.
    Unmapped { address: u32, length: u32, write: bool },
    /// The access targets a read-only slice.
    ReadOnlyWrite { address: u32, length: u32 },
}

impl std::fmt::Display for MemoryFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemoryFault::Unmapped { address, length, write } => write!(
                f,
                "{} {:2} ERR: [{:#010x}]",
                if *write { "Write" } else { "Read" },
                8 * length,
                address
            ),
            MemoryFault::ReadOnlyWrite { address, length } => {
                write!(f, "Write {:2} RO: [{:#010x}]", 8 * length, address)
            }
        }
    }
}

/// Segmented physical memory. Populated once at initialization and not
/// resized during execution (spec §3 "Address space").
#[derive(Default)]
pub struct AddressSpace {
    slices: Vec<Slice>,
}

impl AddressSpace {
    pub fn new() -> Self {
        Self { slices: Vec::new() }
    }

    pub fn slices(&self) -> &[Slice] {
        &self.slices
    }

    /// Append a mapped region. Declaration order is priority order for
    /// overlapping slices — first match wins on lookup.
    ///
    /// # Errors
    /// Returns [`EmulatorError::AddressSpaceFull`] if the slice-count bound
    /// ([`MAX_SLICES`]) is already reached. Per spec §7 this is the sole
    /// fatal, configuration-time error path.
    pub fn add_region(
        &mut self,
        name: impl Into<String>,
        begin: u32,
        data: Vec<u8>,
        read_only: bool,
        shadow_mapping: bool,
    ) -> Result<(), EmulatorError> {
        if self.slices.len() >= MAX_SLICES {
            return Err(EmulatorError::AddressSpaceFull { max: MAX_SLICES });
        }
        let name = name.into();
        let end = begin + data.len() as u32;
        tracing::info!(
            name = %name,
            begin = %format!("{begin:#010x}"),
            length = %format!("{:#x}", data.len()),
            read_only,
            shadow_mapping,
            "added memory region"
        );
        self.slices.push(Slice {
            name,
            begin,
            end,
            data,
            read_only,
            shadow_mapping,
        });
        Ok(())
    }

    fn find(&self, address: u32, length: u32) -> Option<&Slice> {
        self.slices.iter().find(|s| s.contains(address, length))
    }

    fn find_mut(&mut self, address: u32, length: u32) -> Option<&mut Slice> {
        self.slices.iter_mut().find(|s| s.contains(address, length))
    }

    /// Raw byte view into the slice backing `address`, if mapped. Used by
    /// the host-callback surface for guest syscalls and by the state dumper.
    pub fn memory_ptr(&self, address: u32, length: u32) -> Option<&[u8]> {
        let slice = self.find(address, length)?;
        let offset = (address - slice.begin) as usize;
        Some(&slice.data[offset..offset + length as usize])
    }

    pub fn memory_ptr_mut(&mut self, address: u32, length: u32) -> Option<&mut [u8]> {
        let slice = self.find_mut(address, length)?;
        let offset = (address - slice.begin) as usize;
        Some(&mut slice.data[offset..offset + length as usize])
    }

    fn read_n(&self, address: u32, length: u32) -> Result<u32, MemoryFault> {
        let slice = self.find(address, length).ok_or(MemoryFault::Unmapped {
            address,
            length,
            write: false,
        })?;
        let offset = (address - slice.begin) as usize;
        let bytes = &slice.data[offset..offset + length as usize];
        let value = match length {
            1 => bytes[0] as u32,
            2 => u16::from_le_bytes([bytes[0], bytes[1]]) as u32,
            4 => u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            _ => unreachable!("address-space accesses are byte/half/word only"),
        };
        Ok(value)
    }

    fn write_n(&mut self, address: u32, length: u32, value: u32) -> Result<(), MemoryFault> {
        let slice = self.find_mut(address, length).ok_or(MemoryFault::Unmapped {
            address,
            length,
            write: true,
        })?;
        if slice.read_only {
            return Err(MemoryFault::ReadOnlyWrite { address, length });
        }
        let offset = (address - slice.begin) as usize;
        let bytes = &mut slice.data[offset..offset + length as usize];
        match length {
            1 => bytes[0] = value as u8,
            2 => bytes.copy_from_slice(&(value as u16).to_le_bytes()),
            4 => bytes.copy_from_slice(&value.to_le_bytes()),
            _ => unreachable!("address-space accesses are byte/half/word only"),
        }
        Ok(())
    }

    /// Read a byte, reporting an unmapped-read fault (and returning zero)
    /// on failure instead of propagating an error to the caller — the
    /// simulator prioritizes progress over strictness (spec §4.1/§7).
    pub fn read8(&self, address: u32) -> u8 {
        self.read_n(address, 1).unwrap_or_else(|fault| {
            tracing::warn!(%fault, "memory fault");
            0
        }) as u8
    }

    pub fn read16(&self, address: u32) -> u16 {
        self.read_n(address, 2).unwrap_or_else(|fault| {
            tracing::warn!(%fault, "memory fault");
            0
        }) as u16
    }

    pub fn read32(&self, address: u32) -> u32 {
        self.read_n(address, 4).unwrap_or_else(|fault| {
            tracing::warn!(%fault, "memory fault");
            0
        })
    }

    pub fn write8(&mut self, address: u32, value: u8) {
        if let Err(fault) = self.write_n(address, 1, value as u32) {
            tracing::warn!(%fault, "memory fault");
        }
    }

    pub fn write16(&mut self, address: u32, value: u16) {
        if let Err(fault) = self.write_n(address, 2, value as u32) {
            tracing::warn!(%fault, "memory fault");
        }
    }

    pub fn write32(&mut self, address: u32, value: u32) {
        if let Err(fault) = self.write_n(address, 4, value) {
            tracing::warn!(%fault, "memory fault");
        }
    }

    /// Concatenate two consecutive little-endian halfwords at `pc` into a
    /// 32-bit instruction word, high halfword first. Matches the original
    /// `addrspace_read_insn_word`: narrow Thumb forms occupy the high 16
    /// bits of the combined word, wide forms span the whole word.
    pub fn read_insn_word(&self, pc: u32) -> u32 {
        (u32::from(self.read16(pc)) << 16) | u32::from(self.read16(pc + 2))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn space_with_ram() -> AddressSpace {
        let mut s = AddressSpace::new();
        s.add_region("rom", 0x0800_0000, vec![0u8; 0x100], true, false).unwrap();
        s.add_region("ram", 0x2000_0000, vec![0u8; 0x100], false, false).unwrap();
        s
    }

    #[test]
    fn write8_then_read8_round_trips() {
        let mut s = space_with_ram();
        s.write8(0x2000_0010, 0xAB);
        assert_eq!(s.read8(0x2000_0010), 0xAB);
    }

    #[test]
    fn write32_then_read16_is_low_halfword_little_endian() {
        let mut s = space_with_ram();
        s.write32(0x2000_0020, 0xDEAD_BEEF);
        assert_eq!(s.read16(0x2000_0020), 0xBEEF);
        assert_eq!(s.read16(0x2000_0022), 0xDEAD);
    }

    #[test]
    fn read_outside_any_slice_reports_fault_and_returns_zero() {
        let s = space_with_ram();
        assert_eq!(s.read32(0x9000_0000), 0);
    }

    #[test]
    fn write_to_read_only_slice_is_discarded() {
        let mut s = space_with_ram();
        s.write8(0x0800_0000, 0x42);
        assert_eq!(s.read8(0x0800_0000), 0);
    }

    #[test]
    fn first_match_wins_on_overlapping_slices() {
        let mut s = AddressSpace::new();
        s.add_region("low", 0, vec![1u8; 4], false, false).unwrap();
        s.add_region("shadow", 0, vec![2u8; 4], true, true).unwrap();
        assert_eq!(s.read8(0), 1);
    }

    #[test]
    fn read_insn_word_concatenates_high_half_first() {
        let mut s = space_with_ram();
        s.write16(0x2000_0000, 0x1234);
        s.write16(0x2000_0002, 0x5678);
        assert_eq!(s.read_insn_word(0x2000_0000), 0x1234_5678);
    }

    #[test]
    fn add_region_past_slice_bound_returns_error() {
        let mut s = AddressSpace::new();
        for i in 0..MAX_SLICES {
            s.add_region(format!("r{i}"), i as u32 * 0x1000, vec![0u8; 4], false, false).unwrap();
        }
        let result = s.add_region("overflow", 0x9000, vec![0u8; 4], false, false);
        assert!(matches!(result, Err(EmulatorError::AddressSpaceFull { max }) if max == MAX_SLICES));
    }
}
