//! The one typed, fatal error path: machine initialization. Everything
//! that can go wrong once the machine is running (unmapped access, RO
//! write, undecodable opcode) is a recoverable diagnostic, not an
//! `Error` — see spec §7 and [`crate::address_space::MemoryFault`].

#[derive(Debug, thiserror::Error)]
pub enum EmulatorError {
    #[error("ROM image {path} ({size} bytes) does not fit in a {budget}-byte ROM region")]
    ImageTooLarge { path: String, size: usize, budget: u32 },

    #[error("failed to read image file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("address space exhausted: cannot map more than {max} regions")]
    AddressSpaceFull { max: usize },
}
