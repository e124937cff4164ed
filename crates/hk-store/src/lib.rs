//! hk-store: on-disk state
//!
//! Server side:
//! ```text
//! {save_dir}/characters/{identity}_{name}.fch            canonical profile
//! {save_dir}/characters/backups/{identity}_{name}/       rotation archive
//!     0000000001-1700000000.fch
//!     0000000002-1700000360.fch
//! ```
//!
//! Client side, next to the local save:
//! ```text
//! {stem}.fch.serverbackup   signed payload
//! {stem}.fch.signature      signature package
//! ```

pub mod archive;
pub mod atomic;
pub mod emergency;
pub mod profiles;

pub use archive::{ArchiveEntry, BackupArchive};
pub use atomic::{write_atomic, write_atomic_private};
pub use emergency::EmergencyBackup;
pub use profiles::{profile_file_stem, ProfileEntry, ProfileStore, SaveReport};
