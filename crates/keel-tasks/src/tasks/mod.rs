//! Tasks that work with any cloud: state-store files and keypairs

mod keypair;
mod managed_file;

pub use keypair::{Keypair, KeypairType, KEYPAIR_KIND};
pub use managed_file::{managed_file, ManagedFile, MANAGED_FILE_KIND};
