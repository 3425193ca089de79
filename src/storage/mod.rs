pub mod layout;
pub mod provisioner;

pub use layout::{CANONICAL_EXTENSION, MediaLayout, Tenant, TenantDirectory};
pub use provisioner::{DirectoryStatus, ensure as ensure_directory};
