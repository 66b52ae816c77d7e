pub mod layout;
pub mod pallet;

pub use layout::Layout;
pub use pallet::Pallet;
pub use pallet::PalletGeometry;

/// The document key holding the client-owned state blob
pub const STATE_KEY: &str = "state";
