mod devices;
mod entities;
mod snapshots;

pub use devices::*;
pub use entities::*;
pub use snapshots::*;

/// Vendor tags understood by the transport and template map
pub mod device_type {
    pub const HP_COMWARE: &str = "hp_comware";
    pub const HILLSTONE: &str = "hillstone_stoneos";
    pub const F5: &str = "f5";
    pub const F5_BIGIP: &str = "f5_bigip";
    pub const CISCO_IOS: &str = "cisco_ios";
}
