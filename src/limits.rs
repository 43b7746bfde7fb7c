use crate::model::Ms;

pub const MAX_TENANTS: usize = 1024;
pub const MAX_TENANT_NAME_LEN: usize = 128;

pub const MAX_BOOKINGS_PER_TENANT: usize = 1_000_000;
pub const MAX_BOOKINGS_PER_PAIR: usize = 10_000;

/// Address and description.
pub const MAX_TEXT_LEN: usize = 4096;
/// Service kind and payment fields.
pub const MAX_LABEL_LEN: usize = 256;

pub const MAX_EVIDENCE_REFS: usize = 64;
pub const MAX_EVIDENCE_REF_LEN: usize = 2048;

pub const DEFAULT_PAGE: u32 = 1;
pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub const MAX_PAGE_SIZE: u32 = 100;

/// 1970-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
/// 9999-12-31T23:59:59.999Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 253_402_300_799_999;
