pub const MAX_NAME_LEN: usize = 256;
pub const MAX_LABEL_LEN: usize = 1024;
pub const MAX_SLOTS_PER_RESOURCE: usize = 10_000;
pub const MAX_PROMOTION_BATCH: usize = 5_000;
pub const MAX_CLASS_CAPACITY: u32 = 10_000;
pub const MINUTES_PER_DAY: u16 = 1440;
