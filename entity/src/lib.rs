mod common;

pub mod kv_entries;
pub mod kv_hash_fields;
pub mod kv_set_members;
pub mod payout_intents;
pub mod resource_info;

pub use common::*;
