use num_enum::{IntoPrimitive, TryFromPrimitive};
use sea_orm::entity::prelude::*;
use serde_repr::*;

use std::fmt;

/// Progress of a payout that has been started but whose approval is not yet persisted
/// 1 Sending  intent recorded, gateway call in flight (or process died during it)
/// 2 Unknown  gateway did not answer in time, the transfer may or may not have landed
/// 3 Sent     transfer confirmed, application not yet marked approved
/// 4 Counted  task and stats counters bumped for the transfer, application not yet saved
#[repr(i32)]
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    IntoPrimitive,
    TryFromPrimitive,
    Serialize_repr,
    Deserialize_repr,
    EnumIter,
    DeriveActiveEnum,
)]
#[sea_orm(rs_type = "i32", db_type = "Integer")]
pub enum PayoutState {
    #[sea_orm(num_value = 1)]
    Sending = 1,
    #[sea_orm(num_value = 2)]
    Unknown = 2,
    #[sea_orm(num_value = 3)]
    Sent = 3,
    #[sea_orm(num_value = 4)]
    Counted = 4,
}

impl fmt::Display for PayoutState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            PayoutState::Sending => "Sending",
            PayoutState::Unknown => "Unknown",
            PayoutState::Sent => "Sent",
            PayoutState::Counted => "Counted",
        };
        write!(f, "{}", name)
    }
}
