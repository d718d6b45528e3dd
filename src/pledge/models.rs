use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::ledger::registry::{validate_not_nil, validate_positive};

/// A backer's request to commit funds to a campaign
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct PledgeRequest {
    /// The backer's account id
    #[validate(custom = "validate_not_nil")]
    pub backer_id: Uuid,
    #[validate(custom = "validate_not_nil")]
    pub campaign_id: Uuid,
    #[validate(custom = "validate_positive")]
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PledgeReceipt {
    pub pledge_id: Uuid,
    #[serde(with = "rust_decimal::serde::float")]
    pub new_balance: Decimal,
}
