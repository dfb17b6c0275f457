//! Namespaced store keys (`lp:*`)

pub fn user(wallet_id: &str) -> String {
    format!("lp:user:{}", wallet_id)
}

pub fn chat_wallet(chat_id: &str) -> String {
    format!("lp:chat:{}:wallet", chat_id)
}

pub fn recipient(wallet_id: &str) -> String {
    format!("lp:recipient:{}", wallet_id)
}

/// Set of position ids tracked for a wallet
pub fn tracked_set(wallet_id: &str) -> String {
    format!("lp:tracked:{}", wallet_id)
}

pub fn tracked(wallet_id: &str, position_id: &str) -> String {
    format!("lp:tracked:{}:{}", wallet_id, position_id)
}

/// Set of wallets with at least one tracked position
pub const TRACKED_WALLETS: &str = "lp:tracked:wallets";

/// Hash of schedule id -> Schedule
pub const DCA_SCHEDULES: &str = "lp:dca:schedules";

/// Set of ACTIVE schedule ids
pub const DCA_ACTIVE: &str = "lp:dca:active";

pub fn dca_history(schedule_id: &str) -> String {
    format!("lp:dca:history:{}", schedule_id)
}

pub const WORKER_STATE: &str = "lp:worker:state";

pub const WORKER_LOGS: &str = "lp:worker:logs";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_shapes() {
        assert_eq!(user("w1"), "lp:user:w1");
        assert_eq!(chat_wallet("42"), "lp:chat:42:wallet");
        assert_eq!(tracked_set("w1"), "lp:tracked:w1");
        assert_eq!(tracked("w1", "pos9"), "lp:tracked:w1:pos9");
        assert_eq!(dca_history("dca3"), "lp:dca:history:dca3");
    }
}
