use {crate::models::AccountState, std::sync::Mutex};

/// Where the façade keeps the last known chain state between runs.
pub trait ApiStorage: Send + Sync + 'static {
    fn last_block_height(&self) -> Option<u64>;
    fn save_last_block_height(&self, height: u64);
    fn account_state(&self) -> Option<AccountState>;
    fn save_account_state(&self, state: AccountState);
}

#[derive(Default)]
pub struct InMemoryStorage {
    last_block_height: Mutex<Option<u64>>,
    account_state: Mutex<Option<AccountState>>,
}

impl ApiStorage for InMemoryStorage {
    fn last_block_height(&self) -> Option<u64> {
        *self.last_block_height.lock().unwrap()
    }

    fn save_last_block_height(&self, height: u64) {
        *self.last_block_height.lock().unwrap() = Some(height);
    }

    fn account_state(&self) -> Option<AccountState> {
        *self.account_state.lock().unwrap()
    }

    fn save_account_state(&self, state: AccountState) {
        *self.account_state.lock().unwrap() = Some(state);
    }
}
