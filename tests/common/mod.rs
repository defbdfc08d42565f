#![allow(dead_code)]

use alloy::primitives::{Address, B256, TxHash, U256, address};
use event_alerts::{
    RawLog,
    events::{beanstalk, erc20},
    test_utils::raw_log,
};
use tracing_subscriber::EnvFilter;

pub const DIAMOND: Address = address!("0xD1A0D188E861ed9d15773a2F3574a2e94134bA8f");
pub const BEAN: Address = address!("0xBEA0005B8599265D41256905A9B3073D397812E4");
pub const OPERATOR: Address = address!("0x00000000000000000000000000000000000000a1");
pub const PUBLISHER: Address = address!("0x00000000000000000000000000000000000000b2");

/// Routes the crate's logs to the test output; filter with `RUST_LOG=event_alerts=debug`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn txn(n: u8) -> TxHash {
    B256::with_last_byte(n)
}

pub fn sow(txn: TxHash, block: u64, index: u64, beans: u64) -> RawLog {
    let event = beanstalk::Sow {
        account: PUBLISHER,
        fieldId: U256::ZERO,
        index: U256::from(index),
        beans: U256::from(beans),
        pods: U256::from(beans * 3),
    };
    raw_log(&event, DIAMOND, txn, block, index)
}

pub fn bean_transfer(txn: TxHash, block: u64, index: u64, value: u64) -> RawLog {
    let event = erc20::Transfer { from: PUBLISHER, to: DIAMOND, value: U256::from(value) };
    raw_log(&event, BEAN, txn, block, index)
}

pub fn execution_began(txn: TxHash, block: u64, index: u64, nonce: u64) -> RawLog {
    let event = beanstalk::TractorExecutionBegan {
        operator: OPERATOR,
        publisher: PUBLISHER,
        blueprintHash: B256::with_last_byte(0xbb),
        nonce: U256::from(nonce),
        gasleft: U256::from(1_000_000),
    };
    raw_log(&event, DIAMOND, txn, block, index)
}

pub fn execution_ended(txn: TxHash, block: u64, index: u64, nonce: u64) -> RawLog {
    let event = beanstalk::Tractor {
        operator: OPERATOR,
        publisher: PUBLISHER,
        blueprintHash: B256::with_last_byte(0xbb),
        nonce: U256::from(nonce),
        gasleft: U256::from(900_000),
    };
    raw_log(&event, DIAMOND, txn, block, index)
}
