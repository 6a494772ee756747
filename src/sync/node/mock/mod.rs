mod client;

pub use client::{mock_hash, mock_transaction, MockCurrency, MockNode};
