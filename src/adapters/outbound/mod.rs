pub mod fetch;
pub mod messaging;
pub mod persistence;
pub mod storage;
