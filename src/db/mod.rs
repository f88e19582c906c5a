pub mod campaign;
pub mod ledger;
#[cfg(test)]
pub mod memory;
pub mod wallet;
