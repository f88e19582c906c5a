pub mod auth;
pub mod campaigns;
pub mod utils;
pub mod wallet;
