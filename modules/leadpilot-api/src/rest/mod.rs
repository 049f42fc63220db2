pub mod billing;
pub mod cron;
pub mod leads;
pub mod oauth;
pub mod products;
