pub mod admin_api;
pub mod ai;
pub mod api;
pub mod broadcast;
pub mod handoff;
pub mod hosts;
pub mod http;
pub mod ledger;
pub mod moderation;
pub mod payouts;
pub mod requests;
pub mod settings;
pub mod shell_cache;
