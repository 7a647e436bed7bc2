#![allow(async_fn_in_trait)]
pub mod checksum;
pub mod cmr;
pub mod credentials;
pub mod download;
pub mod error;
pub mod product;
pub mod query;
pub mod request;
pub mod session;
pub mod spatial;
pub mod sync;
