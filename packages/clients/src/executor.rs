//! Remote build executor API.

pub mod v1;
