//! Process-wide lookup tables built at startup: upload categories, batch
//! responders and single-file upload clients.

pub mod client;
pub mod responder;
pub mod subdir;
