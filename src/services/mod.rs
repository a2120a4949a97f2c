pub mod file_repository;
pub mod prepare;
pub mod qr;
pub mod storer;
pub mod thumbnail;
pub mod upload_service;
pub mod watermark;
