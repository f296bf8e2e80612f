pub mod file;
pub mod init;
pub mod user;
