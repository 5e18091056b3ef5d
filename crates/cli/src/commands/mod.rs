pub mod ask;
pub mod history;
pub mod init;
pub mod serve;
