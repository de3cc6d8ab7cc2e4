pub mod auth;
pub mod backup_exchange;
pub mod core;
pub mod exams;
pub mod fees;
pub mod homework;
pub mod notices;
pub mod notifications;
pub mod students;
