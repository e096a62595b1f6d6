pub mod backup_exchange;
pub mod classes;
pub mod conflicts;
pub mod core;
pub mod curricula;
pub mod holidays;
pub mod sessions;
pub mod setup;
pub mod suspensions;
pub mod teachers;
