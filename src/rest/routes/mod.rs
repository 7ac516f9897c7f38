pub mod health;
pub mod items;
pub mod tasks;
pub mod timelogs;
pub mod users;
