pub mod db;
pub mod timestamp;
