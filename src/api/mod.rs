/// REST API data types
pub mod dto;
