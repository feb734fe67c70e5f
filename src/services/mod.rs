pub mod cases_api;
