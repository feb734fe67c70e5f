//! ArcGIS feature-service client for case counts, trend categories and
//! layer metadata.

mod client;

pub use client::ArcGisClient;
